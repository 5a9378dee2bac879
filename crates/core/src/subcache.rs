//! Typed sub-caches with copy-on-write deltas.
//!
//! Each sub-cache keeps its committed state in an `Arc<BTreeMap>`. A delta
//! shares that base and records only the keys it touches in an ordered
//! overlay (`Some(value)` for inserted or modified keys, `None` for removed
//! ones). Committing folds the overlay into the base; when no reader holds
//! the previous base it is mutated in place, otherwise it is cloned first.

use std::{
    any::Any,
    collections::BTreeMap,
    fmt::Debug,
    ops::RangeBounds,
    sync::{Arc, RwLock},
};

use itertools::{EitherOrBoth, Itertools as _};

pub type CacheName = &'static str;

/// Describes one logical data set held by the state cache
pub trait SubCache: Send + Sync + 'static {
    const NAME: CacheName;

    type Key: Clone + Ord + Debug + Send + Sync + 'static;
    type Value: Clone + Debug + Send + Sync + 'static;
}

type Entries<C> = BTreeMap<<C as SubCache>::Key, <C as SubCache>::Value>;

/// Read contract shared by committed views and deltas
pub trait SubCacheRead<C: SubCache> {
    fn get(&self, key: &C::Key) -> Option<&C::Value>;

    fn contains(&self, key: &C::Key) -> bool {
        self.get(key).is_some()
    }
}

/// A read-only snapshot of a sub-cache's committed state
pub struct SubCacheView<C: SubCache> {
    entries: Arc<Entries<C>>,
}

impl<C: SubCache> Clone for SubCacheView<C> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<C: SubCache> SubCacheView<C> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&C::Key, &C::Value)> {
        self.entries.iter()
    }

    pub fn range<R>(&self, range: R) -> impl Iterator<Item = (&C::Key, &C::Value)>
    where
        R: RangeBounds<C::Key>,
    {
        self.entries.range(range)
    }
}

impl<C: SubCache> SubCacheRead<C> for SubCacheView<C> {
    fn get(&self, key: &C::Key) -> Option<&C::Value> {
        self.entries.get(key)
    }
}

/// A writable overlay on top of a sub-cache's committed state
pub struct SubCacheDelta<C: SubCache> {
    base: Arc<Entries<C>>,
    changes: BTreeMap<C::Key, Option<C::Value>>,
}

impl<C: SubCache> SubCacheDelta<C> {
    fn new(base: Arc<Entries<C>>) -> Self {
        Self {
            base,
            changes: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: C::Key, value: C::Value) {
        self.changes.insert(key, Some(value));
    }

    /// Removes `key`, returning its previous value
    pub fn remove(&mut self, key: &C::Key) -> Option<C::Value> {
        let previous = self.get(key).cloned();

        if previous.is_some() {
            self.changes.insert(key.clone(), None);
        }

        previous
    }

    /// Mutable access to an entry; the committed value is copied into the
    /// overlay on first access
    pub fn get_mut(&mut self, key: &C::Key) -> Option<&mut C::Value> {
        if !self.changes.contains_key(key) {
            let value = self.base.get(key)?.clone();
            self.changes.insert(key.clone(), Some(value));
        }

        self.changes.get_mut(key)?.as_mut()
    }

    /// Merged view of committed entries and pending changes, in key order
    pub fn iter(&self) -> impl Iterator<Item = (&C::Key, &C::Value)> {
        merge(self.base.iter(), self.changes.iter())
    }

    pub fn range<R>(&self, range: R) -> impl Iterator<Item = (&C::Key, &C::Value)>
    where
        R: RangeBounds<C::Key> + Clone,
    {
        merge(self.base.range(range.clone()), self.changes.range(range))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys touched by this delta
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

impl<C: SubCache> SubCacheRead<C> for SubCacheDelta<C> {
    fn get(&self, key: &C::Key) -> Option<&C::Value> {
        match self.changes.get(key) {
            Some(change) => change.as_ref(),
            None => self.base.get(key),
        }
    }
}

fn merge<'a, K, V>(
    base: impl Iterator<Item = (&'a K, &'a V)>,
    changes: impl Iterator<Item = (&'a K, &'a Option<V>)>,
) -> impl Iterator<Item = (&'a K, &'a V)>
where
    K: Ord + 'a,
    V: 'a,
{
    base.merge_join_by(changes, |(a, _), (b, _)| a.cmp(b))
        .filter_map(|pair| match pair {
            EitherOrBoth::Left((key, value)) => Some((key, value)),
            EitherOrBoth::Both(_, (key, change)) | EitherOrBoth::Right((key, change)) => {
                change.as_ref().map(|value| (key, value))
            }
        })
}

/// Type-erased handle used by the aggregate cache
pub(crate) trait ErasedStore: Send + Sync {
    fn name(&self) -> CacheName;

    fn size(&self) -> usize;

    fn snapshot(&self) -> Box<dyn Any + Send + Sync>;

    fn create_delta(&self) -> Box<dyn ErasedDelta>;

    fn accepts(&self, delta: &dyn ErasedDelta) -> bool;

    fn apply(&self, delta: Box<dyn ErasedDelta>);
}

pub(crate) trait ErasedDelta: Send + Sync {
    fn name(&self) -> CacheName;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    fn pending_changes(&self) -> usize;
}

impl<C: SubCache> ErasedDelta for SubCacheDelta<C> {
    fn name(&self) -> CacheName {
        C::NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn pending_changes(&self) -> usize {
        self.changes.len()
    }
}

pub(crate) struct SubCacheStore<C: SubCache> {
    committed: RwLock<Arc<Entries<C>>>,
}

impl<C: SubCache> SubCacheStore<C> {
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }
}

impl<C: SubCache> ErasedStore for SubCacheStore<C> {
    fn name(&self) -> CacheName {
        C::NAME
    }

    fn size(&self) -> usize {
        self.committed.read().unwrap().len()
    }

    fn snapshot(&self) -> Box<dyn Any + Send + Sync> {
        let entries = Arc::clone(&self.committed.read().unwrap());
        Box::new(SubCacheView::<C> { entries })
    }

    fn create_delta(&self) -> Box<dyn ErasedDelta> {
        let base = Arc::clone(&self.committed.read().unwrap());
        Box::new(SubCacheDelta::<C>::new(base))
    }

    fn accepts(&self, delta: &dyn ErasedDelta) -> bool {
        delta.as_any().is::<SubCacheDelta<C>>()
    }

    fn apply(&self, delta: Box<dyn ErasedDelta>) {
        let Ok(delta) = delta.into_any().downcast::<SubCacheDelta<C>>() else {
            panic!("delta type mismatch for sub-cache {}", C::NAME);
        };

        let SubCacheDelta { base, changes } = *delta;

        // release the delta's reference so the base can be updated in place
        drop(base);

        if changes.is_empty() {
            return;
        }

        let mut committed = self.committed.write().unwrap();
        let entries = Arc::make_mut(&mut committed);

        for (key, change) in changes {
            match change {
                Some(value) => entries.insert(key, value),
                None => entries.remove(&key),
            };
        }
    }
}
