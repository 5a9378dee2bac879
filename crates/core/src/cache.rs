//! The aggregate state cache.
//!
//! A [`StateCache`] owns one committed store per registered sub-cache. All
//! writes go through a [`StateCacheDelta`] spanning every sub-cache; at most
//! one committable delta is open at a time. Commit folds every sub-delta and
//! the new height in under a single write lock so readers always observe a
//! consistent snapshot.

use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    subcache::{ErasedDelta, ErasedStore, SubCacheStore},
    CacheName, Height, SubCache, SubCacheDelta, SubCacheView,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("a delta is already open for this cache")]
    DeltaAlreadyOpen,

    #[error("sub-cache {0} not registered")]
    SubCacheNotFound(CacheName),
}

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

struct Inner {
    id: u64,
    stores: Vec<Box<dyn ErasedStore>>,

    /// Committed height; its lock also serializes commits against snapshots
    height: RwLock<Height>,

    delta_open: AtomicBool,
}

/// Registers sub-caches before the aggregate is sealed
#[derive(Default)]
pub struct StateCacheBuilder {
    stores: Vec<Box<dyn ErasedStore>>,
}

impl StateCacheBuilder {
    pub fn with<C: SubCache>(mut self) -> Self {
        self.stores.push(Box::new(SubCacheStore::<C>::new()));
        self
    }

    pub(crate) fn with_store(mut self, store: Box<dyn ErasedStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn build(self) -> StateCache {
        let inner = Inner {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            stores: self.stores,
            height: RwLock::new(Height(0)),
            delta_open: AtomicBool::new(false),
        };

        StateCache {
            inner: Arc::new(inner),
        }
    }
}

#[derive(Clone)]
pub struct StateCache {
    inner: Arc<Inner>,
}

impl StateCache {
    pub fn builder() -> StateCacheBuilder {
        StateCacheBuilder::default()
    }

    pub fn height(&self) -> Height {
        *self.inner.height.read().unwrap()
    }

    pub fn names(&self) -> Vec<CacheName> {
        self.inner.stores.iter().map(|x| x.name()).collect()
    }

    /// Number of committed entries per sub-cache
    pub fn sizes(&self) -> Vec<(CacheName, usize)> {
        let _guard = self.inner.height.read().unwrap();
        self.inner
            .stores
            .iter()
            .map(|x| (x.name(), x.size()))
            .collect()
    }

    fn open_deltas(&self) -> Vec<Box<dyn ErasedDelta>> {
        let _guard = self.inner.height.read().unwrap();
        self.inner.stores.iter().map(|x| x.create_delta()).collect()
    }

    /// Opens the single writable delta of this cache
    pub fn create_delta(&self) -> Result<StateCacheDelta, CacheError> {
        if self
            .inner
            .delta_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CacheError::DeltaAlreadyOpen);
        }

        Ok(StateCacheDelta {
            cache_id: self.inner.id,
            deltas: self.open_deltas(),
            slot: Some(DeltaSlot(self.inner.clone())),
        })
    }

    /// Opens a delta that can never be committed
    ///
    /// Detached deltas don't occupy the single-writer slot; they are used for
    /// speculative execution (e.g. unconfirmed transactions) and discarded.
    pub fn create_detached_delta(&self) -> DetachedStateCacheDelta {
        DetachedStateCacheDelta(StateCacheDelta {
            cache_id: self.inner.id,
            deltas: self.open_deltas(),
            slot: None,
        })
    }

    /// Atomically applies every sub-delta and records the new height
    ///
    /// # Panics
    ///
    /// If the delta was produced by a different cache or its sub-caches don't
    /// match this cache's. Both indicate a broken single-writer invariant.
    pub fn commit(&self, delta: StateCacheDelta, height: Height) {
        let StateCacheDelta {
            cache_id,
            deltas,
            slot,
        } = delta;

        assert_eq!(
            cache_id, self.inner.id,
            "delta was not created by this cache"
        );
        assert_eq!(
            deltas.len(),
            self.inner.stores.len(),
            "delta does not cover every sub-cache"
        );

        for (store, delta) in self.inner.stores.iter().zip(deltas.iter()) {
            assert!(
                store.accepts(&**delta),
                "delta for {} does not match sub-cache {}",
                delta.name(),
                store.name()
            );
        }

        let changes: usize = deltas.iter().map(|x| x.pending_changes()).sum();

        {
            let mut current = self.inner.height.write().unwrap();

            for (store, delta) in self.inner.stores.iter().zip(deltas) {
                store.apply(delta);
            }

            *current = height;
        }

        drop(slot);

        info!(%height, changes, "state cache committed");
    }

    /// Discards a delta without applying it
    pub fn rollback(&self, delta: StateCacheDelta) {
        debug!(
            changes = delta.pending_changes(),
            "state cache delta discarded"
        );
        drop(delta);
    }

    /// Consistent read-only snapshot of all sub-caches and the height
    pub fn create_view(&self) -> StateCacheView {
        let height = self.inner.height.read().unwrap();

        StateCacheView {
            height: *height,
            views: self.inner.stores.iter().map(|x| x.snapshot()).collect(),
        }
    }
}

/// Releases the single-writer slot when the owning delta goes away
struct DeltaSlot(Arc<Inner>);

impl Drop for DeltaSlot {
    fn drop(&mut self) {
        self.0.delta_open.store(false, Ordering::Release);
    }
}

/// Writable overlay over every sub-cache of a [`StateCache`]
pub struct StateCacheDelta {
    cache_id: u64,
    deltas: Vec<Box<dyn ErasedDelta>>,
    slot: Option<DeltaSlot>,
}

impl StateCacheDelta {
    pub fn sub<C: SubCache>(&self) -> Result<&SubCacheDelta<C>, CacheError> {
        self.deltas
            .iter()
            .find_map(|x| x.as_any().downcast_ref::<SubCacheDelta<C>>())
            .ok_or(CacheError::SubCacheNotFound(C::NAME))
    }

    pub fn sub_mut<C: SubCache>(&mut self) -> Result<&mut SubCacheDelta<C>, CacheError> {
        self.deltas
            .iter_mut()
            .find_map(|x| x.as_any_mut().downcast_mut::<SubCacheDelta<C>>())
            .ok_or(CacheError::SubCacheNotFound(C::NAME))
    }

    /// Total number of keys touched across all sub-caches
    pub fn pending_changes(&self) -> usize {
        self.deltas.iter().map(|x| x.pending_changes()).sum()
    }

    pub fn is_detached(&self) -> bool {
        self.slot.is_none()
    }
}

/// A [`StateCacheDelta`] that can't be handed to [`StateCache::commit`]
pub struct DetachedStateCacheDelta(StateCacheDelta);

impl Deref for DetachedStateCacheDelta {
    type Target = StateCacheDelta;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DetachedStateCacheDelta {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Read-only snapshot of committed state
pub struct StateCacheView {
    height: Height,
    views: Vec<Box<dyn std::any::Any + Send + Sync>>,
}

impl StateCacheView {
    pub fn height(&self) -> Height {
        self.height
    }

    pub fn sub<C: SubCache>(&self) -> Result<&SubCacheView<C>, CacheError> {
        self.views
            .iter()
            .find_map(|x| x.downcast_ref::<SubCacheView<C>>())
            .ok_or(CacheError::SubCacheNotFound(C::NAME))
    }
}
