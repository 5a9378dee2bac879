//! Startup-time plugin registration.
//!
//! Plugins register into a mutable [`PluginManager`]; once every plugin is
//! in, [`PluginManager::freeze`] indexes the handlers per notification type
//! and yields the read-only [`PluginRegistry`] used by dispatch.

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools as _;
use thiserror::Error;
use tracing::debug;

use crate::{
    subcache::{ErasedStore, SubCacheStore},
    BlockChainConfiguration, CacheName, EntityType, NotificationPublisher, NotificationType,
    Observer, StateCache, StateCacheView, StatefulValidator, StatelessValidator, SubCache,
    TransactionPlugin, TransactionPlugins,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("sub-cache {0} is already registered")]
    DuplicateCache(CacheName),

    #[error("transaction type {0} is already registered")]
    DuplicateTransactionType(EntityType),

    #[error("diagnostic counter {0} is already registered")]
    DuplicateCounter(&'static str),
}

type CounterFn = dyn Fn(&StateCacheView) -> u64 + Send + Sync;

/// A named value computed from committed state for introspection
pub struct DiagnosticCounter {
    name: &'static str,
    read: Box<CounterFn>,
}

impl DiagnosticCounter {
    pub fn new<F>(name: &'static str, read: F) -> Self
    where
        F: Fn(&StateCacheView) -> u64 + Send + Sync + 'static,
    {
        Self {
            name,
            read: Box::new(read),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self, view: &StateCacheView) -> u64 {
        (self.read)(view)
    }
}

type StoreFactory = fn() -> Box<dyn ErasedStore>;

fn create_store<C: SubCache>() -> Box<dyn ErasedStore> {
    Box::new(SubCacheStore::<C>::new())
}

pub struct PluginManager {
    config: BlockChainConfiguration,
    caches: Vec<(CacheName, StoreFactory)>,
    transaction_plugins: TransactionPlugins,
    stateless: Vec<StatelessValidator>,
    stateful: Vec<StatefulValidator>,
    observers: Vec<Observer>,
    counters: Vec<DiagnosticCounter>,
}

impl PluginManager {
    pub fn new(config: BlockChainConfiguration) -> Self {
        Self {
            config,
            caches: Default::default(),
            transaction_plugins: Default::default(),
            stateless: Default::default(),
            stateful: Default::default(),
            observers: Default::default(),
            counters: Default::default(),
        }
    }

    pub fn config(&self) -> &BlockChainConfiguration {
        &self.config
    }

    pub fn add_cache<C: SubCache>(&mut self) -> Result<(), PluginError> {
        if self.caches.iter().any(|(name, _)| *name == C::NAME) {
            return Err(PluginError::DuplicateCache(C::NAME));
        }

        self.caches
            .push((C::NAME, create_store::<C> as StoreFactory));
        Ok(())
    }

    pub fn add_transaction_plugin(
        &mut self,
        plugin: impl TransactionPlugin + 'static,
    ) -> Result<(), PluginError> {
        let entity_type = plugin.entity_type();

        if self.transaction_plugins.contains_key(&entity_type) {
            return Err(PluginError::DuplicateTransactionType(entity_type));
        }

        self.transaction_plugins
            .insert(entity_type, Box::new(plugin));

        Ok(())
    }

    pub fn add_stateless_validator(&mut self, validator: StatelessValidator) {
        self.stateless.push(validator);
    }

    pub fn add_stateful_validator(&mut self, validator: StatefulValidator) {
        self.stateful.push(validator);
    }

    pub fn add_observer(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    pub fn add_diagnostic_counter(&mut self, counter: DiagnosticCounter) -> Result<(), PluginError> {
        if self.counters.iter().any(|x| x.name == counter.name) {
            return Err(PluginError::DuplicateCounter(counter.name));
        }

        self.counters.push(counter);
        Ok(())
    }

    /// Seals registration and indexes handlers by notification type
    pub fn freeze(self) -> PluginRegistry {
        fn index<T>(
            items: &[T],
            key: impl Fn(&T) -> NotificationType,
        ) -> HashMap<NotificationType, Vec<usize>> {
            let mut out: HashMap<_, Vec<_>> = HashMap::new();

            for (idx, item) in items.iter().enumerate() {
                out.entry(key(item)).or_default().push(idx);
            }

            out
        }

        let stateless_index = index(&self.stateless, StatelessValidator::notification_type);
        let stateful_index = index(&self.stateful, StatefulValidator::notification_type);
        let observer_index = index(&self.observers, Observer::notification_type);

        debug!(
            caches = self.caches.len(),
            transaction_plugins = self.transaction_plugins.len(),
            stateless = self.stateless.len(),
            stateful = self.stateful.len(),
            observers = self.observers.len(),
            "plugin registry frozen"
        );

        PluginRegistry {
            config: self.config,
            caches: self.caches,
            transaction_plugins: self.transaction_plugins,
            stateless: self.stateless,
            stateful: self.stateful,
            observers: self.observers,
            counters: self.counters,
            stateless_index,
            stateful_index,
            observer_index,
        }
    }
}

/// Immutable catalog of everything plugins registered
pub struct PluginRegistry {
    config: BlockChainConfiguration,
    caches: Vec<(CacheName, StoreFactory)>,
    transaction_plugins: TransactionPlugins,
    pub(crate) stateless: Vec<StatelessValidator>,
    pub(crate) stateful: Vec<StatefulValidator>,
    pub(crate) observers: Vec<Observer>,
    counters: Vec<DiagnosticCounter>,
    pub(crate) stateless_index: HashMap<NotificationType, Vec<usize>>,
    pub(crate) stateful_index: HashMap<NotificationType, Vec<usize>>,
    pub(crate) observer_index: HashMap<NotificationType, Vec<usize>>,
}

impl PluginRegistry {
    pub fn config(&self) -> &BlockChainConfiguration {
        &self.config
    }

    /// Creates an empty state cache holding every registered sub-cache
    pub fn create_cache(&self) -> StateCache {
        self.caches
            .iter()
            .fold(StateCache::builder(), |builder, (_, create)| {
                builder.with_store(create())
            })
            .build()
    }

    pub fn publisher(&self) -> NotificationPublisher<'_> {
        NotificationPublisher::new(&self.transaction_plugins)
    }

    pub fn transaction_plugin(&self, entity_type: EntityType) -> Option<&dyn TransactionPlugin> {
        self.transaction_plugins.get(&entity_type).map(|x| x.as_ref())
    }

    pub fn transaction_types(&self) -> BTreeSet<EntityType> {
        self.transaction_plugins.keys().copied().collect()
    }

    pub fn cache_names(&self) -> Vec<CacheName> {
        self.caches.iter().map(|(name, _)| *name).collect()
    }

    pub fn transaction_plugin_names(&self) -> Vec<&'static str> {
        self.transaction_plugins.values().map(|x| x.name()).collect()
    }

    /// Handler names in registration order; a handler registered for several
    /// notification types is listed once
    pub fn stateless_validator_names(&self) -> Vec<&'static str> {
        self.stateless.iter().map(|x| x.name()).unique().collect()
    }

    pub fn stateful_validator_names(&self) -> Vec<&'static str> {
        self.stateful.iter().map(|x| x.name()).unique().collect()
    }

    pub fn observer_names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|x| x.name()).unique().collect()
    }

    pub fn diagnostic_counter_names(&self) -> Vec<&'static str> {
        self.counters.iter().map(|x| x.name()).collect()
    }

    pub fn diagnostic_counters(&self, cache: &StateCache) -> Vec<(&'static str, u64)> {
        let view = cache.create_view();
        self.counters
            .iter()
            .map(|x| (x.name(), x.value(&view)))
            .collect()
    }
}
