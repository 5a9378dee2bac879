//! Composition of the plugin registry, state cache, block storage and the
//! block and transaction pipelines into a running node.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{info, instrument};

use ledgerflow_core::{
    block_element_of, create_batch_signature_consumer, create_block_hash_check_consumer,
    create_block_state_change_consumer, create_blockchain_check_consumer,
    create_hash_calculator_consumer, create_stateless_validation_consumer,
    create_transaction_hash_check_consumer, create_transaction_state_change_consumer,
    observe_block, AcceptAllVerifier, AcceptedTransactionsSink, BatchPolicy, Block,
    BlockRange, BlockStateHandlers, BlockStorage, BlockchainCheckOptions, CacheError,
    ChainHeightSupplier, Consumer, ConsumerCompletionResult, ConsumerDispatcher,
    ConsumerDispatcherOptions, ConsumerInput, DispatcherError, Entity, FailedTransactionSink,
    Hash256, Height, InputSource, KnownHashPredicate, MemoryBlockStorage, NotifyMode,
    ObserverError, PendingTransactionsSupplier, PluginError, PluginManager, PluginRegistry, SignatureVerifier, StateCache,
    StorageError, TimeSupplier, Timestamp, Transaction, TransactionInfo, TransactionRange,
    ValidationResult,
};
use ledgerflow_plugins::{
    coresystem::{load_nemesis_block, NemesisError},
    hashcache::{hash_cache_contains, HashCache},
    register_all,
};

use crate::{config::NodeConfig, pool::UnconfirmedTransactions};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("plugin registration failed: {0}")]
    Plugin(#[from] PluginError),

    #[error("can't load nemesis block: {0}")]
    Nemesis(#[from] NemesisError),

    #[error("stored chain starts with a different nemesis block")]
    NemesisMismatch,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("can't restore block {0}: {1}")]
    Restore(Height, ObserverError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Milliseconds since the unix epoch
pub fn system_time() -> TimeSupplier {
    Arc::new(|| {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Timestamp(elapsed.as_millis() as u64)
    })
}

/// Collaborators a node is built with
#[derive(Clone)]
pub struct NodeServices {
    pub storage: Arc<dyn BlockStorage>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub time_supplier: TimeSupplier,
}

impl Default for NodeServices {
    fn default() -> Self {
        Self {
            storage: Arc::new(MemoryBlockStorage::new()),
            verifier: Arc::new(AcceptAllVerifier),
            time_supplier: system_time(),
        }
    }
}

/// Brings the state cache in line with the stored chain
///
/// An empty storage is seeded with the nemesis block. Otherwise the stored
/// nemesis block must match and every stored block is observed again.
#[instrument(skip_all)]
fn restore_state(
    registry: &PluginRegistry,
    cache: &StateCache,
    storage: &dyn BlockStorage,
    nemesis: Block,
) -> Result<(), NodeError> {
    let nemesis = block_element_of(nemesis);

    if storage.chain_height() == Height(0) {
        load_nemesis_block(registry, cache, &nemesis)?;
        storage.save_blocks(std::slice::from_ref(nemesis.block.as_ref()))?;
        return Ok(());
    }

    if storage.load_block(Height(1))?.hash() != nemesis.entity_hash {
        return Err(NodeError::NemesisMismatch);
    }

    load_nemesis_block(registry, cache, &nemesis)?;

    let tip = storage.chain_height();

    for height in 2..=tip.get() {
        let element = block_element_of(storage.load_block(Height(height))?);
        let mut delta = cache.create_delta()?;

        if let Err(err) = observe_block(registry, &element, NotifyMode::Commit, &mut delta) {
            cache.rollback(delta);
            return Err(NodeError::Restore(element.height(), err));
        }

        cache.commit(delta, element.height());
    }

    info!(%tip, "state restored from storage");

    Ok(())
}

fn ignore_failures() -> FailedTransactionSink {
    Arc::new(|_: &Hash256, _: ValidationResult| {})
}

pub struct Node {
    registry: Arc<PluginRegistry>,
    cache: StateCache,
    storage: Arc<dyn BlockStorage>,
    unconfirmed: UnconfirmedTransactions,
    blocks: ConsumerDispatcher,
    transactions: ConsumerDispatcher,
}

impl Node {
    /// Registers every plugin, restores state and starts both pipelines
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: &NodeConfig,
        nemesis: Block,
        services: NodeServices,
    ) -> Result<Self, NodeError> {
        let mut manager = PluginManager::new(config.network.clone());
        register_all(&mut manager)?;
        let registry = Arc::new(manager.freeze());

        let cache = registry.create_cache();
        restore_state(&registry, &cache, services.storage.as_ref(), nemesis)?;

        let unconfirmed = UnconfirmedTransactions::new();

        let blocks = Self::start_block_pipeline(config, &registry, &cache, &services, &unconfirmed);
        let transactions =
            Self::start_transaction_pipeline(config, &registry, &cache, &services, &unconfirmed);

        info!(
            height = %cache.height(),
            caches = registry.cache_names().len(),
            "node started"
        );

        Ok(Self {
            registry,
            cache,
            storage: services.storage,
            unconfirmed,
            blocks,
            transactions,
        })
    }

    fn start_block_pipeline(
        config: &NodeConfig,
        registry: &Arc<PluginRegistry>,
        cache: &StateCache,
        services: &NodeServices,
        unconfirmed: &UnconfirmedTransactions,
    ) -> ConsumerDispatcher {
        let chain_height: ChainHeightSupplier = {
            let storage = services.storage.clone();
            Arc::new(move || storage.chain_height())
        };

        let check_options = BlockchainCheckOptions {
            max_rollback_blocks: config.network.max_rollback_blocks,
            ..config.pipeline.blockchain_check
        };

        let reverted = unconfirmed.clone();
        let confirmed = unconfirmed.clone();

        let handlers = BlockStateHandlers {
            reverted: Arc::new(move |infos: Vec<TransactionInfo>| reverted.revert(infos)),
            confirmed: Arc::new(move |hashes: &HashSet<Hash256>| confirmed.confirm(hashes)),
        };

        let consumers: Vec<Consumer> = vec![
            create_hash_calculator_consumer(),
            create_block_hash_check_consumer(
                services.time_supplier.clone(),
                config.pipeline.hash_check,
            ),
            create_blockchain_check_consumer(
                check_options,
                chain_height,
                services.time_supplier.clone(),
            ),
            create_batch_signature_consumer(
                services.verifier.clone(),
                BatchPolicy::AllOrNothing,
                ignore_failures(),
            ),
            create_stateless_validation_consumer(
                registry.clone(),
                BatchPolicy::AllOrNothing,
                ignore_failures(),
            ),
            create_block_state_change_consumer(
                registry.clone(),
                cache.clone(),
                services.storage.clone(),
                handlers,
            ),
        ];

        ConsumerDispatcher::new(
            ConsumerDispatcherOptions::new("block dispatcher", config.pipeline.block_capacity),
            consumers,
        )
    }

    fn start_transaction_pipeline(
        config: &NodeConfig,
        registry: &Arc<PluginRegistry>,
        cache: &StateCache,
        services: &NodeServices,
        unconfirmed: &UnconfirmedTransactions,
    ) -> ConsumerDispatcher {
        let policy = config.pipeline.batch_policy;

        let known: KnownHashPredicate = {
            let cache = cache.clone();
            let unconfirmed = unconfirmed.clone();

            Arc::new(move |deadline: Timestamp, hash: &Hash256| {
                unconfirmed.contains(hash)
                    || cache
                        .create_view()
                        .sub::<HashCache>()
                        .map(|x| hash_cache_contains(x, deadline, hash))
                        .unwrap_or_default()
            })
        };

        let failed: FailedTransactionSink = {
            let unconfirmed = unconfirmed.clone();
            Arc::new(move |hash: &Hash256, result: ValidationResult| {
                unconfirmed.reject(hash, result)
            })
        };

        let pending: PendingTransactionsSupplier = {
            let unconfirmed = unconfirmed.clone();
            let time_supplier = services.time_supplier.clone();

            Arc::new(move || {
                unconfirmed.prune_expired(time_supplier());
                unconfirmed.transactions()
            })
        };

        let accepted: AcceptedTransactionsSink = {
            let unconfirmed = unconfirmed.clone();
            Arc::new(move |infos: Vec<TransactionInfo>| unconfirmed.receive(infos))
        };

        let consumers: Vec<Consumer> = vec![
            create_hash_calculator_consumer(),
            create_transaction_hash_check_consumer(
                services.time_supplier.clone(),
                config.pipeline.hash_check,
                known,
            ),
            create_batch_signature_consumer(services.verifier.clone(), policy, failed.clone()),
            create_stateless_validation_consumer(registry.clone(), policy, failed.clone()),
            create_transaction_state_change_consumer(
                registry.clone(),
                cache.clone(),
                policy,
                services.time_supplier.clone(),
                pending,
                accepted,
                failed,
            ),
        ];

        ConsumerDispatcher::new(
            ConsumerDispatcherOptions::new(
                "transaction dispatcher",
                config.pipeline.transaction_capacity,
            ),
            consumers,
        )
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn storage(&self) -> &Arc<dyn BlockStorage> {
        &self.storage
    }

    pub fn unconfirmed(&self) -> &UnconfirmedTransactions {
        &self.unconfirmed
    }

    pub fn block_pipeline(&self) -> &ConsumerDispatcher {
        &self.blocks
    }

    pub fn transaction_pipeline(&self) -> &ConsumerDispatcher {
        &self.transactions
    }

    /// Height of the committed state
    pub fn height(&self) -> Height {
        self.cache.height()
    }

    /// Runs blocks through the block pipeline and waits for the outcome
    pub async fn push_blocks(
        &self,
        blocks: Vec<Block>,
        source: InputSource,
    ) -> Result<ConsumerCompletionResult, DispatcherError> {
        let input = ConsumerInput::from_blocks(BlockRange::new(blocks), source);
        self.blocks.submit(input).await
    }

    /// Runs transactions through the transaction pipeline and waits for the outcome
    pub async fn push_transactions(
        &self,
        transactions: Vec<Transaction>,
        source: InputSource,
    ) -> Result<ConsumerCompletionResult, DispatcherError> {
        let input = ConsumerInput::from_transactions(TransactionRange::new(transactions), source);
        self.transactions.submit(input).await
    }

    pub fn shutdown(&self) {
        self.blocks.shutdown();
        self.transactions.shutdown();
    }
}
