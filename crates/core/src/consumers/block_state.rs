use std::{collections::HashSet, sync::Arc};

use tracing::{debug, error, info, instrument, warn};

use crate::{
    collect_reverted_transaction_infos, extract_block_entity_infos, extract_blocks,
    extract_transaction_hashes, Block, BlockElement, BlockStorage, Consumer, ConsumerInput,
    ConsumerResult, Difficulty, Entity, Hash256, Height, NotifyMode, ObserverContext,
    ObserverError, PluginRegistry, StateCache, StateCacheDelta, TransactionInfo, ValidationResult, FAILURE_CACHE_BUSY, FAILURE_CHAIN_SCORE_NOT_BETTER,
    FAILURE_CHAIN_TOO_FAR_AHEAD, FAILURE_CHAIN_TOO_FAR_BEHIND, FAILURE_CHAIN_UNLINKED,
    FAILURE_STATE_INCONSISTENT, FAILURE_STORAGE,
};

/// Receives transactions that left the chain during a reorganization
pub type RevertedTransactionsHandler = Arc<dyn Fn(Vec<TransactionInfo>) + Send + Sync>;

/// Receives the hashes of transactions confirmed by newly committed blocks
pub type ConfirmedTransactionsHandler = Arc<dyn Fn(&HashSet<Hash256>) + Send + Sync>;

#[derive(Clone)]
pub struct BlockStateHandlers {
    pub reverted: RevertedTransactionsHandler,
    pub confirmed: ConfirmedTransactionsHandler,
}

impl Default for BlockStateHandlers {
    fn default() -> Self {
        Self {
            reverted: Arc::new(|_: Vec<TransactionInfo>| {}),
            confirmed: Arc::new(|_: &HashSet<Hash256>| {}),
        }
    }
}

/// Wraps a stored block into an element with its hashes filled in
pub fn block_element_of(block: Block) -> BlockElement {
    let mut element = BlockElement::new(block);
    element.entity_hash = element.block.hash();
    element.transaction_hashes = element.block.transactions.iter().map(|x| x.hash()).collect();
    element
}

/// Runs observers for every entity of a block
///
/// Commit mode visits the block's transactions in order and then the block;
/// rollback mode visits the block first and then its transactions last to
/// first.
pub fn observe_block(
    registry: &PluginRegistry,
    element: &BlockElement,
    mode: NotifyMode,
    delta: &mut StateCacheDelta,
) -> Result<(), ObserverError> {
    let infos = extract_block_entity_infos(element);

    let ordered: Box<dyn Iterator<Item = _>> = match mode {
        NotifyMode::Commit => Box::new(infos.iter()),
        NotifyMode::Rollback => Box::new(infos.iter().rev()),
    };

    let mut context = ObserverContext {
        config: registry.config(),
        height: element.height(),
        block_time: element.block.timestamp,
        mode,
        cache: delta,
    };

    for info in ordered {
        registry.observe_entity(info, &mut context)?;
    }

    Ok(())
}

/// Validates and observes each entity of a block in turn
///
/// Every notification is validated against the state left by the ones
/// before it, so transactions inside one block can depend on each other.
pub fn execute_block(
    registry: &PluginRegistry,
    element: &BlockElement,
    delta: &mut StateCacheDelta,
) -> ValidationResult {
    let height = element.height();

    let mut context = ObserverContext {
        config: registry.config(),
        height,
        block_time: element.block.timestamp,
        mode: NotifyMode::Commit,
        cache: delta,
    };

    for info in extract_block_entity_infos(element) {
        match registry.process_entity(&info, &mut context) {
            Ok(ValidationResult::Failure(code)) => return ValidationResult::Failure(code),
            Ok(_) => (),
            Err(err) => {
                error!(%height, hash = %info.hash(), %err, "observer failed");
                return ValidationResult::Failure(FAILURE_STATE_INCONSISTENT);
            }
        }
    }

    ValidationResult::Success
}

fn chain_score<'a>(blocks: impl Iterator<Item = &'a Block>) -> u128 {
    blocks
        .map(|x| x.difficulty)
        .map(Difficulty::get)
        .map(u128::from)
        .sum()
}

struct BlockStateChange {
    registry: Arc<PluginRegistry>,
    cache: StateCache,
    storage: Arc<dyn BlockStorage>,
    handlers: BlockStateHandlers,
}

impl BlockStateChange {
    fn load_blocks(&self, from: Height, to: Height) -> Result<Vec<BlockElement>, ConsumerResult> {
        (from.get()..=to.get())
            .map(|height| {
                self.storage
                    .load_block(Height(height))
                    .map(block_element_of)
                    .map_err(|err| {
                        error!(%err, "can't load committed block");
                        ConsumerResult::abort(FAILURE_STORAGE.into())
                    })
            })
            .collect()
    }

    /// Checks that the input attaches to the stored chain
    ///
    /// Returns the committed blocks the input would replace.
    fn attach(&self, input: &ConsumerInput) -> Result<Vec<BlockElement>, ConsumerResult> {
        let elements = input.blocks();
        let first = elements[0].height();
        let local = self.storage.chain_height();

        if first > local.next() {
            return Err(ConsumerResult::abort_at(FAILURE_CHAIN_TOO_FAR_AHEAD.into(), 0));
        }

        let undone_count = local.get() + 1 - first.get();
        if first <= Height(1) || undone_count > self.registry.config().max_rollback_blocks {
            return Err(ConsumerResult::abort_at(FAILURE_CHAIN_TOO_FAR_BEHIND.into(), 0));
        }

        let parent = self
            .storage
            .load_block(Height(first.get() - 1))
            .map_err(|err| {
                error!(%err, "can't load parent block");
                ConsumerResult::abort(FAILURE_STORAGE.into())
            })?;

        if elements[0].block.previous_block_hash != parent.hash() {
            return Err(ConsumerResult::abort_at(FAILURE_CHAIN_UNLINKED.into(), 0));
        }

        if undone_count == 0 {
            return Ok(vec![]);
        }

        let undone = self.load_blocks(first, local)?;

        let local_score = chain_score(undone.iter().map(|x| x.block.as_ref()));
        let remote_score = chain_score(extract_blocks(elements).into_iter());

        if remote_score <= local_score {
            debug!(local_score, remote_score, "remote chain not better");
            return Err(ConsumerResult::abort(FAILURE_CHAIN_SCORE_NOT_BETTER.into()));
        }

        Ok(undone)
    }

    fn reverted_infos(undone: &[BlockElement]) -> Vec<TransactionInfo> {
        undone
            .iter()
            .flat_map(|element| {
                element.transactions().map(|(tx, hash)| TransactionInfo {
                    entity: Arc::new(tx.clone()),
                    entity_hash: *hash,
                    height: Some(element.height()),
                })
            })
            .collect()
    }

    /// Puts the committed chain back after a failed save above `fork`
    fn restore_storage(&self, fork: Height, undone: &[BlockElement]) {
        let blocks: Vec<Block> = extract_blocks(undone).into_iter().cloned().collect();

        let restored = self
            .storage
            .drop_blocks_after(Height(fork.get() - 1))
            .and_then(|_| self.storage.save_blocks(&blocks));

        match restored {
            Ok(()) => debug!(%fork, blocks = blocks.len(), "committed blocks restored"),
            Err(err) => error!(%fork, %err, "can't restore committed blocks"),
        }
    }

    #[instrument(skip_all, fields(input = %input))]
    fn process(&self, input: &ConsumerInput) -> ConsumerResult {
        let undone = match self.attach(input) {
            Ok(x) => x,
            Err(result) => return result,
        };

        let Ok(mut delta) = self.cache.create_delta() else {
            warn!("state cache delta already open");
            return ConsumerResult::abort(FAILURE_CACHE_BUSY.into());
        };

        for element in undone.iter().rev() {
            if let Err(err) = observe_block(&self.registry, element, NotifyMode::Rollback, &mut delta)
            {
                error!(height = %element.height(), %err, "can't undo committed block");
                return ConsumerResult::abort(FAILURE_STATE_INCONSISTENT.into());
            }
        }

        for (idx, element) in input.blocks().iter().enumerate() {
            let result = execute_block(&self.registry, element, &mut delta);

            if let ValidationResult::Failure(code) = result {
                debug!(height = %element.height(), %code, "block rejected");
                return ConsumerResult::abort_at(result, idx);
            }
        }

        let elements = input.blocks();
        let first = elements[0].height();
        let last = elements[elements.len() - 1].height();
        let blocks: Vec<Block> = extract_blocks(elements).into_iter().cloned().collect();

        let saved = self
            .storage
            .drop_blocks_after(Height(first.get() - 1))
            .and_then(|_| self.storage.save_blocks(&blocks));

        if let Err(err) = saved {
            error!(%err, "can't save blocks");
            self.restore_storage(first, &undone);
            return ConsumerResult::abort(FAILURE_STORAGE.into());
        }

        self.cache.commit(delta, last);

        let confirmed = extract_transaction_hashes(elements);

        if !undone.is_empty() {
            let reverted =
                collect_reverted_transaction_infos(&confirmed, &Self::reverted_infos(&undone));

            info!(
                undone = undone.len(),
                reverted = reverted.len(),
                "chain reorganized"
            );

            if !reverted.is_empty() {
                (self.handlers.reverted)(reverted);
            }
        }

        (self.handlers.confirmed)(&confirmed);

        info!(%last, blocks = elements.len(), "chain extended");

        ConsumerResult::Continue
    }
}

/// Applies block inputs to the state cache and block storage
///
/// Blocks replacing part of the committed chain are only accepted if their
/// chain score is better; the replaced blocks are undone first. The whole
/// input is applied in one delta that is committed only if every block
/// passes stateful validation.
pub fn create_block_state_change_consumer(
    registry: Arc<PluginRegistry>,
    cache: StateCache,
    storage: Arc<dyn BlockStorage>,
    handlers: BlockStateHandlers,
) -> Consumer {
    let stage = BlockStateChange {
        registry,
        cache,
        storage,
        handlers,
    };

    Box::new(move |input: &mut ConsumerInput| {
        if !input.has_blocks() {
            return ConsumerResult::Continue;
        }

        stage.process(input)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;
    use crate::{
        create_hash_calculator_consumer, subcache::tests::NumbersCache, Amount,
        BlockChainConfiguration, EntityType, InputSource, Key, MemoryBlockStorage,
        NetworkIdentifier, Notifications, Observer, PayloadError, PluginManager, Signature,
        StatefulValidator, StorageError, SubCacheRead, Timestamp, Transaction, TransactionNotification,
        TransactionPlugin, BlockNotification, FailureCode,
    };

    const FAILURE_EXPIRED: FailureCode = FailureCode::new("Test", 1, "Expired");

    struct PlainPlugin;

    impl TransactionPlugin for PlainPlugin {
        fn entity_type(&self) -> EntityType {
            EntityType(1)
        }

        fn name(&self) -> &'static str {
            "Plain"
        }

        fn publish(&self, _: &Transaction, _: &mut Notifications) -> Result<(), PayloadError> {
            Ok(())
        }
    }

    /// Records block heights and transaction deadlines in the numbers cache
    fn registry() -> Arc<PluginRegistry> {
        let mut manager = PluginManager::new(BlockChainConfiguration::new(
            NetworkIdentifier::TESTNET,
            Key([0; 32]),
        ));

        manager.add_cache::<NumbersCache>().unwrap();
        manager.add_transaction_plugin(PlainPlugin).unwrap();

        manager.add_stateful_validator(StatefulValidator::new::<TransactionNotification, _>(
            "DeadlineValidator",
            |n, context| crate::check(n.deadline >= context.block_time, FAILURE_EXPIRED),
        ));

        manager.add_observer(Observer::new::<TransactionNotification, _>(
            "DeadlineObserver",
            |n, context| {
                let commit = context.is_commit();
                let key = 1000 + n.deadline.get() as u32;
                let numbers = context.cache.sub_mut::<NumbersCache>()?;

                if commit {
                    numbers.insert(key, n.hash.to_string());
                } else {
                    numbers.remove(&key);
                }

                Ok(())
            },
        ));

        manager.add_observer(Observer::new::<BlockNotification, _>(
            "HeightObserver",
            |n, context| {
                let commit = context.is_commit();
                let height = context.height.get() as u32;
                let numbers = context.cache.sub_mut::<NumbersCache>()?;

                if commit {
                    numbers.insert(height, n.difficulty.to_string());
                } else {
                    numbers.remove(&height);
                }

                Ok(())
            },
        ));

        Arc::new(manager.freeze())
    }

    fn transaction(deadline: u64) -> Transaction {
        Transaction {
            signer: Key([1; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            entity_type: EntityType(1),
            max_fee: Amount(0),
            deadline: Timestamp(deadline),
            payload: vec![],
        }
    }

    fn block(parent: &Block, difficulty: u64, deadlines: &[u64]) -> Block {
        Block {
            signer: Key([2; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            height: parent.height.next(),
            timestamp: Timestamp(parent.timestamp.get() + 10),
            difficulty: Difficulty(difficulty),
            previous_block_hash: parent.hash(),
            transactions: deadlines.iter().map(|x| transaction(*x)).collect(),
        }
    }

    fn nemesis() -> Block {
        Block {
            signer: Key([0; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            height: Height(1),
            timestamp: Timestamp(0),
            difficulty: Difficulty(1),
            previous_block_hash: crate::zero_hash(),
            transactions: vec![],
        }
    }

    fn input(blocks: Vec<Block>) -> ConsumerInput {
        let mut input =
            ConsumerInput::from_blocks(blocks.into_iter().collect(), InputSource::RemotePull);
        create_hash_calculator_consumer()(&mut input);
        input
    }

    struct Fixture {
        cache: StateCache,
        storage: MemoryBlockStorage,
        reverted: Arc<Mutex<Vec<TransactionInfo>>>,
        confirmed: Arc<Mutex<usize>>,
        consumer: Consumer,
    }

    /// Fails the next `failures` saves before touching the wrapped storage
    struct FailingStorage {
        inner: MemoryBlockStorage,
        failures: Arc<AtomicUsize>,
    }

    impl BlockStorage for FailingStorage {
        fn chain_height(&self) -> Height {
            self.inner.chain_height()
        }

        fn load_block(&self, height: Height) -> Result<Block, StorageError> {
            self.inner.load_block(height)
        }

        fn save_blocks(&self, blocks: &[Block]) -> Result<(), StorageError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| x.checked_sub(1))
                .is_ok();

            if failing {
                return Err(StorageError::Internal("disk full".into()));
            }

            self.inner.save_blocks(blocks)
        }

        fn drop_blocks_after(&self, height: Height) -> Result<(), StorageError> {
            self.inner.drop_blocks_after(height)
        }
    }

    fn fixture() -> Fixture {
        fixture_over(|storage| Arc::new(storage))
    }

    fn fixture_over(wrap: impl FnOnce(MemoryBlockStorage) -> Arc<dyn BlockStorage>) -> Fixture {
        let registry = registry();
        let cache = registry.create_cache();
        let storage = MemoryBlockStorage::new();
        storage.save_blocks(&[nemesis()]).unwrap();

        let reverted = Arc::new(Mutex::new(vec![]));
        let confirmed = Arc::new(Mutex::new(0));

        let handlers = BlockStateHandlers {
            reverted: {
                let reverted = reverted.clone();
                Arc::new(move |infos: Vec<TransactionInfo>| reverted.lock().unwrap().extend(infos))
            },
            confirmed: {
                let confirmed = confirmed.clone();
                Arc::new(move |hashes: &HashSet<Hash256>| {
                    *confirmed.lock().unwrap() += hashes.len()
                })
            },
        };

        let consumer =
            create_block_state_change_consumer(registry, cache.clone(), wrap(storage.clone()), handlers);

        Fixture {
            cache,
            storage,
            reverted,
            confirmed,
            consumer,
        }
    }

    fn numbers(cache: &StateCache) -> Vec<u32> {
        let view = cache.create_view();
        view.sub::<NumbersCache>()
            .unwrap()
            .iter()
            .map(|(k, _)| *k)
            .collect()
    }

    #[test]
    fn extends_chain_and_commits_state() {
        let mut fx = fixture();

        let b2 = block(&nemesis(), 1, &[100, 101]);
        let b3 = block(&b2, 1, &[102]);

        let mut batch = input(vec![b2, b3.clone()]);
        assert_eq!((fx.consumer)(&mut batch), ConsumerResult::Continue);

        assert_eq!(fx.storage.chain_height(), Height(3));
        assert_eq!(fx.storage.load_block(Height(3)).unwrap(), b3);
        assert_eq!(fx.cache.height(), Height(3));
        assert_eq!(numbers(&fx.cache), vec![2, 3, 1100, 1101, 1102]);
        assert_eq!(*fx.confirmed.lock().unwrap(), 3);
        assert!(fx.reverted.lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_unlinked_input() {
        let mut fx = fixture();

        let mut orphan = block(&nemesis(), 1, &[]);
        orphan.previous_block_hash = crate::zero_hash();

        let mut batch = input(vec![orphan]);
        assert_eq!(
            (fx.consumer)(&mut batch),
            ConsumerResult::abort_at(FAILURE_CHAIN_UNLINKED.into(), 0)
        );
        assert_eq!(fx.storage.chain_height(), Height(1));
    }

    #[test]
    fn failing_block_leaves_no_trace() {
        let mut fx = fixture();

        let b2 = block(&nemesis(), 1, &[100]);
        let b3 = block(&b2, 1, &[200, 1]);

        let mut batch = input(vec![b2, b3]);
        assert_eq!(
            (fx.consumer)(&mut batch),
            ConsumerResult::abort_at(FAILURE_EXPIRED.into(), 1)
        );

        assert_eq!(fx.storage.chain_height(), Height(1));
        assert_eq!(fx.cache.height(), Height(0));
        assert!(numbers(&fx.cache).is_empty());

        // the delta was released with the failed input
        assert!(fx.cache.create_delta().is_ok());
    }

    #[test]
    fn better_fork_replaces_committed_blocks() {
        let mut fx = fixture();

        let b2 = block(&nemesis(), 1, &[100]);
        let b3 = block(&b2, 1, &[101, 102]);
        let mut batch = input(vec![b2.clone(), b3.clone()]);
        assert_eq!((fx.consumer)(&mut batch), ConsumerResult::Continue);

        let fork = block(&b2, 5, &[102, 103]);

        let mut batch = input(vec![fork.clone()]);
        assert_eq!((fx.consumer)(&mut batch), ConsumerResult::Continue);

        assert_eq!(fx.storage.chain_height(), Height(3));
        assert_eq!(fx.storage.load_block(Height(3)).unwrap(), fork);
        assert_eq!(fx.cache.height(), Height(3));
        assert_eq!(numbers(&fx.cache), vec![2, 3, 1100, 1102, 1103]);

        let reverted = fx.reverted.lock().unwrap();
        assert_eq!(reverted.len(), 1);
        assert_eq!(reverted[0].entity.deadline, Timestamp(101));
        assert_eq!(reverted[0].height, Some(Height(3)));
    }

    #[test]
    fn failed_save_restores_replaced_blocks() {
        let failures = Arc::new(AtomicUsize::new(0));

        let mut fx = fixture_over({
            let failures = failures.clone();
            move |inner| Arc::new(FailingStorage { inner, failures })
        });

        let b2 = block(&nemesis(), 1, &[100]);
        let b3 = block(&b2, 1, &[101]);
        let mut batch = input(vec![b2.clone(), b3.clone()]);
        assert_eq!((fx.consumer)(&mut batch), ConsumerResult::Continue);

        failures.store(1, Ordering::SeqCst);

        let fork = block(&b2, 5, &[102]);
        let mut batch = input(vec![fork]);
        assert_eq!(
            (fx.consumer)(&mut batch),
            ConsumerResult::abort(FAILURE_STORAGE.into())
        );

        assert_eq!(fx.storage.chain_height(), Height(3));
        assert_eq!(fx.storage.load_block(Height(3)).unwrap(), b3);
        assert_eq!(fx.cache.height(), Height(3));
        assert_eq!(numbers(&fx.cache), vec![2, 3, 1100, 1101]);
        assert!(fx.reverted.lock().unwrap().is_empty());
        assert!(fx.cache.create_delta().is_ok());
    }

    #[test]
    fn weaker_fork_is_rejected() {
        let mut fx = fixture();

        let b2 = block(&nemesis(), 3, &[100]);
        let mut batch = input(vec![b2]);
        assert_eq!((fx.consumer)(&mut batch), ConsumerResult::Continue);

        let fork = block(&nemesis(), 3, &[101]);
        let mut batch = input(vec![fork]);
        assert_eq!(
            (fx.consumer)(&mut batch),
            ConsumerResult::abort(FAILURE_CHAIN_SCORE_NOT_BETTER.into())
        );
        assert_eq!(numbers(&fx.cache), vec![2, 1100]);
    }

    #[test]
    fn busy_cache_rejects_input() {
        let mut fx = fixture();
        let _held = fx.cache.create_delta().unwrap();

        let mut batch = input(vec![block(&nemesis(), 1, &[])]);
        assert_eq!(
            (fx.consumer)(&mut batch),
            ConsumerResult::abort(FAILURE_CACHE_BUSY.into())
        );
    }

    #[test]
    fn undoing_a_block_restores_prior_state() {
        let registry = registry();
        let cache = registry.create_cache();

        let element = block_element_of(block(&nemesis(), 1, &[100, 101]));

        let mut delta = cache.create_delta().unwrap();
        assert!(execute_block(&registry, &element, &mut delta).is_success());
        cache.commit(delta, Height(2));
        assert_eq!(numbers(&cache), vec![2, 1100, 1101]);

        let mut delta = cache.create_delta().unwrap();
        observe_block(&registry, &element, NotifyMode::Rollback, &mut delta).unwrap();
        cache.commit(delta, Height(1));

        assert!(numbers(&cache).is_empty());
    }
}
