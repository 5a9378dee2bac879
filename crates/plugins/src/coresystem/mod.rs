//! Caches, validators and observers every node registers.

use ledgerflow_core::{DiagnosticCounter, PluginError, PluginManager};

mod cache;
mod nemesis;
mod observers;
mod validators;

pub use cache::*;
pub use nemesis::*;
pub use observers::*;
pub use validators::*;

/// Registers the mandatory core system
pub fn register_core_system(manager: &mut PluginManager) -> Result<(), PluginError> {
    manager.add_cache::<AccountStateCache>()?;
    manager.add_cache::<BlockDifficultyCache>()?;

    manager.add_diagnostic_counter(DiagnosticCounter::new("ACNTST C", |view| {
        view.sub::<AccountStateCache>()
            .map(|x| x.len() as u64)
            .unwrap_or_default()
    }))?;

    manager.add_diagnostic_counter(DiagnosticCounter::new("BLKDIF C", |view| {
        view.sub::<BlockDifficultyCache>()
            .map(|x| x.len() as u64)
            .unwrap_or_default()
    }))?;

    manager.add_stateless_validator(create_max_transactions_validator());
    manager.add_stateless_validator(create_address_validator());
    manager.add_stateless_validator(create_network_validator());

    manager.add_stateful_validator(create_deadline_validator());
    manager.add_stateful_validator(create_nemesis_sink_validator());
    manager.add_stateful_validator(create_eligible_harvester_validator());
    manager.add_stateful_validator(create_balance_reserve_validator());
    manager.add_stateful_validator(create_balance_transfer_validator());

    manager.add_observer(create_account_address_observer());
    manager.add_observer(create_account_public_key_observer());

    for observer in create_balance_observer() {
        manager.add_observer(observer);
    }

    manager.add_observer(create_harvest_fee_observer());
    manager.add_observer(create_recalculate_importances_observer());
    manager.add_observer(create_block_difficulty_observer());
    manager.add_observer(create_block_difficulty_pruning_observer());

    Ok(())
}

#[cfg(test)]
mod tests {
    use ledgerflow_core::{
        AccountAddressNotification, AccountPublicKeyNotification, Address, Amount,
        AnyNotification, BalanceDebitNotification, BalanceTransferNotification,
        BlockChainConfiguration, BlockNotification, Difficulty, Height, Key, NetworkIdentifier,
        NotifyMode, Observer, ObserverContext, ObserverError, PluginRegistry,
        SignatureNotification, StateCacheDelta, StatefulContext, StatefulValidator,
        SubCacheRead, Timestamp, TransactionNotification, ValidationResult,
    };

    use super::*;

    const NETWORK: NetworkIdentifier = NetworkIdentifier::TESTNET;
    const NEMESIS: Key = Key([9; 32]);

    fn registry(config: BlockChainConfiguration) -> PluginRegistry {
        let mut manager = PluginManager::new(config);
        register_core_system(&mut manager).unwrap();
        manager.freeze()
    }

    fn config() -> BlockChainConfiguration {
        BlockChainConfiguration::new(NETWORK, NEMESIS)
    }

    fn address(seed: u8) -> Address {
        Address::from_public_key(&Key([seed; 32]), NETWORK)
    }

    fn notify(
        observer: &Observer,
        notification: &dyn AnyNotification,
        config: &BlockChainConfiguration,
        height: u64,
        mode: NotifyMode,
        delta: &mut StateCacheDelta,
    ) -> Result<(), ObserverError> {
        let mut context = ObserverContext {
            config,
            height: Height(height),
            block_time: Timestamp(height * 1000),
            mode,
            cache: delta,
        };

        observer.notify(notification, &mut context)
    }

    fn validate(
        validator: &StatefulValidator,
        notification: &dyn AnyNotification,
        config: &BlockChainConfiguration,
        height: u64,
        delta: &StateCacheDelta,
    ) -> ValidationResult {
        let context = StatefulContext {
            config,
            height: Height(height),
            block_time: Timestamp(height * 1000),
            cache: delta,
        };

        validator.validate(notification, &context)
    }

    fn fund(delta: &mut StateCacheDelta, seed: u8, balance: u64) {
        let mut account = AccountState::new(address(seed), Height(1));
        account.balance = Amount(balance);

        delta
            .sub_mut::<AccountStateCache>()
            .unwrap()
            .insert(address(seed), account);
    }

    fn balance(delta: &StateCacheDelta, seed: u8) -> Option<Amount> {
        delta
            .sub::<AccountStateCache>()
            .unwrap()
            .get(&address(seed))
            .map(|x| x.balance)
    }

    #[test]
    fn registers_core_system_handlers() {
        let registry = registry(config());

        assert_eq!(
            registry.cache_names(),
            vec!["AccountStateCache", "BlockDifficultyCache"]
        );
        assert_eq!(
            registry.diagnostic_counter_names(),
            vec!["ACNTST C", "BLKDIF C"]
        );
        assert!(registry.transaction_types().is_empty());
        assert_eq!(
            registry.stateless_validator_names(),
            vec![
                "MaxTransactionsValidator",
                "AddressValidator",
                "NetworkValidator"
            ]
        );
        assert_eq!(
            registry.stateful_validator_names(),
            vec![
                "DeadlineValidator",
                "NemesisSinkValidator",
                "EligibleHarvesterValidator",
                "BalanceReserveValidator",
                "BalanceTransferValidator"
            ]
        );
        assert_eq!(
            registry.observer_names(),
            vec![
                "AccountAddressObserver",
                "AccountPublicKeyObserver",
                "BalanceObserver",
                "HarvestFeeObserver",
                "RecalculateImportancesObserver",
                "BlockDifficultyObserver",
                "BlockDifficultyPruningObserver"
            ]
        );
    }

    #[test]
    fn registering_twice_fails() {
        let mut manager = PluginManager::new(config());
        register_core_system(&mut manager).unwrap();

        assert_eq!(
            register_core_system(&mut manager),
            Err(PluginError::DuplicateCache("AccountStateCache"))
        );
    }

    #[test]
    fn account_registration_unwinds_exactly() {
        let config = config();
        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        let by_key = create_account_public_key_observer();
        let by_address = create_account_address_observer();

        let key_ref = AccountPublicKeyNotification {
            public_key: Key([1; 32]),
        };
        let address_ref = AccountAddressNotification {
            address: address(2),
        };

        let steps: [(&Observer, &dyn AnyNotification); 3] = [
            (&by_key, &key_ref),
            (&by_address, &address_ref),
            (&by_address, &address_ref),
        ];

        for (observer, notification) in steps.iter() {
            notify(observer, *notification, &config, 3, NotifyMode::Commit, &mut delta).unwrap();
        }

        {
            let accounts = delta.sub::<AccountStateCache>().unwrap();
            assert_eq!(accounts.len(), 2);
            assert_eq!(
                accounts.get(&address(1)).unwrap().public_key,
                Some(Key([1; 32]))
            );
            assert_eq!(accounts.get(&address(2)).unwrap().public_key, None);
        }

        for (observer, notification) in steps.iter().rev() {
            notify(observer, *notification, &config, 3, NotifyMode::Rollback, &mut delta)
                .unwrap();
        }

        assert!(delta.sub::<AccountStateCache>().unwrap().is_empty());
    }

    #[test]
    fn transfer_rollback_restores_balances() {
        let config = config();
        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        fund(&mut delta, 1, 100);
        fund(&mut delta, 2, 0);

        let [debit_observer, transfer_observer] = create_balance_observer();

        let fee = BalanceDebitNotification {
            sender: Key([1; 32]),
            amount: Amount(5),
        };
        let transfer = BalanceTransferNotification {
            sender: Key([1; 32]),
            recipient: address(2),
            amount: Amount(40),
        };

        notify(&debit_observer, &fee, &config, 4, NotifyMode::Commit, &mut delta).unwrap();
        notify(&transfer_observer, &transfer, &config, 4, NotifyMode::Commit, &mut delta).unwrap();

        assert_eq!(balance(&delta, 1), Some(Amount(55)));
        assert_eq!(balance(&delta, 2), Some(Amount(40)));

        notify(&transfer_observer, &transfer, &config, 4, NotifyMode::Rollback, &mut delta)
            .unwrap();
        notify(&debit_observer, &fee, &config, 4, NotifyMode::Rollback, &mut delta).unwrap();

        assert_eq!(balance(&delta, 1), Some(Amount(100)));
        assert_eq!(balance(&delta, 2), Some(Amount(0)));
    }

    #[test]
    fn overdraft_is_reported_as_inconsistency() {
        let config = config();
        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        fund(&mut delta, 1, 3);

        let [debit_observer, _] = create_balance_observer();
        let fee = BalanceDebitNotification {
            sender: Key([1; 32]),
            amount: Amount(5),
        };

        let result = notify(&debit_observer, &fee, &config, 4, NotifyMode::Commit, &mut delta);

        assert!(matches!(result, Err(ObserverError::Inconsistent(_))));
        assert_eq!(balance(&delta, 1), Some(Amount(3)));
    }

    #[test]
    fn balance_validators_read_the_delta() {
        let config = config();
        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        fund(&mut delta, 1, 10);

        let reserve = create_balance_reserve_validator();
        let debit = |amount| BalanceDebitNotification {
            sender: Key([1; 32]),
            amount: Amount(amount),
        };

        assert_eq!(
            validate(&reserve, &debit(10), &config, 2, &delta),
            ValidationResult::Success
        );
        assert_eq!(
            validate(&reserve, &debit(11), &config, 2, &delta),
            ValidationResult::Failure(FAILURE_CORE_INSUFFICIENT_BALANCE)
        );

        let transfer = create_balance_transfer_validator();
        let unknown = BalanceTransferNotification {
            sender: Key([7; 32]),
            recipient: address(1),
            amount: Amount(1),
        };

        assert_eq!(
            validate(&transfer, &unknown, &config, 2, &delta),
            ValidationResult::Failure(FAILURE_CORE_INSUFFICIENT_BALANCE)
        );
    }

    #[test]
    fn deadline_must_fit_transaction_lifetime() {
        let config = config();
        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let delta = cache.create_delta().unwrap();

        let validator = create_deadline_validator();
        let transaction = |deadline| TransactionNotification {
            signer: Key([1; 32]),
            hash: ledgerflow_core::zero_hash(),
            entity_type: ledgerflow_core::EntityType(1),
            deadline: Timestamp(deadline),
        };

        // block time is 5000 at height 5
        let lifetime = config.max_transaction_lifetime;

        assert_eq!(
            validate(&validator, &transaction(4999), &config, 5, &delta),
            ValidationResult::Failure(FAILURE_CORE_PAST_DEADLINE)
        );
        assert_eq!(
            validate(&validator, &transaction(5000), &config, 5, &delta),
            ValidationResult::Success
        );
        assert_eq!(
            validate(&validator, &transaction(5000 + lifetime), &config, 5, &delta),
            ValidationResult::Success
        );
        assert_eq!(
            validate(&validator, &transaction(5001 + lifetime), &config, 5, &delta),
            ValidationResult::Failure(FAILURE_CORE_FUTURE_DEADLINE)
        );
    }

    #[test]
    fn nemesis_account_only_signs_nemesis_block() {
        let config = config();
        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let delta = cache.create_delta().unwrap();

        let validator = create_nemesis_sink_validator();
        let signed_by = |key| SignatureNotification {
            signer: key,
            signature: Default::default(),
            data_hash: ledgerflow_core::zero_hash(),
        };

        assert!(validate(&validator, &signed_by(NEMESIS), &config, 1, &delta).is_success());
        assert_eq!(
            validate(&validator, &signed_by(NEMESIS), &config, 2, &delta),
            ValidationResult::Failure(FAILURE_CORE_NEMESIS_ACCOUNT_SIGNED_AFTER_NEMESIS_BLOCK)
        );
        assert!(validate(&validator, &signed_by(Key([1; 32])), &config, 2, &delta).is_success());
    }

    fn block_notification(signer: u8, fee: u64) -> BlockNotification {
        BlockNotification {
            signer: Key([signer; 32]),
            timestamp: Timestamp(0),
            difficulty: Difficulty(100),
            total_fee: Amount(fee),
            num_transactions: 0,
        }
    }

    #[test]
    fn harvester_needs_minimum_balance() {
        let mut config = config();
        config.min_harvester_balance = Amount(50);

        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        fund(&mut delta, 1, 50);
        fund(&mut delta, 2, 49);

        let validator = create_eligible_harvester_validator();

        assert!(validate(&validator, &block_notification(1, 0), &config, 2, &delta).is_success());
        assert_eq!(
            validate(&validator, &block_notification(2, 0), &config, 2, &delta),
            ValidationResult::Failure(FAILURE_CORE_BLOCK_HARVESTER_INELIGIBLE)
        );
    }

    #[test]
    fn harvester_collects_fees() {
        let config = config();
        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        fund(&mut delta, 1, 10);

        let observer = create_harvest_fee_observer();
        let block = block_notification(1, 7);

        notify(&observer, &block, &config, 2, NotifyMode::Commit, &mut delta).unwrap();
        assert_eq!(balance(&delta, 1), Some(Amount(17)));

        notify(&observer, &block, &config, 2, NotifyMode::Rollback, &mut delta).unwrap();
        assert_eq!(balance(&delta, 1), Some(Amount(10)));
    }

    #[test]
    fn importances_follow_grouping() {
        let mut config = config();
        config.importance_grouping = 4;

        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        fund(&mut delta, 1, 30);

        let observer = create_recalculate_importances_observer();
        let block = block_notification(1, 0);

        let importance = |delta: &StateCacheDelta| {
            let accounts = delta.sub::<AccountStateCache>().unwrap();
            accounts.get(&address(1)).unwrap().importance().get()
        };

        notify(&observer, &block, &config, 3, NotifyMode::Commit, &mut delta).unwrap();
        assert_eq!(importance(&delta), 0);

        notify(&observer, &block, &config, 4, NotifyMode::Commit, &mut delta).unwrap();
        assert_eq!(importance(&delta), 30);

        notify(&observer, &block, &config, 4, NotifyMode::Rollback, &mut delta).unwrap();
        assert_eq!(importance(&delta), 0);
    }

    #[test]
    fn difficulty_pruning_keeps_rollback_window() {
        let mut config = config();
        config.block_pruning_interval = 10;
        config.max_rollback_blocks = 5;
        config.max_difficulty_blocks = 3;

        let registry = registry(config.clone());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        let tracking = create_block_difficulty_observer();
        let pruning = create_block_difficulty_pruning_observer();
        let block = block_notification(1, 0);

        for height in 1..=20 {
            notify(&tracking, &block, &config, height, NotifyMode::Commit, &mut delta).unwrap();
            notify(&pruning, &block, &config, height, NotifyMode::Commit, &mut delta).unwrap();
        }

        let heights: Vec<_> = delta
            .sub::<BlockDifficultyCache>()
            .unwrap()
            .iter()
            .map(|(height, _)| height.get())
            .collect();

        assert_eq!(heights, (12..=20).collect::<Vec<_>>());

        // pruning never runs backwards
        notify(&pruning, &block, &config, 20, NotifyMode::Rollback, &mut delta).unwrap();
        notify(&tracking, &block, &config, 20, NotifyMode::Rollback, &mut delta).unwrap();

        assert_eq!(delta.sub::<BlockDifficultyCache>().unwrap().len(), 8);
    }

    #[test]
    fn counters_track_cache_sizes() {
        let registry = registry(config());
        let cache = registry.create_cache();
        let mut delta = cache.create_delta().unwrap();

        fund(&mut delta, 1, 1);
        fund(&mut delta, 2, 1);
        cache.commit(delta, Height(1));

        assert_eq!(
            registry.diagnostic_counters(&cache),
            vec![("ACNTST C", 2), ("BLKDIF C", 0)]
        );
    }
}
