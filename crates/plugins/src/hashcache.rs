//! Hash history of confirmed transactions.
//!
//! Every confirmed transaction leaves its `(deadline, hash)` pair in the
//! [`HashCache`] until its deadline falls out of the retention window, so
//! replays of a transaction are rejected for as long as it could be valid.

use ledgerflow_core::{
    check, BlockNotification, DiagnosticCounter, FailureCode, Hash256, Observer, PluginError,
    PluginManager, StatefulValidator, SubCache, SubCacheRead, Timestamp, TransactionNotification,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const HASH_FACILITY: &str = "Hash";

pub const FAILURE_HASH_EXISTS: FailureCode = FailureCode::new(HASH_FACILITY, 0x0001, "Exists");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampedHash {
    pub time: Timestamp,
    pub hash: Hash256,
}

impl TimestampedHash {
    pub fn new(time: Timestamp, hash: Hash256) -> Self {
        Self { time, hash }
    }
}

/// Confirmed transaction hashes ordered by deadline
pub struct HashCache;

impl SubCache for HashCache {
    const NAME: &'static str = "HashCache";

    type Key = TimestampedHash;
    type Value = ();
}

/// True when `hash` was confirmed with exactly `time` as deadline
pub fn hash_cache_contains<R>(cache: &R, time: Timestamp, hash: &Hash256) -> bool
where
    R: SubCacheRead<HashCache>,
{
    cache.contains(&TimestampedHash::new(time, *hash))
}

pub fn create_unique_transaction_hash_validator() -> StatefulValidator {
    StatefulValidator::new(
        "UniqueTransactionHashValidator",
        |n: &TransactionNotification, context| {
            let seen = context
                .cache
                .sub::<HashCache>()
                .map(|x| hash_cache_contains(x, n.deadline, &n.hash))
                .unwrap_or_default();

            check(!seen, FAILURE_HASH_EXISTS)
        },
    )
}

pub fn create_transaction_hash_observer() -> Observer {
    Observer::new(
        "TransactionHashObserver",
        |n: &TransactionNotification, context| {
            let rollback = context.is_rollback();
            let hashes = context.cache.sub_mut::<HashCache>()?;
            let key = TimestampedHash::new(n.deadline, n.hash);

            match rollback {
                false => hashes.insert(key, ()),
                true => {
                    hashes.remove(&key);
                }
            }

            Ok(())
        },
    )
}

/// Drops hashes whose deadline is older than the retention window
///
/// Runs in commit mode only, every `block_pruning_interval` blocks.
pub fn create_transaction_hash_pruning_observer() -> Observer {
    Observer::new(
        "TransactionHashPruningObserver",
        |_: &BlockNotification, context| {
            let config = context.config;
            let height = context.height;

            if context.is_rollback()
                || config.block_pruning_interval == 0
                || height.get() % config.block_pruning_interval != 0
            {
                return Ok(());
            }

            let cutoff = Timestamp(
                context
                    .block_time
                    .get()
                    .saturating_sub(config.hash_retention),
            );

            let hashes = context.cache.sub_mut::<HashCache>()?;
            let expired: Vec<_> = hashes
                .range(..TimestampedHash::new(cutoff, ledgerflow_core::zero_hash()))
                .map(|(key, _)| *key)
                .collect();

            for key in expired.iter() {
                hashes.remove(key);
            }

            debug!(%height, %cutoff, pruned = expired.len(), "transaction hashes pruned");

            Ok(())
        },
    )
}

pub fn register_hash_cache_system(manager: &mut PluginManager) -> Result<(), PluginError> {
    manager.add_cache::<HashCache>()?;

    manager.add_diagnostic_counter(DiagnosticCounter::new("HASH C", |view| {
        view.sub::<HashCache>()
            .map(|x| x.len() as u64)
            .unwrap_or_default()
    }))?;

    manager.add_stateful_validator(create_unique_transaction_hash_validator());
    manager.add_observer(create_transaction_hash_observer());
    manager.add_observer(create_transaction_hash_pruning_observer());

    Ok(())
}
