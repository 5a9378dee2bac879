use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    Consumer, ConsumerInput, ConsumerResult, Hash256, TimeSupplier, Timestamp, ValidationResult,
};

/// Answers whether a transaction hash is already known to the node
pub type KnownHashPredicate = Arc<dyn Fn(Timestamp, &Hash256) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HashCheckOptions {
    /// How long (ms) a seen hash short-circuits repeated inputs
    pub cache_duration: u64,

    /// Minimum time (ms) between two prunings of the recency cache
    pub prune_interval: u64,

    /// Upper bound on remembered hashes; new hashes are not remembered past it
    pub max_cache_size: usize,
}

impl Default for HashCheckOptions {
    fn default() -> Self {
        Self {
            cache_duration: 60_000,
            prune_interval: 10_000,
            max_cache_size: 100_000,
        }
    }
}

/// Remembers recently seen hashes together with when they were first seen
struct RecencyCache {
    options: HashCheckOptions,
    seen: HashMap<Hash256, Timestamp>,
    last_prune: Timestamp,
}

impl RecencyCache {
    fn new(options: HashCheckOptions) -> Self {
        Self {
            options,
            seen: HashMap::new(),
            last_prune: Timestamp(0),
        }
    }

    fn is_fresh(&self, seen_at: Timestamp, now: Timestamp) -> bool {
        now.get().saturating_sub(seen_at.get()) < self.options.cache_duration
    }

    fn prune(&mut self, now: Timestamp) {
        if now.get().saturating_sub(self.last_prune.get()) < self.options.prune_interval {
            return;
        }

        let duration = self.options.cache_duration;
        self.seen
            .retain(|_, seen_at| now.get().saturating_sub(seen_at.get()) < duration);
        self.last_prune = now;
    }

    /// `true` if the hash was seen recently; remembers it otherwise
    fn check_and_update(&mut self, hash: &Hash256, now: Timestamp) -> bool {
        self.prune(now);

        if let Some(seen_at) = self.seen.get(hash) {
            if self.is_fresh(*seen_at, now) {
                return true;
            }
        }

        if self.seen.len() < self.options.max_cache_size || self.seen.contains_key(hash) {
            self.seen.insert(*hash, now);
        }

        false
    }
}

/// Drops block inputs whose blocks were all seen recently
pub fn create_block_hash_check_consumer(
    time_supplier: TimeSupplier,
    options: HashCheckOptions,
) -> Consumer {
    let mut recency = RecencyCache::new(options);

    Box::new(move |input: &mut ConsumerInput| {
        let now = time_supplier();

        let mut all_known = true;
        for element in input.blocks() {
            all_known &= recency.check_and_update(&element.entity_hash, now);
        }

        if all_known && input.has_blocks() {
            trace!(%input, "all blocks recently seen");
            return ConsumerResult::abort(ValidationResult::Neutral);
        }

        ConsumerResult::Continue
    })
}

/// Skips transactions that were seen recently or are already known
///
/// An input where every transaction is skipped is aborted neutrally.
pub fn create_transaction_hash_check_consumer(
    time_supplier: TimeSupplier,
    options: HashCheckOptions,
    known_hash_predicate: KnownHashPredicate,
) -> Consumer {
    let mut recency = RecencyCache::new(options);

    Box::new(move |input: &mut ConsumerInput| {
        let now = time_supplier();

        for element in input.transactions_mut() {
            if element.skip {
                continue;
            }

            let hash = element.entity_hash;

            element.skip = recency.check_and_update(&hash, now)
                || known_hash_predicate(element.transaction.deadline, &hash);
        }

        if input.transactions().iter().all(|x| x.skip) {
            trace!(%input, "all transactions already known");
            return ConsumerResult::abort(ValidationResult::Neutral);
        }

        ConsumerResult::Continue
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::{
        blake2b_256, Amount, EntityType, InputSource, Key, NetworkIdentifier, Signature,
        Transaction,
    };

    fn transactions_input(seeds: &[u8]) -> ConsumerInput {
        let range = seeds
            .iter()
            .map(|seed| Transaction {
                signer: Key([*seed; 32]),
                signature: Signature::default(),
                version: 1,
                network: NetworkIdentifier::TESTNET,
                entity_type: EntityType(1),
                max_fee: Amount(0),
                deadline: Timestamp(*seed as u64),
                payload: vec![],
            })
            .collect();

        let mut input = ConsumerInput::from_transactions(range, InputSource::Local);
        for (element, seed) in input.transactions_mut().iter_mut().zip(seeds) {
            element.entity_hash = blake2b_256(&[*seed]);
        }

        input
    }

    fn clock(now: Arc<AtomicU64>) -> TimeSupplier {
        Arc::new(move || Timestamp(now.load(Ordering::SeqCst)))
    }

    #[test]
    fn repeated_transactions_are_skipped() {
        let now = Arc::new(AtomicU64::new(1_000));
        let mut consumer = create_transaction_hash_check_consumer(
            clock(now.clone()),
            HashCheckOptions::default(),
            Arc::new(|_, _| false),
        );

        let mut first = transactions_input(&[1, 2]);
        assert_eq!(consumer(&mut first), ConsumerResult::Continue);
        assert!(first.transactions().iter().all(|x| !x.skip));

        let mut second = transactions_input(&[2, 3]);
        assert_eq!(consumer(&mut second), ConsumerResult::Continue);
        assert!(second.transactions()[0].skip);
        assert!(!second.transactions()[1].skip);

        let mut third = transactions_input(&[1, 3]);
        assert_eq!(
            consumer(&mut third),
            ConsumerResult::abort(ValidationResult::Neutral)
        );
    }

    #[test]
    fn known_hashes_are_skipped() {
        let known = blake2b_256(&[7]);
        let mut consumer = create_transaction_hash_check_consumer(
            clock(Arc::new(AtomicU64::new(0))),
            HashCheckOptions::default(),
            Arc::new(move |_, hash| *hash == known),
        );

        let mut input = transactions_input(&[7, 8]);
        assert_eq!(consumer(&mut input), ConsumerResult::Continue);
        assert!(input.transactions()[0].skip);
        assert!(!input.transactions()[1].skip);
    }

    #[test]
    fn stale_entries_are_forgotten() {
        let now = Arc::new(AtomicU64::new(0));
        let options = HashCheckOptions {
            cache_duration: 100,
            prune_interval: 10,
            max_cache_size: 10,
        };
        let mut consumer =
            create_transaction_hash_check_consumer(clock(now.clone()), options, Arc::new(|_, _| false));

        let mut input = transactions_input(&[1]);
        assert_eq!(consumer(&mut input), ConsumerResult::Continue);

        now.store(500, Ordering::SeqCst);

        let mut again = transactions_input(&[1]);
        assert_eq!(consumer(&mut again), ConsumerResult::Continue);
        assert!(!again.transactions()[0].skip);
    }

    #[test]
    fn recency_cache_respects_capacity() {
        let mut cache = RecencyCache::new(HashCheckOptions {
            cache_duration: 1_000,
            prune_interval: 1_000,
            max_cache_size: 1,
        });

        let a = blake2b_256(&[1]);
        let b = blake2b_256(&[2]);

        assert!(!cache.check_and_update(&a, Timestamp(1)));
        assert!(!cache.check_and_update(&b, Timestamp(2)));
        assert!(cache.check_and_update(&a, Timestamp(3)));
        assert!(!cache.check_and_update(&b, Timestamp(4)));
    }
}
