use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, RwLock},
};

use tracing::debug;

use ledgerflow_core::{Hash256, Timestamp, TransactionInfo, ValidationResult};

/// Rejections remembered before the oldest ones are forgotten
pub const DEFAULT_REJECTION_CAPACITY: usize = 4_096;

struct PoolState {
    /// Arrival order
    order: VecDeque<Hash256>,
    pending: HashMap<Hash256, TransactionInfo>,
    rejected: HashMap<Hash256, ValidationResult>,
    /// Rejection order, oldest first
    rejected_order: VecDeque<Hash256>,
    rejection_capacity: usize,
}

impl PoolState {
    fn insert(&mut self, info: TransactionInfo) -> bool {
        if self.pending.contains_key(&info.entity_hash) {
            return false;
        }

        self.forget_rejection(&info.entity_hash);
        self.order.push_back(info.entity_hash);
        self.pending.insert(info.entity_hash, info);
        true
    }

    fn forget_rejection(&mut self, hash: &Hash256) {
        if self.rejected.remove(hash).is_some() {
            self.rejected_order.retain(|x| x != hash);
        }
    }

    fn remember_rejection(&mut self, hash: Hash256, result: ValidationResult) {
        if self.rejected.insert(hash, result).is_none() {
            self.rejected_order.push_back(hash);
        }

        while self.rejected_order.len() > self.rejection_capacity {
            if let Some(oldest) = self.rejected_order.pop_front() {
                self.rejected.remove(&oldest);
            }
        }
    }

    fn retain_pending<F>(&mut self, keep: F) -> usize
    where
        F: Fn(&TransactionInfo) -> bool,
    {
        let before = self.pending.len();
        self.pending.retain(|_, info| keep(info));

        let removed = before - self.pending.len();

        if removed > 0 {
            let pending = &self.pending;
            self.order.retain(|hash| pending.contains_key(hash));
        }

        removed
    }
}

/// Transactions accepted by the node but not yet included in a block
#[derive(Clone)]
pub struct UnconfirmedTransactions {
    state: Arc<RwLock<PoolState>>,
}

impl Default for UnconfirmedTransactions {
    fn default() -> Self {
        Self::with_rejection_capacity(DEFAULT_REJECTION_CAPACITY)
    }
}

impl UnconfirmedTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rejection_capacity(rejection_capacity: usize) -> Self {
        let state = PoolState {
            order: VecDeque::new(),
            pending: HashMap::new(),
            rejected: HashMap::new(),
            rejected_order: VecDeque::new(),
            rejection_capacity,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Adds transactions that passed speculative execution
    pub fn receive(&self, infos: Vec<TransactionInfo>) {
        let mut state = self.state.write().unwrap();

        let added = infos
            .into_iter()
            .map(|mut info| {
                info.height = None;
                state.insert(info)
            })
            .filter(|x| *x)
            .count();

        debug!(added, total = state.pending.len(), "unconfirmed transactions received");
    }

    /// Puts back transactions that left the chain in a reorganization
    pub fn revert(&self, infos: Vec<TransactionInfo>) {
        debug!(count = infos.len(), "reverted transactions back to pool");
        self.receive(infos);
    }

    /// Drops transactions included in newly committed blocks
    pub fn confirm(&self, hashes: &HashSet<Hash256>) {
        let mut state = self.state.write().unwrap();
        state.retain_pending(|info| !hashes.contains(&info.entity_hash));

        for hash in hashes {
            state.forget_rejection(hash);
        }
    }

    /// Drops pending transactions whose deadline is before `now`
    pub fn prune_expired(&self, now: Timestamp) -> usize {
        let mut state = self.state.write().unwrap();
        let pruned = state.retain_pending(|info| info.entity.deadline >= now);

        if pruned > 0 {
            debug!(pruned, %now, "expired unconfirmed transactions dropped");
        }

        pruned
    }

    pub fn reject(&self, hash: &Hash256, result: ValidationResult) {
        let mut state = self.state.write().unwrap();
        state.remember_rejection(*hash, result);
    }

    /// Why a transaction was last rejected, if it was
    pub fn rejection(&self, hash: &Hash256) -> Option<ValidationResult> {
        let state = self.state.read().unwrap();
        state.rejected.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        let state = self.state.read().unwrap();
        state.pending.contains_key(hash)
    }

    /// Oldest `count` transactions, in arrival order
    pub fn peek(&self, count: usize) -> Vec<TransactionInfo> {
        let state = self.state.read().unwrap();

        state
            .order
            .iter()
            .filter_map(|hash| state.pending.get(hash))
            .take(count)
            .cloned()
            .collect()
    }

    /// Every pending transaction, in arrival order
    pub fn transactions(&self) -> Vec<TransactionInfo> {
        self.peek(usize::MAX)
    }

    pub fn pending_total(&self) -> usize {
        let state = self.state.read().unwrap();
        state.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use ledgerflow_core::{Amount, EntityType, Key, NetworkIdentifier, Signature, Timestamp, Transaction};

    use super::*;

    fn info(seed: u8) -> TransactionInfo {
        info_until(seed, 10)
    }

    fn info_until(seed: u8, deadline: u64) -> TransactionInfo {
        TransactionInfo::from_transaction(Transaction {
            signer: Key([seed; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            entity_type: EntityType(0x4154),
            max_fee: Amount(seed as u64),
            deadline: Timestamp(deadline),
            payload: vec![],
        })
    }

    #[test]
    fn keeps_arrival_order_and_ignores_duplicates() {
        let pool = UnconfirmedTransactions::new();

        pool.receive(vec![info(3), info(1)]);
        pool.receive(vec![info(2), info(3)]);

        let peeked: Vec<_> = pool.peek(10).into_iter().map(|x| x.entity_hash).collect();
        assert_eq!(
            peeked,
            vec![info(3).entity_hash, info(1).entity_hash, info(2).entity_hash]
        );
        assert_eq!(pool.peek(1).len(), 1);
    }

    #[test]
    fn confirmed_transactions_leave_and_reverted_come_back() {
        let pool = UnconfirmedTransactions::new();
        pool.receive(vec![info(1), info(2)]);

        pool.confirm(&HashSet::from([info(1).entity_hash]));
        assert!(!pool.contains(&info(1).entity_hash));
        assert_eq!(pool.pending_total(), 1);

        let mut reverted = info(1);
        reverted.height = Some(ledgerflow_core::Height(4));
        pool.revert(vec![reverted]);

        assert!(pool.contains(&info(1).entity_hash));
        assert_eq!(pool.peek(10)[1].height, None);
    }

    #[test]
    fn rejections_are_remembered_until_accepted() {
        let pool = UnconfirmedTransactions::new();
        let hash = info(1).entity_hash;

        pool.reject(&hash, ValidationResult::Neutral);
        assert_eq!(pool.rejection(&hash), Some(ValidationResult::Neutral));

        pool.receive(vec![info(1)]);
        assert_eq!(pool.rejection(&hash), None);
    }

    #[test]
    fn oldest_rejections_are_forgotten_past_capacity() {
        let pool = UnconfirmedTransactions::with_rejection_capacity(2);

        for seed in 1..=3 {
            pool.reject(&info(seed).entity_hash, ValidationResult::Neutral);
        }

        assert_eq!(pool.rejection(&info(1).entity_hash), None);
        assert!(pool.rejection(&info(2).entity_hash).is_some());
        assert!(pool.rejection(&info(3).entity_hash).is_some());

        // rejecting again doesn't count twice
        pool.reject(&info(3).entity_hash, ValidationResult::Neutral);
        assert!(pool.rejection(&info(2).entity_hash).is_some());

        pool.confirm(&HashSet::from([info(2).entity_hash]));
        assert_eq!(pool.rejection(&info(2).entity_hash), None);
    }

    #[test]
    fn expired_transactions_are_pruned() {
        let pool = UnconfirmedTransactions::new();

        let late = info_until(2, 50);
        let late_hash = late.entity_hash;

        pool.receive(vec![info(1), late]);

        assert_eq!(pool.prune_expired(Timestamp(10)), 0);
        assert_eq!(pool.prune_expired(Timestamp(11)), 1);

        assert!(!pool.contains(&info(1).entity_hash));
        assert!(pool.contains(&late_hash));
        assert_eq!(pool.transactions().len(), 1);
    }
}
