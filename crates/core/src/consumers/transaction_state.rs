use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    BatchPolicy, Consumer, ConsumerInput, ConsumerResult, DetachedStateCacheDelta,
    FailedTransactionSink, NotifyMode, ObserverContext, PendingTransactionsSupplier,
    PluginRegistry, StateCache,
    StateCacheDelta, TimeSupplier, Timestamp, TransactionInfo, ValidationResult, WeakEntityInfo,
    FAILURE_STATE_INCONSISTENT,
};

/// Receives the transactions that passed speculative execution
pub type AcceptedTransactionsSink = Arc<dyn Fn(Vec<TransactionInfo>) + Send + Sync>;

struct TransactionStateChange {
    registry: Arc<PluginRegistry>,
    cache: StateCache,
    policy: BatchPolicy,
    time_supplier: TimeSupplier,
    pending: PendingTransactionsSupplier,
    accepted: AcceptedTransactionsSink,
    failed: FailedTransactionSink,
}

impl TransactionStateChange {
    fn execute(
        &self,
        info: &WeakEntityInfo<'_>,
        delta: &mut StateCacheDelta,
        block_time: Timestamp,
    ) -> ValidationResult {
        let mut context = ObserverContext {
            config: self.registry.config(),
            height: self.cache.height().next(),
            block_time,
            mode: NotifyMode::Commit,
            cache: delta,
        };

        self.registry
            .process_entity(info, &mut context)
            .unwrap_or_else(|err| {
                debug!(hash = %info.hash(), %err, "transaction not observable");
                ValidationResult::Failure(FAILURE_STATE_INCONSISTENT)
            })
    }

    /// Fresh delta holding the effects of `transactions`
    ///
    /// Transactions that no longer apply are removed from the list and the
    /// delta is rebuilt without them.
    fn replay(
        &self,
        transactions: &mut Vec<TransactionInfo>,
        block_time: Timestamp,
    ) -> DetachedStateCacheDelta {
        loop {
            let mut delta = self.cache.create_detached_delta();

            let failed = transactions.iter().position(|info| {
                let info = WeakEntityInfo::transaction(&info.entity, info.entity_hash);
                self.execute(&info, &mut delta, block_time).is_failure()
            });

            match failed {
                Some(idx) => {
                    let info = transactions.remove(idx);
                    debug!(hash = %info.entity_hash, "pending transaction no longer applies");
                }
                None => return delta,
            }
        }
    }

    #[instrument(skip_all, fields(input = %input))]
    fn process(&self, input: &mut ConsumerInput) -> ConsumerResult {
        let block_time = (self.time_supplier)();

        let mut pending = (self.pending)();
        let mut delta = self.replay(&mut pending, block_time);

        let mut accepted = vec![];
        let mut first_failure = None;

        for idx in 0..input.transactions().len() {
            let element = &input.transactions()[idx];
            if element.skip {
                continue;
            }

            let info = WeakEntityInfo::transaction(&element.transaction, element.entity_hash);
            let result = self.execute(&info, &mut delta, block_time);

            if !result.is_failure() {
                accepted.push(TransactionInfo::new(
                    element.transaction.clone(),
                    element.entity_hash,
                ));
                continue;
            }

            match self.policy {
                BatchPolicy::AllOrNothing => {
                    debug!(transaction = idx, code = %result, "batch rejected");
                    return ConsumerResult::abort_at(result, idx);
                }
                BatchPolicy::SkipFailed => {
                    // drop whatever the failed transaction applied before failing
                    let mut applied: Vec<_> =
                        pending.iter().chain(accepted.iter()).cloned().collect();
                    delta = self.replay(&mut applied, block_time);

                    let element = &mut input.transactions_mut()[idx];
                    element.skip = true;
                    (self.failed)(&element.entity_hash, result);
                    first_failure.get_or_insert(result);
                }
            }
        }

        if accepted.is_empty() {
            return ConsumerResult::abort(first_failure.unwrap_or(ValidationResult::Neutral));
        }

        debug!(accepted = accepted.len(), "transactions accepted");
        (self.accepted)(accepted);

        ConsumerResult::Continue
    }
}

/// Executes transactions speculatively on top of the committed state
///
/// The pending transactions are replayed first into a detached delta, then
/// the input's transactions are validated and observed one after the other
/// on top of it, as if they were all included in the next block. The delta
/// is always discarded; transactions that pass are handed to the accepted
/// sink.
pub fn create_transaction_state_change_consumer(
    registry: Arc<PluginRegistry>,
    cache: StateCache,
    policy: BatchPolicy,
    time_supplier: TimeSupplier,
    pending: PendingTransactionsSupplier,
    accepted: AcceptedTransactionsSink,
    failed: FailedTransactionSink,
) -> Consumer {
    let stage = TransactionStateChange {
        registry,
        cache,
        policy,
        time_supplier,
        pending,
        accepted,
        failed,
    };

    Box::new(move |input: &mut ConsumerInput| {
        if !input.has_transactions() {
            return ConsumerResult::Continue;
        }

        stage.process(input)
    })
}
