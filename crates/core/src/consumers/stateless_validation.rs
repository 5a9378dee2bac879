use std::sync::Arc;

use tracing::debug;

use crate::{
    extract_block_entity_infos, extract_entity_infos, BatchPolicy, Consumer, ConsumerInput,
    ConsumerResult, FailedTransactionSink, PluginRegistry, ValidationResult,
};

fn validate_blocks(registry: &PluginRegistry, input: &ConsumerInput) -> ConsumerResult {
    for (idx, element) in input.blocks().iter().enumerate() {
        let infos = extract_block_entity_infos(element);

        let failure = registry
            .validate_entities_stateless(&infos)
            .into_iter()
            .find(ValidationResult::is_failure);

        if let Some(code) = failure {
            debug!(%input, block = idx, %code, "block failed stateless validation");
            return ConsumerResult::abort_at(code, idx);
        }
    }

    ConsumerResult::Continue
}

/// Runs the registered stateless validators over every entity of an input
///
/// Entities are validated in parallel. Any failing block rejects the input;
/// failing transactions are handled according to the batch policy.
pub fn create_stateless_validation_consumer(
    registry: Arc<PluginRegistry>,
    policy: BatchPolicy,
    failed: FailedTransactionSink,
) -> Consumer {
    Box::new(move |input: &mut ConsumerInput| {
        if input.has_blocks() {
            return validate_blocks(&registry, input);
        }

        let (results, indexes) = {
            let (infos, indexes) = extract_entity_infos(input.transactions());
            (registry.validate_entities_stateless(&infos), indexes)
        };

        let mut first_failure = None;

        for (result, idx) in results.into_iter().zip(indexes) {
            if !result.is_failure() {
                continue;
            }

            match policy {
                BatchPolicy::AllOrNothing => {
                    debug!(%input, transaction = idx, code = %result, "batch rejected");
                    return ConsumerResult::abort_at(result, idx);
                }
                BatchPolicy::SkipFailed => {
                    let element = &mut input.transactions_mut()[idx];
                    element.skip = true;
                    failed(&element.entity_hash, result);
                    first_failure.get_or_insert(result);
                }
            }
        }

        if input.transactions().iter().all(|x| x.skip) {
            return ConsumerResult::abort(first_failure.unwrap_or(ValidationResult::Neutral));
        }

        ConsumerResult::Continue
    })
}
