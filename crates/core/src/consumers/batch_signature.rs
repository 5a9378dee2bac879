use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::{
    BatchPolicy, BlockElement, Consumer, ConsumerInput, ConsumerResult, FailedTransactionSink,
    SignatureVerifier, ValidationResult, FAILURE_SIGNATURE_NOT_VERIFIABLE,
};

fn verify_block(verifier: &dyn SignatureVerifier, element: &BlockElement) -> bool {
    let block = &element.block;

    verifier.verify(&block.signer, &block.signature, &element.entity_hash)
        && element
            .transactions()
            .all(|(tx, hash)| verifier.verify(&tx.signer, &tx.signature, hash))
}

/// Verifies every signature of an input in parallel
///
/// A block input is rejected at the first block carrying a bad signature.
/// Transactions follow the batch policy: either the whole input is rejected
/// or the offending transactions are skipped and reported.
pub fn create_batch_signature_consumer(
    verifier: Arc<dyn SignatureVerifier>,
    policy: BatchPolicy,
    failed: FailedTransactionSink,
) -> Consumer {
    let failure = ValidationResult::Failure(FAILURE_SIGNATURE_NOT_VERIFIABLE);

    Box::new(move |input: &mut ConsumerInput| {
        if input.has_blocks() {
            let verified: Vec<bool> = input
                .blocks()
                .par_iter()
                .map(|element| verify_block(verifier.as_ref(), element))
                .collect();

            return match verified.iter().position(|ok| !ok) {
                Some(idx) => {
                    debug!(%input, block = idx, "block signature not verifiable");
                    ConsumerResult::abort_at(failure, idx)
                }
                None => ConsumerResult::Continue,
            };
        }

        let verified: Vec<bool> = input
            .transactions()
            .par_iter()
            .map(|element| {
                element.skip || {
                    let tx = &element.transaction;
                    verifier.verify(&tx.signer, &tx.signature, &element.entity_hash)
                }
            })
            .collect();

        for (idx, ok) in verified.into_iter().enumerate() {
            if ok {
                continue;
            }

            match policy {
                BatchPolicy::AllOrNothing => return ConsumerResult::abort_at(failure, idx),
                BatchPolicy::SkipFailed => {
                    let element = &mut input.transactions_mut()[idx];
                    element.skip = true;
                    failed(&element.entity_hash, failure);
                }
            }
        }

        if input.transactions().iter().all(|x| x.skip) {
            return ConsumerResult::abort(failure);
        }

        ConsumerResult::Continue
    })
}
