use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    Consumer, ConsumerInput, ConsumerResult, Height, TimeSupplier, ValidationResult,
    FAILURE_CHAIN_BLOCK_IN_FUTURE, FAILURE_CHAIN_DISCONTINUOUS_HEIGHTS, FAILURE_CHAIN_TOO_FAR_AHEAD,
    FAILURE_CHAIN_TOO_FAR_BEHIND, FAILURE_CHAIN_TOO_MANY_BLOCKS, FAILURE_CHAIN_UNLINKED,
};

/// Source of the height of the local committed chain
pub type ChainHeightSupplier = Arc<dyn Fn() -> Height + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockchainCheckOptions {
    /// Largest number of blocks accepted in one input
    pub max_chain_size: usize,

    /// How far (ms) a block timestamp may be ahead of network time
    pub max_future_time: u64,

    /// Deepest reorganization accepted, in blocks below the local chain tip
    pub max_rollback_blocks: u64,
}

impl Default for BlockchainCheckOptions {
    fn default() -> Self {
        Self {
            max_chain_size: 400,
            max_future_time: 10_000,
            max_rollback_blocks: 360,
        }
    }
}

fn check_input(
    input: &ConsumerInput,
    options: &BlockchainCheckOptions,
    local_height: Height,
    expected_tip: Height,
    now: u64,
) -> ConsumerResult {
    let elements = input.blocks();

    if elements.len() > options.max_chain_size {
        return ConsumerResult::abort(FAILURE_CHAIN_TOO_MANY_BLOCKS.into());
    }

    let first = elements[0].height();

    if first > expected_tip.next() {
        return ConsumerResult::abort_at(FAILURE_CHAIN_TOO_FAR_AHEAD.into(), 0);
    }

    // blocks at or below the rollback floor can never replace committed ones
    let floor = local_height.saturating_sub(options.max_rollback_blocks);
    if first <= floor || first == Height(0) {
        return ConsumerResult::abort_at(FAILURE_CHAIN_TOO_FAR_BEHIND.into(), 0);
    }

    for (idx, pair) in elements.windows(2).enumerate() {
        let (parent, child) = (&pair[0], &pair[1]);

        if child.height() != parent.height().next() {
            return ConsumerResult::abort_at(FAILURE_CHAIN_DISCONTINUOUS_HEIGHTS.into(), idx + 1);
        }

        if child.block.previous_block_hash != parent.entity_hash {
            return ConsumerResult::abort_at(FAILURE_CHAIN_UNLINKED.into(), idx + 1);
        }
    }

    let limit = now.saturating_add(options.max_future_time);
    if let Some(idx) = elements
        .iter()
        .position(|x| x.block.timestamp.get() > limit)
    {
        return ConsumerResult::abort_at(FAILURE_CHAIN_BLOCK_IN_FUTURE.into(), idx);
    }

    ConsumerResult::Continue
}

/// Checks that an input of blocks forms a chain attachable to the local one
///
/// Only structure is checked here: block count, contiguous heights, parent
/// hash links, timestamps and the rollback window. Whether the input actually
/// links to the stored chain is decided by the block state stage.
///
/// Inputs forwarded earlier may still be in flight, so an input may start
/// right above the last one this stage let through.
pub fn create_blockchain_check_consumer(
    options: BlockchainCheckOptions,
    chain_height: ChainHeightSupplier,
    time_supplier: TimeSupplier,
) -> Consumer {
    let mut forwarded = Height(0);

    Box::new(move |input: &mut ConsumerInput| {
        if !input.has_blocks() {
            return ConsumerResult::Continue;
        }

        let local = chain_height();
        let expected_tip = local.max(forwarded);

        let result = check_input(input, &options, local, expected_tip, time_supplier().get());

        // a shorter fork never lowers the tip of inputs still in flight
        if result == ConsumerResult::Continue {
            let blocks = input.blocks();
            forwarded = forwarded.max(blocks[blocks.len() - 1].height());
        }

        if let ConsumerResult::Abort {
            code: ValidationResult::Failure(code),
            element,
        } = result
        {
            debug!(%input, %code, ?element, "remote chain rejected");
        }

        result
    })
}
