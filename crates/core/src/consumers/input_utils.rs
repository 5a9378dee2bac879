use std::collections::HashSet;

use crate::{Block, BlockElement, Hash256, TransactionElement, TransactionInfo, WeakEntityInfo};

/// Unique hashes of every transaction contained in the blocks
pub fn extract_transaction_hashes(elements: &[BlockElement]) -> HashSet<Hash256> {
    elements
        .iter()
        .flat_map(|x| x.transaction_hashes.iter().copied())
        .collect()
}

/// Unique entity hashes of the blocks themselves
pub fn extract_block_hashes(elements: &[BlockElement]) -> HashSet<Hash256> {
    elements.iter().map(|x| x.entity_hash).collect()
}

pub fn extract_blocks(elements: &[BlockElement]) -> Vec<&Block> {
    elements.iter().map(|x| x.block.as_ref()).collect()
}

/// Infos for the non-skipped transactions, plus the element index of each
pub fn extract_entity_infos(
    elements: &[TransactionElement],
) -> (Vec<WeakEntityInfo<'_>>, Vec<usize>) {
    elements
        .iter()
        .enumerate()
        .filter(|(_, x)| !x.skip)
        .map(|(idx, x)| (WeakEntityInfo::transaction(&x.transaction, x.entity_hash), idx))
        .unzip()
}

/// Infos for a block's transactions in order, followed by the block itself
pub fn extract_block_entity_infos(element: &BlockElement) -> Vec<WeakEntityInfo<'_>> {
    let block = element.block.as_ref();

    element
        .transactions()
        .map(|(tx, hash)| WeakEntityInfo::block_transaction(tx, *hash, block))
        .chain(std::iter::once(WeakEntityInfo::block(
            block,
            element.entity_hash,
        )))
        .collect()
}

/// Transaction infos of `infos` whose hash is not in `hashes`, in order
///
/// Used after a reorganization to find the transactions that were confirmed
/// by the undone blocks but are not part of the new chain.
pub fn collect_reverted_transaction_infos(
    hashes: &HashSet<Hash256>,
    infos: &[TransactionInfo],
) -> Vec<TransactionInfo> {
    infos
        .iter()
        .filter(|x| !hashes.contains(&x.entity_hash))
        .cloned()
        .collect()
}
