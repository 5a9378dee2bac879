use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::{Block, Height};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("block {0} not found")]
    BlockNotFound(Height),

    #[error("block {given} does not extend chain at height {expected}")]
    NotContiguous { expected: Height, given: Height },

    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Committed block storage collaborator
pub trait BlockStorage: Send + Sync + 'static {
    /// Height of the last committed block
    fn chain_height(&self) -> Height;

    fn load_block(&self, height: Height) -> Result<Block, StorageError>;

    /// Appends blocks that must directly extend the current chain
    fn save_blocks(&self, blocks: &[Block]) -> Result<(), StorageError>;

    /// Drops every block above `height`
    fn drop_blocks_after(&self, height: Height) -> Result<(), StorageError>;
}

/// In-memory block storage, index `i` holds height `i + 1`
#[derive(Clone, Default)]
pub struct MemoryBlockStorage {
    blocks: Arc<RwLock<Vec<Block>>>,
}

impl MemoryBlockStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStorage for MemoryBlockStorage {
    fn chain_height(&self) -> Height {
        Height(self.blocks.read().unwrap().len() as u64)
    }

    fn load_block(&self, height: Height) -> Result<Block, StorageError> {
        let blocks = self.blocks.read().unwrap();

        height
            .get()
            .checked_sub(1)
            .and_then(|idx| blocks.get(idx as usize))
            .cloned()
            .ok_or(StorageError::BlockNotFound(height))
    }

    fn save_blocks(&self, new_blocks: &[Block]) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write().unwrap();

        // nothing is appended unless the whole range fits
        for (offset, block) in new_blocks.iter().enumerate() {
            let expected = Height((blocks.len() + offset) as u64 + 1);

            if block.height != expected {
                return Err(StorageError::NotContiguous {
                    expected,
                    given: block.height,
                });
            }
        }

        blocks.extend_from_slice(new_blocks);

        debug!(height = blocks.len(), saved = new_blocks.len(), "blocks saved");

        Ok(())
    }

    fn drop_blocks_after(&self, height: Height) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write().unwrap();
        blocks.truncate(height.get() as usize);

        debug!(%height, "blocks dropped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{zero_hash, Difficulty, Key, NetworkIdentifier, Signature, Timestamp};

    fn block(height: u64) -> Block {
        Block {
            signer: Key([1; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            height: Height(height),
            timestamp: Timestamp(height * 1000),
            difficulty: Difficulty(1),
            previous_block_hash: zero_hash(),
            transactions: vec![],
        }
    }

    #[test]
    fn blocks_must_be_contiguous() {
        let storage = MemoryBlockStorage::new();
        storage.save_blocks(&[block(1), block(2)]).unwrap();

        assert_eq!(
            storage.save_blocks(&[block(4)]),
            Err(StorageError::NotContiguous {
                expected: Height(3),
                given: Height(4)
            })
        );
        assert_eq!(storage.chain_height(), Height(2));
    }

    #[test]
    fn rejected_range_is_not_partially_saved() {
        let storage = MemoryBlockStorage::new();
        storage.save_blocks(&[block(1)]).unwrap();

        assert_eq!(
            storage.save_blocks(&[block(2), block(3), block(5)]),
            Err(StorageError::NotContiguous {
                expected: Height(4),
                given: Height(5)
            })
        );
        assert_eq!(storage.chain_height(), Height(1));
        assert_eq!(
            storage.load_block(Height(2)),
            Err(StorageError::BlockNotFound(Height(2)))
        );
    }

    #[test]
    fn dropping_truncates_above_height() {
        let storage = MemoryBlockStorage::new();
        storage
            .save_blocks(&[block(1), block(2), block(3)])
            .unwrap();

        storage.drop_blocks_after(Height(1)).unwrap();

        assert_eq!(storage.chain_height(), Height(1));
        assert_eq!(storage.load_block(Height(1)).unwrap().height, Height(1));
        assert_eq!(
            storage.load_block(Height(2)),
            Err(StorageError::BlockNotFound(Height(2)))
        );
        assert_eq!(
            storage.load_block(Height(0)),
            Err(StorageError::BlockNotFound(Height(0)))
        );
    }
}
