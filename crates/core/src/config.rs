use serde::{Deserialize, Serialize};

use crate::{Amount, BlockDuration, Key, NetworkIdentifier};

/// Network-wide settings shared by every plugin and consumer
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlockChainConfiguration {
    pub network: NetworkIdentifier,

    /// Signer of the nemesis block; may not sign anything afterwards
    pub nemesis_public_key: Key,

    #[serde(default = "defaults::max_transactions_per_block")]
    pub max_transactions_per_block: u32,

    /// Maximum distance (ms) between block time and a transaction deadline
    #[serde(default = "defaults::max_transaction_lifetime")]
    pub max_transaction_lifetime: u64,

    #[serde(default = "defaults::min_harvester_balance")]
    pub min_harvester_balance: Amount,

    /// Importances are recalculated every `importance_grouping` blocks
    #[serde(default = "defaults::importance_grouping")]
    pub importance_grouping: u64,

    /// Number of block difficulty infos retained for difficulty calculation
    #[serde(default = "defaults::max_difficulty_blocks")]
    pub max_difficulty_blocks: u64,

    /// Pruning observers run every `block_pruning_interval` blocks
    #[serde(default = "defaults::block_pruning_interval")]
    pub block_pruning_interval: u64,

    /// How long (ms) transaction hashes stay in the hash cache past their deadline
    #[serde(default = "defaults::hash_retention")]
    pub hash_retention: u64,

    /// Deepest chain reorganization the node accepts
    #[serde(default = "defaults::max_rollback_blocks")]
    pub max_rollback_blocks: u64,

    #[serde(default = "defaults::max_secret_lock_duration")]
    pub max_secret_lock_duration: BlockDuration,

    /// Largest message a transfer may carry, in bytes
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,
}

mod defaults {
    use crate::{Amount, BlockDuration};

    pub fn max_transactions_per_block() -> u32 {
        200_000
    }

    pub fn max_transaction_lifetime() -> u64 {
        24 * 60 * 60 * 1000
    }

    pub fn min_harvester_balance() -> Amount {
        Amount(1_000)
    }

    pub fn importance_grouping() -> u64 {
        359
    }

    pub fn max_difficulty_blocks() -> u64 {
        60
    }

    pub fn block_pruning_interval() -> u64 {
        360
    }

    pub fn hash_retention() -> u64 {
        2 * 60 * 60 * 1000
    }

    pub fn max_rollback_blocks() -> u64 {
        360
    }

    pub fn max_secret_lock_duration() -> BlockDuration {
        BlockDuration(30 * 24 * 60 * 4)
    }

    pub fn max_message_size() -> usize {
        1024
    }
}

impl BlockChainConfiguration {
    pub fn new(network: NetworkIdentifier, nemesis_public_key: Key) -> Self {
        Self {
            network,
            nemesis_public_key,
            max_transactions_per_block: defaults::max_transactions_per_block(),
            max_transaction_lifetime: defaults::max_transaction_lifetime(),
            min_harvester_balance: defaults::min_harvester_balance(),
            importance_grouping: defaults::importance_grouping(),
            max_difficulty_blocks: defaults::max_difficulty_blocks(),
            block_pruning_interval: defaults::block_pruning_interval(),
            hash_retention: defaults::hash_retention(),
            max_rollback_blocks: defaults::max_rollback_blocks(),
            max_secret_lock_duration: defaults::max_secret_lock_duration(),
            max_message_size: defaults::max_message_size(),
        }
    }
}
