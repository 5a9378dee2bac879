//! Stock consumer stages for the block and transaction pipelines.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{FailureCode, Hash256, Timestamp, TransactionInfo, ValidationResult};

mod batch_signature;
mod block_state;
mod blockchain_check;
mod hash_calculator;
mod hash_check;
mod input_utils;
mod stateless_validation;
mod transaction_state;

pub use batch_signature::*;
pub use block_state::*;
pub use blockchain_check::*;
pub use hash_calculator::*;
pub use hash_check::*;
pub use input_utils::*;
pub use stateless_validation::*;
pub use transaction_state::*;

pub const CONSUMER_FACILITY: &str = "Consumer";

macro_rules! consumer_failure {
    ($name:ident, $code:expr, $label:expr) => {
        pub const $name: FailureCode = FailureCode::new(CONSUMER_FACILITY, $code, $label);
    };
}

consumer_failure!(FAILURE_CHAIN_TOO_MANY_BLOCKS, 0x01, "Remote_Chain_Too_Many_Blocks");
consumer_failure!(FAILURE_CHAIN_DISCONTINUOUS_HEIGHTS, 0x02, "Remote_Chain_Improper_Height");
consumer_failure!(FAILURE_CHAIN_UNLINKED, 0x03, "Remote_Chain_Unlinked");
consumer_failure!(FAILURE_CHAIN_TOO_FAR_BEHIND, 0x04, "Remote_Chain_Too_Far_Behind");
consumer_failure!(FAILURE_CHAIN_TOO_FAR_AHEAD, 0x05, "Remote_Chain_Too_Far_Ahead");
consumer_failure!(FAILURE_CHAIN_SCORE_NOT_BETTER, 0x06, "Remote_Chain_Score_Not_Better");
consumer_failure!(FAILURE_CHAIN_BLOCK_IN_FUTURE, 0x07, "Remote_Chain_Timestamp_Too_Far_In_Future");
consumer_failure!(FAILURE_SIGNATURE_NOT_VERIFIABLE, 0x08, "Signature_Not_Verifiable");
consumer_failure!(FAILURE_STATE_INCONSISTENT, 0x09, "State_Inconsistent");
consumer_failure!(FAILURE_STORAGE, 0x0A, "Storage_Error");
consumer_failure!(FAILURE_CACHE_BUSY, 0x0B, "Cache_Busy");

/// Source of the current network time
pub type TimeSupplier = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Transactions accepted earlier and still waiting for a block, in arrival order
pub type PendingTransactionsSupplier = Arc<dyn Fn() -> Vec<TransactionInfo> + Send + Sync>;

/// Receives transactions rejected by a partial batch
pub type FailedTransactionSink = Arc<dyn Fn(&Hash256, ValidationResult) + Send + Sync>;

/// How transaction batches react to individual failures
///
/// Block batches are always all-or-nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// The first failing transaction rejects the whole batch
    #[default]
    AllOrNothing,

    /// Failing transactions are skipped and reported; the rest go on
    SkipFailed,
}
