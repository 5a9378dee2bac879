//! A ledgerflow node: plugin registry, versioned state and the block and
//! transaction pipelines wired together.

pub mod config;
pub mod node;
pub mod pool;

pub use config::{LoggingConfig, NodeConfig, PipelineConfig};
pub use node::{Node, NodeError, NodeServices};
pub use pool::UnconfirmedTransactions;
