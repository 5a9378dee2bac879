use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use ledgerflow_core::{BatchPolicy, BlockChainConfiguration, BlockchainCheckOptions, HashCheckOptions};

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoggingConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub max_level: tracing::Level,

    #[serde(default)]
    pub include_tokio: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_level: tracing::Level::INFO,
            include_tokio: Default::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PipelineConfig {
    /// Block inputs in flight at once
    #[serde(default = "defaults::block_capacity")]
    pub block_capacity: usize,

    /// Transaction inputs in flight at once
    #[serde(default = "defaults::transaction_capacity")]
    pub transaction_capacity: usize,

    #[serde(default)]
    pub batch_policy: BatchPolicy,

    #[serde(default)]
    pub hash_check: HashCheckOptions,

    /// The rollback depth always comes from the network section
    #[serde(default)]
    pub blockchain_check: BlockchainCheckOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_capacity: defaults::block_capacity(),
            transaction_capacity: defaults::transaction_capacity(),
            batch_policy: Default::default(),
            hash_check: Default::default(),
            blockchain_check: Default::default(),
        }
    }
}

mod defaults {
    pub fn block_capacity() -> usize {
        16
    }

    pub fn transaction_capacity() -> usize {
        256
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NodeConfig {
    pub network: BlockChainConfiguration,

    /// JSON file holding the nemesis block
    pub nemesis: Option<PathBuf>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    pub fn new(network: BlockChainConfiguration) -> Self {
        Self {
            network,
            nemesis: None,
            pipeline: Default::default(),
            logging: Default::default(),
        }
    }

    pub fn load(explicit_file: &Option<PathBuf>) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::builder();

        // our base config will always be in /etc/ledgerflow
        s = s.add_source(config::File::with_name("/etc/ledgerflow/node.toml").required(false));

        // but we can override it by having a file in the working dir
        s = s.add_source(config::File::with_name("ledgerflow.toml").required(false));

        // if an explicit file was passed, then we load it as mandatory
        if let Some(explicit) = explicit_file.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        // finally, we use env vars to make some last-step overrides
        s = s.add_source(config::Environment::with_prefix("LEDGERFLOW").separator("_"));

        s.build()?.try_deserialize()
    }
}
