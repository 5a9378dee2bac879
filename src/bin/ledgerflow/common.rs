use std::path::Path;

use miette::{Context as _, IntoDiagnostic};
use tracing_subscriber::{filter::Targets, prelude::*};

use ledgerflow::LoggingConfig;
use serde::de::DeserializeOwned;

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config.max_level;

    let mut filter = Targets::new()
        .with_target("ledgerflow", level)
        .with_target("ledgerflow_core", level)
        .with_target("ledgerflow_plugins", level);

    if config.include_tokio {
        filter = filter
            .with_target("tokio", level)
            .with_target("runtime", level);
    }

    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish()
        .with(filter)
        .init();

    Ok(())
}

/// Reads a json document such as a block list or a single nemesis block
pub fn read_json<T: DeserializeOwned>(path: &Path) -> miette::Result<T> {
    let file = std::fs::File::open(path)
        .into_diagnostic()
        .with_context(|| format!("opening {}", path.display()))?;

    serde_json::from_reader(std::io::BufReader::new(file))
        .into_diagnostic()
        .with_context(|| format!("parsing {}", path.display()))
}
