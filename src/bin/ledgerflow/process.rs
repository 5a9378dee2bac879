use std::path::PathBuf;

use miette::{bail, IntoDiagnostic};
use serde::Serialize;
use tracing::info;

use ledgerflow::{Node, NodeConfig, NodeServices};
use ledgerflow_core::{Block, ConsumerCompletionResult, Height, InputSource};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// JSON array of blocks, starting with the nemesis block unless the
    /// config points to one
    file: PathBuf,

    /// Blocks per pipeline input
    #[arg(long, default_value_t = 1)]
    batch_size: usize,
}

#[derive(Serialize)]
struct BatchReport {
    first: Height,
    last: Height,
    result: ConsumerCompletionResult,
}

#[derive(Serialize)]
struct Report {
    batches: Vec<BatchReport>,
    height: Height,
    counters: Vec<(&'static str, u64)>,
}

#[tokio::main]
pub async fn run(config: NodeConfig, args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let mut blocks: Vec<Block> = crate::common::read_json(&args.file)?;

    let nemesis = match &config.nemesis {
        Some(path) => crate::common::read_json(path)?,
        None if !blocks.is_empty() && blocks[0].height == Height(1) => blocks.remove(0),
        None => bail!("no nemesis block configured and none found in the input"),
    };

    let node = Node::start(&config, nemesis, NodeServices::default()).into_diagnostic()?;

    let mut batches = vec![];

    for chunk in blocks.chunks(args.batch_size.max(1)) {
        let first = chunk[0].height;
        let last = chunk[chunk.len() - 1].height;

        let result = node
            .push_blocks(chunk.to_vec(), InputSource::Local)
            .await
            .into_diagnostic()?;

        batches.push(BatchReport {
            first,
            last,
            result,
        });
    }

    let report = Report {
        batches,
        height: node.height(),
        counters: node.registry().diagnostic_counters(node.cache()),
    };

    info!(height = %report.height, "replay finished");
    node.shutdown();

    let out = serde_json::to_string_pretty(&report).into_diagnostic()?;
    println!("{out}");

    Ok(())
}
