use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use ledgerflow::NodeConfig;

mod common;
mod plugins;
mod process;

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists registered caches, handlers and diagnostic counters
    Plugins(plugins::Args),

    /// Replays a JSON file of blocks through the block pipeline
    Process(process::Args),
}

#[derive(Debug, Parser)]
#[clap(name = "Ledgerflow")]
#[clap(bin_name = "ledgerflow")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = NodeConfig::load(&args.config).into_diagnostic()?;

    match args.command {
        Command::Plugins(x) => plugins::run(&config, &x)?,
        Command::Process(x) => process::run(config, &x)?,
    };

    Ok(())
}
