use miette::IntoDiagnostic;
use serde::Serialize;

use ledgerflow::NodeConfig;
use ledgerflow_core::PluginManager;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Print a single JSON document instead of plain lists
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Listing {
    caches: Vec<&'static str>,
    transaction_plugins: Vec<&'static str>,
    stateless_validators: Vec<&'static str>,
    stateful_validators: Vec<&'static str>,
    observers: Vec<&'static str>,
    diagnostic_counters: Vec<&'static str>,
}

pub fn run(config: &NodeConfig, args: &Args) -> miette::Result<()> {
    let mut manager = PluginManager::new(config.network.clone());
    ledgerflow_plugins::register_all(&mut manager).into_diagnostic()?;
    let registry = manager.freeze();

    let listing = Listing {
        caches: registry.cache_names(),
        transaction_plugins: registry.transaction_plugin_names(),
        stateless_validators: registry.stateless_validator_names(),
        stateful_validators: registry.stateful_validator_names(),
        observers: registry.observer_names(),
        diagnostic_counters: registry.diagnostic_counter_names(),
    };

    if args.json {
        let out = serde_json::to_string_pretty(&listing).into_diagnostic()?;
        println!("{out}");
        return Ok(());
    }

    let sections = [
        ("caches", &listing.caches),
        ("transaction plugins", &listing.transaction_plugins),
        ("stateless validators", &listing.stateless_validators),
        ("stateful validators", &listing.stateful_validators),
        ("observers", &listing.observers),
        ("diagnostic counters", &listing.diagnostic_counters),
    ];

    for (title, names) in sections {
        println!("{title}:");

        for name in names {
            println!("  {name}");
        }
    }

    Ok(())
}
