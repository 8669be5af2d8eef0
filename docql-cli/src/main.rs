use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docql_core::{EngineConfig, Options};
use std::path::PathBuf;
use tracing::{error, info};

mod commands;
mod logging;
mod store;

use commands::*;
use logging::{init_logging, RunTimer};
use store::{read_documents, CollectionStore};

#[derive(Parser)]
#[command(name = "docql")]
#[command(about = "Run MongoDB-style queries and aggregation pipelines over JSON documents")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true, env = "DOCQL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of `<name>.json` collections used by $lookup, $unionWith, $out and $merge
    #[arg(long, global = true)]
    collections: Option<PathBuf>,

    /// Write collections modified by $out or $merge back to the directory
    #[arg(long, global = true, requires = "collections")]
    save: bool,

    /// Pretty print the output as a JSON array
    #[arg(long, global = true)]
    pretty: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter documents with a query
    Find(FindArgs),
    /// Run an aggregation pipeline
    Aggregate(AggregateArgs),
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging, cli.verbose).context("Failed to initialize logging")?;

    info!("DocQL v{} starting", env!("CARGO_PKG_VERSION"));

    let mut options = Options::from_config(&config);
    let store = cli.collections.as_ref().map(CollectionStore::new);
    if let Some(store) = &store {
        options = options.with_collection_resolver(store.resolver());
    }

    let threshold = config.logging.slow_run_threshold_ms;
    let result = match &cli.command {
        Commands::Find(args) => {
            let timer = RunTimer::start("find", threshold);
            let docs = read_documents(&args.input)?;
            execute_find_command(args, docs, &options).map(|out| {
                timer.finish(out.len());
                out
            })
        }
        Commands::Aggregate(args) => {
            let timer = RunTimer::start("aggregate", threshold);
            let docs = read_documents(&args.input)?;
            execute_aggregate_command(args, docs, &options).map(|out| {
                timer.finish(out.len());
                out
            })
        }
    };

    match result {
        Ok(docs) => {
            if cli.save {
                if let Some(store) = &store {
                    store.save()?;
                }
            }
            let stdout = std::io::stdout();
            write_documents(&mut stdout.lock(), &docs, cli.pretty)?;
            info!(documents = docs.len(), "Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
