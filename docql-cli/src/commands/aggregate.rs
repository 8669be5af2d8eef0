use super::parse_json_arg;
use anyhow::{Context, Result};
use clap::Args;
use docql_core::{Aggregator, Options, Value};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Input documents (JSON array or JSON lines, `-` for stdin)
    #[arg(short, long)]
    pub input: PathBuf,
    /// Pipeline as a JSON array, or `@path` to read it from a file
    #[arg(short, long)]
    pub pipeline: String,
}

/// Run a pipeline over the input and return its output
pub fn execute_aggregate_command(args: &AggregateArgs, docs: Vec<Value>, options: &Options) -> Result<Vec<Value>> {
    let pipeline = parse_json_arg("pipeline", &args.pipeline)?;
    let aggregator = Aggregator::new(pipeline, options.clone()).context("Invalid pipeline")?;
    info!(stages = ?aggregator.stage_names(), "Running pipeline");
    aggregator.run(docs).context("Pipeline failed")
}
