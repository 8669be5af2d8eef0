use super::parse_json_arg;
use anyhow::{Context, Result};
use clap::Args;
use docql_core::{CollationSpec, Lazy, Options, Query, Value};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct FindArgs {
    /// Input documents (JSON array or JSON lines, `-` for stdin)
    #[arg(short, long)]
    pub input: PathBuf,
    /// Filter document
    #[arg(short, long, default_value = "{}")]
    pub filter: String,
    /// Projection document
    #[arg(short, long)]
    pub projection: Option<String>,
    /// Sort specification, e.g. '{"age": -1}'
    #[arg(short, long)]
    pub sort: Option<String>,
    /// Number of matches to skip
    #[arg(long)]
    pub skip: Option<usize>,
    /// Maximum number of results
    #[arg(short, long)]
    pub limit: Option<usize>,
    /// Collation document used when sorting
    #[arg(long)]
    pub collation: Option<String>,
    /// Print the number of matches instead of the documents
    #[arg(long)]
    pub count: bool,
}

/// Run a filter over the input and return the matching documents
pub fn execute_find_command(args: &FindArgs, docs: Vec<Value>, options: &Options) -> Result<Vec<Value>> {
    let filter = parse_json_arg("filter", &args.filter)?;
    let projection = args
        .projection
        .as_deref()
        .map(|p| parse_json_arg("projection", p))
        .transpose()?;
    let query = Query::new(filter, options.clone()).context("Invalid filter")?;

    let mut cursor = query.find(Lazy::new(docs), projection);
    if let Some(sort) = &args.sort {
        cursor = cursor.sort(parse_json_arg("sort", sort)?);
    }
    if let Some(skip) = args.skip {
        cursor = cursor.skip(skip);
    }
    if let Some(limit) = args.limit {
        cursor = cursor.limit(limit);
    }
    if let Some(collation) = &args.collation {
        let spec = CollationSpec::from_value(&parse_json_arg("collation", collation)?)
            .context("Invalid collation")?;
        cursor = cursor.collation(spec);
    }

    if args.count {
        let n = cursor.count().context("Query failed")?;
        return Ok(vec![Value::from(serde_json::json!({ "count": n }))]);
    }
    cursor.all().context("Query failed")
}
