pub mod aggregate;
pub mod find;

pub use aggregate::*;
pub use find::*;

use anyhow::{Context, Result};
use docql_core::Value;
use std::io::Write;
use std::path::Path;

/// Parse a JSON argument given inline or as `@path`
pub fn parse_json_arg(name: &str, arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read {} file: {}", name, path))?,
        None => arg.to_string(),
    };
    let parsed: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON for {}", name))?;
    Ok(Value::from(parsed))
}

/// Write documents one per line, or as a pretty printed array
pub fn write_documents<W: Write>(out: &mut W, docs: &[Value], pretty: bool) -> Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, docs)?;
        writeln!(out)?;
    } else {
        for doc in docs {
            serde_json::to_writer(&mut *out, doc)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}
