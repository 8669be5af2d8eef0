//! `$sort` and `$sortByCount`

use super::{expect_object, group, single_key};
use crate::collation::compare_collated;
use crate::error::{bail, Result};
use crate::lazy::Lazy;
use crate::options::Options;
use crate::value::{resolve, Map, Value};
use std::cmp::Ordering;
use tracing::trace;

/// Parse `{field: 1 | -1, ...}` into `(path, descending)` pairs
fn sort_keys(spec: &Map) -> Result<Vec<(String, bool)>> {
    spec.iter()
        .map(|(key, direction)| match direction.as_i64() {
            Some(1) => Ok((key.clone(), false)),
            Some(-1) => Ok((key.clone(), true)),
            _ => bail!("$sort key ordering must be 1 (for ascending) or -1 (for descending)"),
        })
        .collect()
}

/// Stable in-place sort by a sort specification, honouring the collation
pub(crate) fn sort_values(values: &mut Vec<Value>, spec: &Map, options: &Options) -> Result<()> {
    let keys = sort_keys(spec)?;
    if keys.is_empty() {
        return Ok(());
    }
    let collation = options.collation();
    let mut keyed: Vec<(Vec<Value>, Value)> = values
        .drain(..)
        .map(|doc| {
            let resolved = keys.iter().map(|(path, _)| resolve(&doc, path)).collect();
            (resolved, doc)
        })
        .collect();
    keyed.sort_by(|(a, _), (b, _)| {
        for (i, (_, descending)) in keys.iter().enumerate() {
            let ord = compare_collated(&a[i], &b[i], collation);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    values.extend(keyed.into_iter().map(|(_, doc)| doc));
    Ok(())
}

pub fn sort(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = expect_object("$sort", expr)?.clone();
    if spec.is_empty() {
        return Ok(collection);
    }
    sort_keys(&spec)?;
    trace!(keys = spec.len(), "attached $sort");
    let options = options.clone();
    Ok(collection.transform(move |mut values| {
        sort_values(&mut values, &spec, &options)?;
        Ok(values)
    }))
}

/// Group by an expression, count each group and sort by count, descending
pub fn sort_by_count(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let mut spec = Map::with_capacity(2);
    spec.insert("_id".to_string(), expr.clone());
    spec.insert("count".to_string(), single_key("$sum", Value::Int64(1)));
    let grouped = group(collection, &Value::Object(spec), options)?;
    sort(grouped, &single_key("count", Value::Int64(-1)), options)
}
