//! `$bucket`

use super::group::{parse_fields, summarize};
use super::{expect_object, single_key};
use crate::error::{bail, ensure, Result};
use crate::evaluator::compute_value;
use crate::lazy::Lazy;
use crate::options::{ComputeOptions, Options};
use crate::value::{compare, Map, Value};
use crate::value::compare::type_rank;
use std::cmp::Ordering;

/// Index of the bucket holding `key`: the `i` with `boundaries[i] <= key < boundaries[i + 1]`
fn find_bucket(boundaries: &[Value], key: &Value) -> Option<usize> {
    let upper = boundaries.partition_point(|b| compare(b, key) != Ordering::Greater);
    (upper > 0 && upper < boundaries.len()).then(|| upper - 1)
}

fn validate(boundaries: &[Value], default: Option<&Value>) -> Result<()> {
    ensure!(
        boundaries.len() > 2,
        "$bucket 'boundaries' expects an array of at least 3 elements"
    );
    let rank = type_rank(&boundaries[0]);
    for pair in boundaries.windows(2) {
        ensure!(
            type_rank(&pair[1]) == rank,
            "$bucket 'boundaries' must all be of the same type"
        );
        ensure!(
            compare(&pair[0], &pair[1]) == Ordering::Less,
            "$bucket 'boundaries' must be sorted in ascending order"
        );
    }
    if let Some(default) = default {
        let (lower, upper) = (&boundaries[0], &boundaries[boundaries.len() - 1]);
        let outside = type_rank(default) != rank
            || compare(default, lower) == Ordering::Less
            || compare(default, upper) != Ordering::Less;
        ensure!(
            outside,
            "$bucket 'default' expression must be less than the lowest boundary or greater than or equal to the highest boundary"
        );
    }
    Ok(())
}

/// Categorize documents into buckets by boundaries.
///
/// Buckets come out in boundary order with the default bucket last; empty
/// buckets are skipped.
pub fn bucket(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = expect_object("$bucket", expr)?;
    let Some(Value::Array(boundaries)) = spec.get("boundaries") else {
        bail!("$bucket requires a 'boundaries' array");
    };
    let Some(group_by) = spec.get("groupBy").cloned() else {
        bail!("$bucket requires a 'groupBy' expression");
    };
    let boundaries = boundaries.clone();
    let default = spec.get("default").filter(|v| !v.is_missing()).cloned();
    validate(&boundaries, default.as_ref())?;

    let fields = match spec.get("output") {
        Some(Value::Object(output)) => parse_fields(output, options)?,
        Some(_) => bail!("$bucket 'output' must be an object"),
        None => {
            let mut output = Map::with_capacity(1);
            output.insert("count".to_string(), single_key("$sum", Value::Int64(1)));
            parse_fields(&output, options)?
        }
    };

    let options = options.clone();
    Ok(collection.flat_transform(move |values| {
        let mut buckets: Vec<Vec<Value>> = vec![Vec::new(); boundaries.len() - 1];
        let mut default_bucket = Vec::new();
        for obj in values {
            let key = compute_value(&obj, &group_by, None, &ComputeOptions::new(&options))?;
            match find_bucket(&boundaries, &key) {
                Some(i) => buckets[i].push(obj),
                None if default.is_some() => default_bucket.push(obj),
                None => bail!(
                    "$bucket could not find a matching branch for an input, and no default was specified."
                ),
            }
        }

        let mut partitions: Vec<(Value, Vec<Value>)> = boundaries
            .iter()
            .cloned()
            .zip(buckets)
            .filter(|(_, members)| !members.is_empty())
            .collect();
        if let Some(default) = default {
            if !default_bucket.is_empty() {
                partitions.push((default, default_bucket));
            }
        }
        Ok(Lazy::from_results(
            partitions
                .into_iter()
                .map(move |(id, members)| summarize(id, &members, &fields, &options)),
        ))
    }))
}
