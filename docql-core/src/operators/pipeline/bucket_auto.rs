//! `$bucketAuto`

use super::group::{parse_fields, summarize};
use super::{expect_object, single_key};
use crate::error::{bail, ensure, Result};
use crate::evaluator::compute_value;
use crate::lazy::Lazy;
use crate::operators::{as_count, normalize_number};
use crate::options::{ComputeOptions, Options};
use crate::value::{compare, Map, Value};
use std::cmp::Ordering;

/// Supported preferred-number series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    PowersOf2,
}

impl Granularity {
    fn parse(value: Option<&Value>) -> Result<Option<Self>> {
        match value {
            None => Ok(None),
            Some(Value::String(name)) if name == "POWERSOF2" => Ok(Some(Self::PowersOf2)),
            Some(other) => bail!("$bucketAuto granularity '{}' is not supported", other),
        }
    }

    /// Smallest series value strictly greater than `x`
    fn round_up(self, x: f64) -> f64 {
        if x <= 0.0 {
            return 1.0;
        }
        let mut p = 2f64.powi(x.log2().floor() as i32);
        while p <= x {
            p *= 2.0;
        }
        p
    }

    /// Largest series value not greater than `x`
    fn round_down(self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        let mut p = 2f64.powi(x.log2().floor() as i32);
        while p > x {
            p /= 2.0;
        }
        p
    }
}

/// Documents sharing one key, in input order
struct Run {
    key: Value,
    docs: Vec<Value>,
}

/// Sort by key, nil keys first, and collapse equal keys into runs
fn sorted_runs(values: Vec<Value>, group_by: &Value, options: &Options) -> Result<Vec<Run>> {
    let mut keyed = Vec::with_capacity(values.len());
    for obj in values {
        let key = compute_value(&obj, group_by, None, &ComputeOptions::new(options))?;
        let key = if key.is_missing() { Value::Null } else { key };
        keyed.push((key, obj));
    }
    keyed.sort_by(|(a, _), (b, _)| compare(a, b));

    let mut runs: Vec<Run> = Vec::new();
    for (key, obj) in keyed {
        match runs.last_mut() {
            Some(run) if compare(&run.key, &key) == Ordering::Equal => run.docs.push(obj),
            _ => runs.push(Run {
                key,
                docs: vec![obj],
            }),
        }
    }
    Ok(runs)
}

/// Bucket with its inclusive lower key and the key of its last run
struct AutoBucket {
    min: Value,
    last: Value,
    docs: Vec<Value>,
}

/// Fill buckets to roughly `size` documents without splitting a run. The
/// last bucket takes whatever remains.
fn fill(runs: Vec<Run>, buckets: usize, size: usize) -> Vec<AutoBucket> {
    let mut out: Vec<AutoBucket> = Vec::with_capacity(buckets);
    for run in runs {
        let open = match out.last() {
            Some(bucket) => bucket.docs.len() < size || out.len() == buckets,
            None => false,
        };
        match out.last_mut() {
            Some(bucket) if open => {
                bucket.last = run.key;
                bucket.docs.extend(run.docs);
            }
            _ => out.push(AutoBucket {
                min: run.key.clone(),
                last: run.key,
                docs: run.docs,
            }),
        }
    }
    out
}

fn as_positive(key: &Value) -> Result<f64> {
    match key.as_f64() {
        Some(n) if key.is_number() && n >= 0.0 => Ok(n),
        _ => bail!(
            "$bucketAuto can specify a granularity only with non-negative numeric values, found {}",
            key
        ),
    }
}

/// Fill buckets like `fill`, with edges taken from the series. A run whose
/// key lies below the current upper edge always joins the current bucket.
fn fill_with_granularity(
    runs: Vec<Run>,
    buckets: usize,
    size: usize,
    granularity: Granularity,
) -> Result<Vec<(Value, Value, Vec<Value>)>> {
    let mut out: Vec<(f64, f64, Vec<Value>)> = Vec::with_capacity(buckets);
    for run in runs {
        let key = as_positive(&run.key)?;
        let bucket_count = out.len();
        match out.last_mut() {
            Some((_, max, docs)) if key < *max || docs.len() < size || bucket_count == buckets => {
                *max = max.max(granularity.round_up(key));
                docs.extend(run.docs);
            }
            Some((_, max, _)) => {
                let min = *max;
                out.push((min, granularity.round_up(key), run.docs));
            }
            None => out.push((
                granularity.round_down(key),
                granularity.round_up(key),
                run.docs,
            )),
        }
    }
    Ok(out
        .into_iter()
        .map(|(min, max, docs)| (normalize_number(min), normalize_number(max), docs))
        .collect())
}

/// Split documents into `buckets` groups of about equal size
pub fn bucket_auto(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = expect_object("$bucketAuto", expr)?;
    let Some(group_by) = spec.get("groupBy").cloned() else {
        bail!("$bucketAuto requires a 'groupBy' expression");
    };
    let buckets = match spec.get("buckets") {
        Some(n) => as_count("$bucketAuto 'buckets'", n)?,
        None => bail!("$bucketAuto requires a 'buckets' field"),
    };
    ensure!(
        buckets > 0,
        "The $bucketAuto 'buckets' field must be greater than 0"
    );
    let granularity = Granularity::parse(spec.get("granularity"))?;
    let fields = match spec.get("output") {
        Some(Value::Object(output)) => parse_fields(output, options)?,
        Some(_) => bail!("$bucketAuto 'output' must be an object"),
        None => {
            let mut output = Map::with_capacity(1);
            output.insert("count".to_string(), single_key("$sum", Value::Int64(1)));
            parse_fields(&output, options)?
        }
    };

    let options = options.clone();
    Ok(collection.flat_transform(move |values| {
        let size = ((values.len() as f64 / buckets as f64).round() as usize).max(1);
        let runs = sorted_runs(values, &group_by, &options)?;

        let ranges: Vec<(Value, Value, Vec<Value>)> = match granularity {
            Some(granularity) => fill_with_granularity(runs, buckets, size, granularity)?,
            None => {
                let filled = fill(runs, buckets, size);
                let uppers: Vec<Value> = filled
                    .iter()
                    .skip(1)
                    .map(|b| b.min.clone())
                    .chain(filled.last().map(|b| b.last.clone()))
                    .collect();
                filled
                    .into_iter()
                    .zip(uppers)
                    .map(|(bucket, max)| (bucket.min, max, bucket.docs))
                    .collect()
            }
        };

        Ok(Lazy::from_results(ranges.into_iter().map(
            move |(min, max, docs)| {
                let mut id = Map::with_capacity(2);
                id.insert("min".to_string(), min);
                id.insert("max".to_string(), max);
                summarize(Value::Object(id), &docs, &fields, &options)
            },
        )))
    }))
}
