//! Window operators
//!
//! Window operators are evaluated once per document of a `$setWindowFields`
//! partition. Besides the document they receive the partition (or the
//! document's window slice), the 1-based position of the document and the
//! stage and field specifications.

mod cache;

pub use cache::{WindowCache, WindowCacheStats};

use super::compute_each;
use crate::collation::compare_collated;
use crate::context::WindowOperator;
use crate::error::{bail, ensure, Result};
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::{resolve, Value};
use std::cmp::Ordering;
use std::sync::Arc;

pub(crate) const OPERATORS: &[(&str, WindowOperator)] = &[
    ("$denseRank", dense_rank),
    ("$derivative", derivative),
    ("$documentNumber", document_number),
    ("$expMovingAvg", exp_moving_avg),
    ("$integral", integral),
    ("$linearFill", linear_fill),
    ("$locf", locf),
    ("$minMaxScaler", min_max_scaler),
    ("$rank", rank),
    ("$shift", shift),
];

/// Window operators that always see the whole partition
pub(crate) const UNBOUNDED_OPERATORS: [&str; 7] = [
    "$denseRank",
    "$documentNumber",
    "$expMovingAvg",
    "$linearFill",
    "$locf",
    "$rank",
    "$shift",
];

/// Window operators that need a sorted partition
pub(crate) const SORTED_OPERATORS: [&str; 8] = [
    "$denseRank",
    "$derivative",
    "$documentNumber",
    "$expMovingAvg",
    "$integral",
    "$linearFill",
    "$rank",
    "$shift",
];

static NULL: Value = Value::Null;

/// Everything a window operator knows about its call site
#[derive(Debug)]
pub struct WindowOperatorInput<'a> {
    /// The `$setWindowFields` specification
    pub parent_expr: &'a Value,
    /// The output field specification, e.g. `{$rank: {}}`
    pub input_expr: &'a Value,
    /// Operator name
    pub operator: &'a str,
    /// 1-based position of the document in its partition
    pub document_number: usize,
    /// Output field name
    pub field: &'a str,
    /// Partition-scoped memoization
    pub cache: &'a WindowCache,
}

impl<'a> WindowOperatorInput<'a> {
    /// Operator argument, `null` when absent
    pub fn args(&self) -> &'a Value {
        self.input_expr.get(self.operator).unwrap_or(&NULL)
    }

    /// `window` option of the output field, if any
    pub fn window(&self) -> Option<&'a Value> {
        self.input_expr.get("window")
    }

    /// Path of the single `sortBy` field as a field expression.
    ///
    /// Operators that measure distance along the sort axis need exactly one key.
    pub fn sort_key(&self) -> Result<String> {
        let sort_by = self.parent_expr.get("sortBy").and_then(Value::as_object);
        match sort_by.map(|s| s.keys().collect::<Vec<_>>()).as_deref() {
            Some([key]) => Ok(format!("${}", key)),
            _ => bail!("{} requires a sortBy with exactly one field", self.operator),
        }
    }

    /// Every `sortBy` path with its direction, `true` when descending
    pub fn sort_fields(&self) -> Result<Vec<(&'a str, bool)>> {
        let Some(sort_by) = self.parent_expr.get("sortBy").and_then(Value::as_object) else {
            bail!("{} requires a 'sortBy'.", self.operator);
        };
        ensure!(!sort_by.is_empty(), "{} requires a 'sortBy'.", self.operator);
        Ok(sort_by
            .iter()
            .map(|(key, direction)| (key.as_str(), direction.as_i64() == Some(-1)))
            .collect())
    }

    /// Memoize a partition-wide series and read this document's slot.
    ///
    /// The entry is released once the last document has read it.
    fn memoized<F>(&self, partition_len: usize, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Vec<Value>>,
    {
        let series: Arc<Vec<Value>> = self.cache.get_or_compute(self.field, compute)?;
        let value = series
            .get(self.document_number - 1)
            .cloned()
            .unwrap_or(Value::Null);
        if self.document_number >= partition_len {
            self.cache.evict(self.field);
        }
        Ok(value)
    }
}

/// Numeric position of a value on an axis; dates count in milliseconds
fn axis(value: &Value) -> Option<f64> {
    match value {
        Value::DateTime(d) => Some(d.timestamp_millis() as f64),
        other if other.is_number() => other.as_f64(),
        _ => None,
    }
}

fn millis_per_unit(unit: Option<&Value>) -> Result<f64> {
    let Some(unit) = unit else {
        return Ok(1.0);
    };
    Ok(match unit.as_str() {
        Some("week") => 604_800_000.0,
        Some("day") => 86_400_000.0,
        Some("hour") => 3_600_000.0,
        Some("minute") => 60_000.0,
        Some("second") => 1_000.0,
        Some("millisecond") => 1.0,
        _ => bail!("unsupported window unit {}", unit),
    })
}

/// `(x, y)` pairs from the sort key and the input expression
fn points(
    collection: &[Value],
    sort_key: &str,
    input: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Vec<(Option<f64>, Value)>> {
    let x_expr = Value::from(sort_key);
    let mut out = Vec::with_capacity(collection.len());
    for doc in collection {
        let copts = options.with_root(doc);
        let x = compute_value(doc, &x_expr, None, &copts)?;
        let y = compute_value(doc, input, None, &copts)?;
        out.push((axis(&x), y));
    }
    Ok(out)
}

pub fn document_number(
    _obj: &Value,
    _collection: &[Value],
    input: &WindowOperatorInput<'_>,
    _options: &ComputeOptions<'_>,
) -> Result<Value> {
    Ok(Value::from(input.document_number))
}

fn rank_series(
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
    dense: bool,
) -> Result<Vec<Value>> {
    let fields = input.sort_fields()?;
    let collation = options.options().collation();
    let keys: Vec<Vec<Value>> = collection
        .iter()
        .map(|doc| fields.iter().map(|(path, _)| resolve(doc, path)).collect())
        .collect();
    let tied = |a: &[Value], b: &[Value]| {
        fields.iter().enumerate().all(|(i, (_, descending))| {
            let ord = compare_collated(&a[i], &b[i], collation);
            let ord = if *descending { ord.reverse() } else { ord };
            ord == Ordering::Equal
        })
    };
    let mut ranks = Vec::with_capacity(keys.len());
    let mut current = 0usize;
    for (i, key) in keys.iter().enumerate() {
        if i == 0 || !tied(key.as_slice(), keys[i - 1].as_slice()) {
            current = if dense { current + 1 } else { i + 1 };
        }
        ranks.push(Value::from(current));
    }
    Ok(ranks)
}

/// Position by sort key; ties share a rank and leave gaps
pub fn rank(
    _obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    input.memoized(collection.len(), || rank_series(collection, input, options, false))
}

/// Position by sort key; ties share a rank without gaps
pub fn dense_rank(
    _obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    input.memoized(collection.len(), || rank_series(collection, input, options, true))
}

/// Value of an expression at a relative position: `{output, by, default}`
pub fn shift(
    obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let args = input.args();
    let (Some(output), Some(by)) = (args.get("output"), args.get("by")) else {
        bail!("$shift requires 'output' and 'by'");
    };
    let Some(by) = by.as_i64() else {
        bail!("$shift 'by' must be an integer");
    };
    let target = input.document_number as i64 - 1 + by;
    match usize::try_from(target).ok().and_then(|t| collection.get(t)) {
        Some(doc) => compute_value(doc, output, None, &options.with_root(doc)),
        None => match args.get("default") {
            Some(default) => compute_value(obj, default, None, options),
            None => Ok(Value::Null),
        },
    }
}

/// Rescale `input` into `[min, max]` (default `[0, 1]`) over the window
pub fn min_max_scaler(
    obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let args = input.args();
    let (expr, lower, upper) = match args.as_object() {
        Some(spec) if spec.contains_key("input") => {
            let bound = |key: &str, default: f64| -> Result<f64> {
                match spec.get(key) {
                    None => Ok(default),
                    Some(v) => match v.as_f64() {
                        Some(n) => Ok(n),
                        None => bail!("$minMaxScaler '{}' must be a number", key),
                    },
                }
            };
            (spec.get("input").unwrap_or(&NULL), bound("min", 0.0)?, bound("max", 1.0)?)
        }
        _ => (args, 0.0, 1.0),
    };
    ensure!(lower <= upper, "$minMaxScaler 'min' must not exceed 'max'");

    let range = |docs: &[Value]| -> Result<Vec<Value>> {
        let nums: Vec<f64> = compute_each(docs, expr, options)?
            .iter()
            .filter_map(|v| if v.is_number() { v.as_f64() } else { None })
            .collect();
        ensure!(!nums.is_empty(), "$minMaxScaler found no numeric input");
        let min = nums.iter().copied().fold(f64::INFINITY, f64::min);
        let max = nums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(vec![Value::Float64(min), Value::Float64(max)])
    };
    let (min, max) = if input.window().is_some() {
        let bounds = range(collection)?;
        (bounds[0].as_f64(), bounds[1].as_f64())
    } else {
        let bounds = input.cache.get_or_compute(input.field, || range(collection))?;
        if input.document_number >= collection.len() {
            input.cache.evict(input.field);
        }
        (bounds[0].as_f64(), bounds[1].as_f64())
    };
    let (Some(min), Some(max)) = (min, max) else {
        return Ok(Value::Null);
    };

    let x = compute_value(obj, expr, None, &options.with_root(obj))?;
    let Some(x) = x.as_f64().filter(|_| x.is_number()) else {
        bail!("$minMaxScaler input must be a number, got {}", x.type_name());
    };
    if max == min {
        return Ok(Value::Float64(lower));
    }
    Ok(Value::Float64((x - min) / (max - min) * (upper - lower) + lower))
}

fn rate_args<'a>(input: &WindowOperatorInput<'a>, name: &str) -> Result<(&'a Value, f64)> {
    let args = input.args();
    let Some(expr) = args.get("input") else {
        bail!("{} requires an 'input' expression", name);
    };
    Ok((expr, millis_per_unit(args.get("unit"))?))
}

/// Average rate of change across the window
pub fn derivative(
    _obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let (expr, unit) = rate_args(input, "$derivative")?;
    let (Some(first), Some(last)) = (collection.first(), collection.last()) else {
        return Ok(Value::Null);
    };
    if collection.len() < 2 {
        return Ok(Value::Null);
    }
    let ends = [first.clone(), last.clone()];
    let pts = points(&ends, &input.sort_key()?, expr, options)?;
    match pts.as_slice() {
        [(Some(x1), y1), (Some(x2), y2)] => match (y1.as_f64(), y2.as_f64()) {
            (Some(y1), Some(y2)) if x2 != x1 => {
                Ok(Value::Float64((y2 - y1) / ((x2 - x1) / unit)))
            }
            _ => Ok(Value::Null),
        },
        _ => Ok(Value::Null),
    }
}

/// Area under the curve across the window, by the trapezoidal rule
pub fn integral(
    _obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let (expr, unit) = rate_args(input, "$integral")?;
    let pts = points(collection, &input.sort_key()?, expr, options)?;
    let mut numeric = Vec::with_capacity(pts.len());
    for (x, y) in &pts {
        match (x, y.as_f64().filter(|_| y.is_number())) {
            (Some(x), Some(y)) => numeric.push((*x, y)),
            _ => return Ok(Value::Null),
        }
    }
    let area = numeric
        .windows(2)
        .map(|w| 0.5 * (w[0].1 + w[1].1) * ((w[1].0 - w[0].0) / unit))
        .sum::<f64>();
    Ok(Value::Float64(area))
}

/// Exponentially weighted average: `{input, N}` or `{input, alpha}`
pub fn exp_moving_avg(
    _obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let args = input.args();
    let Some(expr) = args.get("input") else {
        bail!("$expMovingAvg requires an 'input' expression");
    };
    let weight = match (args.get("N"), args.get("alpha")) {
        (Some(_), Some(_)) => bail!("You must specify either N or alpha. You cannot specify both."),
        (Some(n), None) => match n.as_i64() {
            Some(n) if n > 0 => 2.0 / (n as f64 + 1.0),
            _ => bail!("$expMovingAvg 'N' must be a positive integer"),
        },
        (None, Some(alpha)) => match alpha.as_f64() {
            Some(a) if a > 0.0 && a < 1.0 => a,
            _ => bail!("$expMovingAvg 'alpha' must be between 0 and 1"),
        },
        (None, None) => bail!("$expMovingAvg requires 'N' or 'alpha'"),
    };
    input.memoized(collection.len(), || {
        let mut series = Vec::with_capacity(collection.len());
        let mut previous: Option<f64> = None;
        for doc in collection {
            let y = compute_value(doc, expr, None, &options.with_root(doc))?;
            match y.as_f64().filter(|_| y.is_number()) {
                Some(y) => {
                    let avg = previous.map_or(y, |p| y * weight + p * (1.0 - weight));
                    previous = Some(avg);
                    series.push(Value::Float64(avg));
                }
                None => series.push(Value::Null),
            }
        }
        Ok(series)
    })
}

/// Last observation carried forward over null or missing values
pub fn locf(
    _obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let expr = input.args();
    input.memoized(collection.len(), || {
        let mut series = Vec::with_capacity(collection.len());
        let mut last = Value::Null;
        for doc in collection {
            let y = compute_value(doc, expr, None, &options.with_root(doc))?;
            if !y.is_nil() {
                last = y;
            }
            series.push(last.clone());
        }
        Ok(series)
    })
}

/// Fill null or missing values by linear interpolation on the sort key
pub fn linear_fill(
    _obj: &Value,
    collection: &[Value],
    input: &WindowOperatorInput<'_>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let expr = input.args();
    let sort_key = input.sort_key()?;
    input.memoized(collection.len(), || {
        let pts = points(collection, &sort_key, expr, options)?;
        let known: Vec<(usize, f64, f64)> = pts
            .iter()
            .enumerate()
            .filter_map(|(i, (x, y))| {
                let y = y.as_f64().filter(|_| y.is_number())?;
                Some((i, (*x)?, y))
            })
            .collect();
        let mut series = Vec::with_capacity(pts.len());
        for (i, (x, y)) in pts.iter().enumerate() {
            if !y.is_nil() {
                series.push(y.clone());
                continue;
            }
            let before = known.iter().rev().find(|k| k.0 < i);
            let after = known.iter().find(|k| k.0 > i);
            let filled = match (before, after, x) {
                (Some(&(_, x1, y1)), Some(&(_, x2, y2)), Some(x)) if x2 != x1 => {
                    Value::Float64(y1 + (x - x1) * (y2 - y1) / (x2 - x1))
                }
                _ => Value::Null,
            };
            series.push(filled);
        }
        Ok(series)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::value::Map;
    use serde_json::json;

    fn spec(op: &str, args: Value) -> Value {
        let mut map = Map::new();
        map.insert(op.to_string(), args);
        Value::Object(map)
    }

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn run(op: &str, args: serde_json::Value, docs: &[Value]) -> Vec<Value> {
        let opts = Options::default();
        let copts = ComputeOptions::new(&opts);
        let parent = v(json!({"sortBy": {"t": 1}}));
        let field_spec = spec(op, v(args));
        let cache = WindowCache::new();
        let f = opts.window_operator(op).unwrap();
        let out = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let input = WindowOperatorInput {
                    parent_expr: &parent,
                    input_expr: &field_spec,
                    operator: op,
                    document_number: i + 1,
                    field: "out",
                    cache: &cache,
                };
                f(doc, docs, &input, &copts).unwrap()
            })
            .collect();
        assert!(cache.is_empty());
        out
    }

    fn series(values: serde_json::Value) -> Vec<Value> {
        v(values).into_array()
    }

    #[test]
    fn test_rank_family() {
        let docs = series(json!([{"t": 1}, {"t": 2}, {"t": 2}, {"t": 5}]));
        assert_eq!(run("$rank", json!({}), &docs), series(json!([1, 2, 2, 4])));
        assert_eq!(run("$denseRank", json!({}), &docs), series(json!([1, 2, 2, 3])));
        assert_eq!(run("$documentNumber", json!({}), &docs), series(json!([1, 2, 3, 4])));
    }

    #[test]
    fn test_shift() {
        let docs = series(json!([{"t": 1, "v": "a"}, {"t": 2, "v": "b"}, {"t": 3, "v": "c"}]));
        let out = run("$shift", json!({"output": "$v", "by": 1, "default": "none"}), &docs);
        assert_eq!(out, series(json!(["b", "c", "none"])));
        let out = run("$shift", json!({"output": "$v", "by": -1}), &docs);
        assert_eq!(out, series(json!([null, "a", "b"])));
    }

    #[test]
    fn test_min_max_scaler() {
        let docs = series(json!([{"t": 1, "a": 1}, {"t": 2, "a": 5}, {"t": 3, "a": 13}, {"t": 4, "a": 21}]));
        let out = run("$minMaxScaler", json!("$a"), &docs);
        assert_eq!(out, series(json!([0.0, 0.2, 0.6, 1.0])));
        let out = run("$minMaxScaler", json!({"input": "$a", "min": 0, "max": 100}), &docs);
        assert_eq!(out[1], Value::Float64(20.0));
    }

    #[test]
    fn test_rates() {
        let docs = series(json!([{"t": 0, "d": 0}, {"t": 2, "d": 4}, {"t": 4, "d": 12}]));
        assert_eq!(run("$derivative", json!({"input": "$d"}), &docs)[0], Value::Float64(3.0));
        assert_eq!(run("$integral", json!({"input": "$d"}), &docs)[0], Value::Float64(20.0));
    }

    #[test]
    fn test_exp_moving_avg() {
        let docs = series(json!([{"t": 1, "p": 10}, {"t": 2, "p": 20}, {"t": 3, "p": 30}]));
        let out = run("$expMovingAvg", json!({"input": "$p", "alpha": 0.5}), &docs);
        assert_eq!(out, series(json!([10.0, 15.0, 22.5])));
    }

    #[test]
    fn test_fills() {
        let docs = series(json!([{"t": 0, "y": 1}, {"t": 1}, {"t": 2, "y": null}, {"t": 3, "y": 7}, {"t": 4}]));
        assert_eq!(run("$locf", json!("$y"), &docs), series(json!([1, 1, 1, 7, 7])));
        assert_eq!(run("$linearFill", json!("$y"), &docs), series(json!([1, 3.0, 5.0, 7, null])));
    }
}
