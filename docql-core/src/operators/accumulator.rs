//! Accumulator operators
//!
//! Accumulators summarize a whole array, either a `$group` partition, a
//! window slice or an array reached from an expression. A null `expr` means
//! the collection values are used as-is.

use super::{add_numbers, compute_each};
use crate::context::AccumulatorOperator;
use crate::error::{bail, Result};
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::{compare, unique, Map, Value};
use std::cmp::Ordering;

pub(crate) const OPERATORS: &[(&str, AccumulatorOperator)] = &[
    ("$addToSet", add_to_set),
    ("$avg", avg),
    ("$count", count),
    ("$covariancePop", covariance_pop),
    ("$covarianceSamp", covariance_samp),
    ("$first", first),
    ("$last", last),
    ("$max", max),
    ("$mergeObjects", merge_objects),
    ("$min", min),
    ("$push", push),
    ("$stdDevPop", std_dev_pop),
    ("$stdDevSamp", std_dev_samp),
    ("$sum", sum),
];

/// Collect evaluated values into an array
pub fn push(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    compute_each(collection, expr, options).map(Value::Array)
}

/// Collect distinct evaluated values, first occurrence wins
pub fn add_to_set(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let values = compute_each(collection, expr, options)?;
    Ok(Value::Array(unique(&values, options.hash_function())))
}

/// Sum numeric values; a numeric literal counts documents times the literal
pub fn sum(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    if expr.is_number() {
        let n = Value::from(collection.len());
        return Ok(super::multiply_numbers(&n, expr).unwrap_or(Value::Int64(0)));
    }
    let values = compute_each(collection, expr, options)?;
    Ok(values
        .iter()
        .filter(|v| v.is_number())
        .fold(Value::Int64(0), |acc, v| add_numbers(&acc, v).unwrap_or(acc)))
}

fn numbers(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Vec<f64>> {
    Ok(compute_each(collection, expr, options)?
        .iter()
        .filter_map(|v| if v.is_number() { v.as_f64() } else { None })
        .collect())
}

/// Arithmetic mean of numeric values, null when there are none
pub fn avg(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let nums = numbers(collection, expr, options)?;
    if nums.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Float64(nums.iter().sum::<f64>() / nums.len() as f64))
}

fn extreme(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
    wanted: Ordering,
) -> Result<Value> {
    let values = compute_each(collection, expr, options)?;
    let mut best: Option<Value> = None;
    for value in values.into_iter().filter(|v| !v.is_nil()) {
        let better = best
            .as_ref()
            .map_or(true, |current| compare(&value, current) == wanted);
        if better {
            best = Some(value);
        }
    }
    Ok(best.unwrap_or(Value::Null))
}

/// Smallest non-null value
pub fn min(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    extreme(collection, expr, options, Ordering::Less)
}

/// Largest non-null value
pub fn max(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    extreme(collection, expr, options, Ordering::Greater)
}

fn evaluate_at(
    obj: Option<&Value>,
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let Some(obj) = obj else {
        return Ok(Value::Missing);
    };
    if expr.is_null() {
        return Ok(obj.clone());
    }
    let value = compute_value(obj, expr, None, &options.with_root(obj))?;
    Ok(if value.is_missing() { Value::Null } else { value })
}

/// Value of the first document
pub fn first(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    evaluate_at(collection.first(), expr, options)
}

/// Value of the last document
pub fn last(collection: &[Value], expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    evaluate_at(collection.last(), expr, options)
}

/// Number of documents
pub fn count(collection: &[Value], _expr: &Value, _options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::from(collection.len()))
}

/// Shallow merge of object values; later fields win
pub fn merge_objects(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let mut out = Map::new();
    for value in compute_each(collection, expr, options)? {
        match value {
            Value::Object(obj) => out.extend(obj),
            Value::Null | Value::Missing => {}
            other => bail!("$mergeObjects requires object inputs, got {}", other.type_name()),
        }
    }
    Ok(Value::Object(out))
}

fn std_dev(nums: &[f64], sample: bool) -> Value {
    let n = nums.len();
    if n == 0 || (sample && n < 2) {
        return Value::Null;
    }
    let mean = nums.iter().sum::<f64>() / n as f64;
    let squares: f64 = nums.iter().map(|x| (x - mean).powi(2)).sum();
    let divisor = if sample { n - 1 } else { n } as f64;
    Value::Float64((squares / divisor).sqrt())
}

/// Population standard deviation
pub fn std_dev_pop(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    Ok(std_dev(&numbers(collection, expr, options)?, false))
}

/// Sample standard deviation
pub fn std_dev_samp(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    Ok(std_dev(&numbers(collection, expr, options)?, true))
}

fn covariance(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
    sample: bool,
) -> Result<Value> {
    let mut pairs = Vec::new();
    for value in compute_each(collection, expr, options)? {
        let Value::Array(pair) = &value else {
            bail!("covariance expects a pair of numeric expressions");
        };
        if let [x, y] = pair.as_slice() {
            if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                pairs.push((x, y));
            }
        }
    }
    let n = pairs.len();
    if n == 0 || (sample && n < 2) {
        return Ok(Value::Null);
    }
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
    let total: f64 = pairs.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let divisor = if sample { n - 1 } else { n } as f64;
    Ok(Value::Float64(total / divisor))
}

/// Population covariance of `[x, y]` pairs
pub fn covariance_pop(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    covariance(collection, expr, options, false)
}

/// Sample covariance of `[x, y]` pairs
pub fn covariance_samp(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    covariance(collection, expr, options, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use serde_json::json;

    fn docs() -> Vec<Value> {
        vec![
            Value::from(json!({"n": 2, "tag": "a"})),
            Value::from(json!({"n": 4, "tag": "b"})),
            Value::from(json!({"n": 9, "tag": "a"})),
            Value::from(json!({"tag": "c"})),
        ]
    }

    fn run(f: AccumulatorOperator, expr: serde_json::Value) -> Value {
        let opts = Options::default();
        f(&docs(), &Value::from(expr), &ComputeOptions::new(&opts)).unwrap()
    }

    #[test]
    fn test_sum_avg() {
        assert_eq!(run(sum, json!("$n")), Value::Int64(15));
        assert_eq!(run(sum, json!(1)), Value::Int64(4));
        assert_eq!(run(avg, json!("$n")), Value::Float64(5.0));
        assert_eq!(run(avg, json!("$missing")), Value::Null);
    }

    #[test]
    fn test_min_max_skip_missing() {
        assert_eq!(run(min, json!("$n")), Value::Int64(2));
        assert_eq!(run(max, json!("$n")), Value::Int64(9));
    }

    #[test]
    fn test_first_last_push_set() {
        assert_eq!(run(first, json!("$n")), Value::Int64(2));
        assert_eq!(run(last, json!("$n")), Value::Null);
        assert_eq!(run(push, json!("$tag")), Value::from(json!(["a", "b", "a", "c"])));
        assert_eq!(run(add_to_set, json!("$tag")), Value::from(json!(["a", "b", "c"])));
        assert_eq!(run(count, Value::Null.to_json()), Value::Int64(4));
    }

    #[test]
    fn test_std_dev() {
        let opts = Options::default();
        let values: Vec<Value> = [2, 4, 4, 4, 5, 5, 7, 9].iter().map(|&i| Value::Int64(i)).collect();
        let pop = std_dev_pop(&values, &Value::Null, &ComputeOptions::new(&opts)).unwrap();
        assert_eq!(pop, Value::Float64(2.0));
        let single = std_dev_samp(&values[..1], &Value::Null, &ComputeOptions::new(&opts)).unwrap();
        assert_eq!(single, Value::Null);
    }

    #[test]
    fn test_merge_objects() {
        let opts = Options::default();
        let values = vec![Value::from(json!({"a": 1, "b": 1})), Value::Null, Value::from(json!({"b": 2}))];
        let merged = merge_objects(&values, &Value::Null, &ComputeOptions::new(&opts)).unwrap();
        assert_eq!(merged, Value::from(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_covariance() {
        let values: Vec<Value> = vec![json!({"x": 1, "y": 2}), json!({"x": 2, "y": 4}), json!({"x": 3, "y": 6})]
            .into_iter()
            .map(Value::from)
            .collect();
        let opts = Options::default();
        let cov = covariance_samp(&values, &Value::from(json!(["$x", "$y"])), &ComputeOptions::new(&opts)).unwrap();
        assert_eq!(cov, Value::Float64(2.0));
    }
}
