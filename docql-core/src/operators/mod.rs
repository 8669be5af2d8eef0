//! Built-in operator catalog
//!
//! One module per operator category. Each module exposes an `OPERATORS`
//! table that `Context::full()` (or `Context::init()` for the core subset)
//! loads at construction time.

pub mod accumulator;
pub mod expression;
pub mod pipeline;
pub mod projection;
pub mod query;
pub mod window;

use crate::error::{bail, Result};
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::Value;

/// Evaluate `expr` against every document of a collection, skipping missing
/// results. A null expression yields the collection itself.
pub(crate) fn compute_each(
    collection: &[Value],
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Vec<Value>> {
    if expr.is_null() {
        return Ok(collection.to_vec());
    }
    let mut out = Vec::with_capacity(collection.len());
    for obj in collection {
        let value = compute_value(obj, expr, None, &options.with_root(obj))?;
        if !value.is_missing() {
            out.push(value);
        }
    }
    Ok(out)
}

/// Integer-preserving addition
pub(crate) fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => Some(
            x.checked_add(*y)
                .map(Value::Int64)
                .unwrap_or(Value::Float64(*x as f64 + *y as f64)),
        ),
        _ => Some(Value::Float64(a.as_f64()? + b.as_f64()?)),
    }
}

/// Integer-preserving multiplication
pub(crate) fn multiply_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => Some(
            x.checked_mul(*y)
                .map(Value::Int64)
                .unwrap_or(Value::Float64(*x as f64 * *y as f64)),
        ),
        _ => Some(Value::Float64(a.as_f64()? * b.as_f64()?)),
    }
}

/// Collapse a float that holds an exact integer back into an integer
pub(crate) fn normalize_number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Value::Int64(value as i64)
    } else {
        Value::Float64(value)
    }
}

/// Expect an array argument of exactly `n` elements
pub(crate) fn expect_args<'v>(name: &str, args: &'v Value, n: usize) -> Result<&'v [Value]> {
    match args {
        Value::Array(items) if items.len() == n => Ok(items),
        _ => bail!("{} expects an array of {} arguments", name, n),
    }
}

/// Interpret a value as a non-negative count
pub(crate) fn as_count(name: &str, value: &Value) -> Result<usize> {
    match value.as_i64() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => bail!("{} must be a non-negative integer", name),
    }
}
