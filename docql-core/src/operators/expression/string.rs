//! String expression operators

use super::{compute_args, compute_single};
use crate::error::{bail, Result};
use crate::options::ComputeOptions;
use crate::value::Value;

pub fn concat(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let mut out = String::new();
    for arg in compute_args(obj, expr, options)? {
        match arg {
            Value::String(s) => out.push_str(&s),
            Value::Missing | Value::Null => return Ok(Value::Null),
            other => bail!("$concat only supports strings, got {}", other.type_name()),
        }
    }
    Ok(Value::String(out))
}

fn text(value: Value) -> String {
    match value {
        Value::Missing | Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

pub fn to_lower(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::String(text(compute_single(obj, expr, options)?).to_lowercase()))
}

pub fn to_upper(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::String(text(compute_single(obj, expr, options)?).to_uppercase()))
}

pub fn split(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let [input, delimiter] = args.as_slice() else {
        bail!("$split expects an array of 2 arguments");
    };
    if input.is_nil() {
        return Ok(Value::Null);
    }
    let (Some(input), Some(delimiter)) = (input.as_str(), delimiter.as_str()) else {
        bail!("$split requires a string input and a string delimiter");
    };
    if delimiter.is_empty() {
        bail!("$split requires a non-empty delimiter");
    }
    Ok(Value::Array(input.split(delimiter).map(Value::from).collect()))
}
