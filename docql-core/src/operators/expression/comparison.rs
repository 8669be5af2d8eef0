//! Comparison expression operators

use super::compute_args;
use crate::error::{bail, Result};
use crate::options::ComputeOptions;
use crate::value::{compare, Value};
use std::cmp::Ordering;

fn compare_args(
    name: &str,
    obj: &Value,
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Ordering> {
    let args = compute_args(obj, expr, options)?;
    match args.as_slice() {
        [a, b] => Ok(compare(a, b)),
        _ => bail!("{} expects an array of 2 arguments", name),
    }
}

pub fn cmp(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let ord = compare_args("$cmp", obj, expr, options)?;
    Ok(Value::Int64(match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

pub fn eq(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::Bool(compare_args("$eq", obj, expr, options)? == Ordering::Equal))
}

pub fn ne(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::Bool(compare_args("$ne", obj, expr, options)? != Ordering::Equal))
}

pub fn gt(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::Bool(compare_args("$gt", obj, expr, options)? == Ordering::Greater))
}

pub fn gte(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::Bool(compare_args("$gte", obj, expr, options)? != Ordering::Less))
}

pub fn lt(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::Bool(compare_args("$lt", obj, expr, options)? == Ordering::Less))
}

pub fn lte(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::Bool(compare_args("$lte", obj, expr, options)? != Ordering::Greater))
}
