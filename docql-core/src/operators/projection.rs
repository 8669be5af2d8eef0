//! Projection operators
//!
//! Applied by `$project` to a single field: `{comments: {$slice: 2}}`.

use super::expression::array::slice_items;
use super::query::ElementQuery;
use crate::context::ProjectionOperator;
use crate::error::{bail, Result};
use crate::options::ComputeOptions;
use crate::value::{resolve, Value};

pub(crate) const OPERATORS: &[(&str, ProjectionOperator)] =
    &[("$elemMatch", elem_match), ("$slice", slice)];

/// First array element matching the criteria, or nothing
pub fn elem_match(
    obj: &Value,
    expr: &Value,
    field: &str,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let query = ElementQuery::new(expr, options.options())?;
    let Value::Array(items) = resolve(obj, field) else {
        return Ok(Value::Missing);
    };
    for item in items {
        if query.test(&item)? {
            return Ok(Value::Array(vec![item]));
        }
    }
    Ok(Value::Missing)
}

/// `n` elements from the front (or back when negative), or `[skip, n]`
pub fn slice(obj: &Value, expr: &Value, field: &str, _options: &ComputeOptions<'_>) -> Result<Value> {
    let value = resolve(obj, field);
    let Value::Array(items) = &value else {
        return Ok(value);
    };
    let sliced = match expr {
        Value::Array(args) => match args.as_slice() {
            [skip, n] => match (skip.as_i64(), n.as_i64()) {
                (Some(skip), Some(n)) => slice_items(items, Some(skip), n)?,
                _ => bail!("$slice projection expects integer arguments"),
            },
            _ => bail!("$slice projection expects a number or [skip, limit]"),
        },
        other => match other.as_i64() {
            Some(n) => slice_items(items, None, n)?,
            None => bail!("$slice projection expects a number or [skip, limit]"),
        },
    };
    Ok(Value::Array(sliced))
}
