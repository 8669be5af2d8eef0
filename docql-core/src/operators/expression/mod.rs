//! Expression operators
//!
//! Expression operators are evaluated once per document. Each receives the
//! current document, its unevaluated argument and the evaluation frame, and
//! decides itself which arguments to evaluate.

mod arithmetic;
pub(crate) mod array;
mod boolean;
mod comparison;
mod conditional;
pub(crate) mod date;
mod misc;
mod string;

use crate::context::ExpressionOperator;
use crate::error::Result;
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::Value;

pub(crate) const OPERATORS: &[(&str, ExpressionOperator)] = &[
    ("$abs", arithmetic::abs),
    ("$add", arithmetic::add),
    ("$and", boolean::and),
    ("$arrayElemAt", array::array_elem_at),
    ("$ceil", arithmetic::ceil),
    ("$cmp", comparison::cmp),
    ("$concat", string::concat),
    ("$concatArrays", array::concat_arrays),
    ("$cond", conditional::cond),
    ("$dateAdd", date::date_add),
    ("$dateSubtract", date::date_subtract),
    ("$divide", arithmetic::divide),
    ("$eq", comparison::eq),
    ("$filter", array::filter),
    ("$floor", arithmetic::floor),
    ("$gt", comparison::gt),
    ("$gte", comparison::gte),
    ("$ifNull", conditional::if_null),
    ("$in", array::in_array),
    ("$isArray", array::is_array),
    ("$let", misc::let_vars),
    ("$literal", misc::literal),
    ("$lt", comparison::lt),
    ("$lte", comparison::lte),
    ("$map", array::map),
    ("$mod", arithmetic::modulo),
    ("$multiply", arithmetic::multiply),
    ("$ne", comparison::ne),
    ("$not", boolean::not),
    ("$or", boolean::or),
    ("$reduce", array::reduce),
    ("$round", arithmetic::round),
    ("$size", array::size),
    ("$slice", array::slice),
    ("$split", string::split),
    ("$subtract", arithmetic::subtract),
    ("$switch", conditional::switch),
    ("$toLower", string::to_lower),
    ("$toUpper", string::to_upper),
    ("$type", misc::type_of),
];

/// Evaluate an operator argument into a list of values.
///
/// An array argument is evaluated element-wise; anything else yields a
/// single value.
pub(crate) fn compute_args(
    obj: &Value,
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Vec<Value>> {
    match compute_value(obj, expr, None, options)? {
        Value::Array(items) if expr.is_array() => Ok(items),
        other => Ok(vec![other]),
    }
}

/// Evaluate a single-value argument, unwrapping a one-element array form
/// such as `{$abs: ["$x"]}`.
pub(crate) fn compute_single(
    obj: &Value,
    expr: &Value,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    match expr {
        Value::Array(items) if items.len() == 1 => compute_value(obj, &items[0], None, options),
        _ => compute_value(obj, expr, None, options),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::evaluator::evaluate;
    use crate::options::{ComputeOptions, Options};
    use crate::value::Value;

    pub fn eval(doc: serde_json::Value, expr: serde_json::Value) -> crate::error::Result<Value> {
        let opts = Options::default();
        evaluate(&Value::from(doc), &Value::from(expr), &ComputeOptions::new(&opts))
    }

    pub fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }
}
