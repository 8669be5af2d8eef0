//! Literal, variable and type expression operators

use super::compute_single;
use crate::error::{bail, Result};
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::{Map, Value};

pub fn literal(_obj: &Value, expr: &Value, _options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(expr.clone())
}

pub fn let_vars(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let Some(spec) = expr.as_object() else {
        bail!("$let expects an object");
    };
    let (Some(Value::Object(vars)), Some(body)) = (spec.get("vars"), spec.get("in")) else {
        bail!("$let requires 'vars' and 'in' fields");
    };
    let mut bound = Map::with_capacity(vars.len());
    for (name, value) in vars {
        bound.insert(name.clone(), compute_value(obj, value, None, options)?);
    }
    compute_value(obj, body, None, &options.with_variables(bound))
}

pub fn type_of(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::from(compute_single(obj, expr, options)?.type_name()))
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{eval, v};
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_literal_let_type() {
        assert_eq!(eval(json!({}), json!({"$literal": {"$add": 1}})).unwrap(), v(json!({"$add": 1})));
        let expr = json!({"$let": {"vars": {"total": {"$add": ["$a", "$b"]}}, "in": {"$multiply": ["$$total", 2]}}});
        assert_eq!(eval(json!({"a": 1, "b": 2}), expr).unwrap(), Value::Int64(6));
        assert_eq!(eval(json!({"a": "x"}), json!({"$type": "$a"})).unwrap(), Value::from("string"));
        assert_eq!(eval(json!({}), json!({"$type": "$a"})).unwrap(), Value::from("missing"));
    }
}
