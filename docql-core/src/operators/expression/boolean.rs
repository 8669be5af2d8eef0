//! Boolean expression operators

use super::{compute_args, compute_single};
use crate::error::Result;
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::Value;

fn operands(expr: &Value) -> Vec<Value> {
    match expr {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

pub fn and(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let strict = options.use_strict_mode();
    for operand in operands(expr) {
        if !compute_value(obj, &operand, None, options)?.is_truthy(strict) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn or(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let strict = options.use_strict_mode();
    for operand in operands(expr) {
        if compute_value(obj, &operand, None, options)?.is_truthy(strict) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

pub fn not(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let value = match expr {
        Value::Array(items) if items.len() == 1 => compute_single(obj, expr, options)?,
        Value::Array(_) => Value::Array(compute_args(obj, expr, options)?),
        _ => compute_value(obj, expr, None, options)?,
    };
    Ok(Value::Bool(!value.is_truthy(options.use_strict_mode())))
}

#[cfg(test)]
mod tests {
    use super::super::test_util::eval;
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_and_or_not() {
        let doc = json!({"a": 1, "z": 0, "s": ""});
        assert_eq!(eval(doc.clone(), json!({"$and": ["$a", true]})).unwrap(), Value::Bool(true));
        assert_eq!(eval(doc.clone(), json!({"$and": ["$a", "$z"]})).unwrap(), Value::Bool(false));
        assert_eq!(eval(doc.clone(), json!({"$or": ["$z", "$missing"]})).unwrap(), Value::Bool(false));
        assert_eq!(eval(doc.clone(), json!({"$or": ["$s"]})).unwrap(), Value::Bool(true));
        assert_eq!(eval(doc.clone(), json!({"$not": ["$z"]})).unwrap(), Value::Bool(true));
        assert_eq!(eval(doc, json!({"$not": "$a"})).unwrap(), Value::Bool(false));
    }
}
