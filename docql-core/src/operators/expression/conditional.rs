//! Conditional expression operators
//!
//! Only the selected branch is evaluated.

use crate::error::{bail, Result};
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::Value;

pub fn cond(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let (test, then, otherwise) = match expr {
        Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Value::Object(map) => match (map.get("if"), map.get("then"), map.get("else")) {
            (Some(i), Some(t), Some(e)) if map.len() == 3 => (i, t, e),
            _ => bail!("$cond requires 'if', 'then' and 'else' fields"),
        },
        _ => bail!("$cond expects an array of 3 arguments or an object"),
    };
    let branch = if compute_value(obj, test, None, options)?.is_truthy(options.use_strict_mode()) {
        then
    } else {
        otherwise
    };
    compute_value(obj, branch, None, options)
}

pub fn if_null(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let Some((replacement, candidates)) = expr.as_array().and_then(|a| a.split_last()) else {
        bail!("$ifNull expects an array of at least 2 arguments");
    };
    if candidates.is_empty() {
        bail!("$ifNull expects an array of at least 2 arguments");
    }
    for candidate in candidates {
        let value = compute_value(obj, candidate, None, options)?;
        if !value.is_nil() {
            return Ok(value);
        }
    }
    compute_value(obj, replacement, None, options)
}

pub fn switch(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let Some(spec) = expr.as_object() else {
        bail!("$switch expects an object");
    };
    let Some(branches) = spec.get("branches").and_then(Value::as_array) else {
        bail!("$switch requires an array of branches");
    };
    for branch in branches {
        let (Some(case), Some(then)) = (branch.get("case"), branch.get("then")) else {
            bail!("$switch branch requires 'case' and 'then' fields");
        };
        if compute_value(obj, case, None, options)?.is_truthy(options.use_strict_mode()) {
            return compute_value(obj, then, None, options);
        }
    }
    match spec.get("default") {
        Some(default) => compute_value(obj, default, None, options),
        None => bail!(
            "$switch could not find a matching branch for an input, and no default was specified."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::eval;
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_cond_forms() {
        let doc = json!({"qty": 300});
        let expr = json!({"$cond": {"if": {"$gte": ["$qty", 250]}, "then": 30, "else": 20}});
        assert_eq!(eval(doc.clone(), expr).unwrap(), Value::Int64(30));
        let expr = json!({"$cond": [{"$lt": ["$qty", 250]}, 30, 20]});
        assert_eq!(eval(doc.clone(), expr).unwrap(), Value::Int64(20));
        assert!(eval(doc, json!({"$cond": {"if": true}})).is_err());
    }

    #[test]
    fn test_if_null() {
        let doc = json!({"a": null, "b": 2});
        assert_eq!(eval(doc.clone(), json!({"$ifNull": ["$a", "$x", "$b"]})).unwrap(), Value::Int64(2));
        assert_eq!(eval(doc, json!({"$ifNull": ["$b", 0]})).unwrap(), Value::Int64(2));
    }

    #[test]
    fn test_switch() {
        let expr = json!({"$switch": {
            "branches": [
                {"case": {"$lt": ["$n", 0]}, "then": "neg"},
                {"case": {"$gt": ["$n", 0]}, "then": "pos"}
            ],
            "default": "zero"
        }});
        assert_eq!(eval(json!({"n": 4}), expr.clone()).unwrap(), Value::from("pos"));
        assert_eq!(eval(json!({"n": 0}), expr).unwrap(), Value::from("zero"));
        let no_default = json!({"$switch": {"branches": [{"case": false, "then": 1}]}});
        assert!(eval(json!({}), no_default).is_err());
    }
}
