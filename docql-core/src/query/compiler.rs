//! Query condition compiler
//!
//! Turns a filter document into an ordered list of predicates whose
//! conjunction is the match test. Shorthand is normalized first: a bare value
//! becomes `$eq`, a regex becomes `$regex`, and a `$regex` with `$options`
//! is folded into a single regex value.

use crate::context::{is_operator, Predicate};
use crate::error::{bail, ensure, Result};
use crate::options::Options;
use crate::value::{Map, RegexValue, Value};

/// Top-level keys dispatched straight to their operator
const TOP_LEVEL_OPERATORS: [&str; 5] = ["$and", "$or", "$nor", "$expr", "$jsonSchema"];

/// Compile a filter document into predicates, in key order.
///
/// A `$where` clause is always compiled last.
pub fn compile(condition: &Value, options: &Options) -> Result<Vec<Predicate>> {
    let Some(fields) = condition.as_object() else {
        bail!("query criteria must be an object: {}", condition);
    };

    let mut compiled = Vec::with_capacity(fields.len());
    let mut where_clause = None;

    for (field, expr) in fields {
        if field == "$where" {
            ensure!(
                options.script_enabled(),
                "$where operator requires 'script_enabled' option to be true."
            );
            where_clause = Some(expr);
        } else if TOP_LEVEL_OPERATORS.contains(&field.as_str()) {
            compiled.push(process_operator(field, field, expr, options)?);
        } else {
            ensure!(!is_operator(field), "unknown top level operator: {}", field);
            let normalized = normalize(expr)?;
            if let Value::Object(ops) = &normalized {
                for (operator, value) in ops {
                    compiled.push(process_operator(field, operator, value, options)?);
                }
            }
        }
    }

    if let Some(expr) = where_clause {
        compiled.push(process_operator("$where", "$where", expr, options)?);
    }

    Ok(compiled)
}

fn process_operator(
    field: &str,
    operator: &str,
    value: &Value,
    options: &Options,
) -> Result<Predicate> {
    let Some(call) = options.query_operator(operator) else {
        bail!("unknown query operator {}", operator);
    };
    call(field, value, options)
}

/// Normalize a field condition into an object of operators
pub fn normalize(expr: &Value) -> Result<Value> {
    let single = |op: &str, value: Value| -> Result<Value> {
        let mut map = Map::new();
        map.insert(op.to_string(), value);
        Ok(Value::Object(map))
    };

    match expr {
        Value::Regex(_) => single("$regex", expr.clone()),
        Value::Object(ops) if !ops.keys().any(|k| is_operator(k)) => single("$eq", expr.clone()),
        Value::Object(ops) if ops.contains_key("$regex") => {
            let options = match ops.get("$options") {
                Some(Value::String(o)) => Some(o.clone()),
                Some(_) => bail!("$options has to be a string"),
                None => None,
            };
            let regex = match ops.get("$regex") {
                Some(Value::String(pattern)) => {
                    RegexValue::new(pattern.clone(), options.unwrap_or_default())
                }
                Some(Value::Regex(re)) => match options {
                    Some(o) => RegexValue::new(re.pattern.clone(), o),
                    None => re.clone(),
                },
                _ => bail!("$regex has to be a string or a regex"),
            };
            regex.compile()?;
            let mut normalized = Map::with_capacity(ops.len());
            for (key, value) in ops {
                match key.as_str() {
                    "$options" => {}
                    "$regex" => {
                        normalized.insert(key.clone(), Value::Regex(regex.clone()));
                    }
                    _ => {
                        normalized.insert(key.clone(), value.clone());
                    }
                }
            }
            Ok(Value::Object(normalized))
        }
        Value::Object(_) => Ok(expr.clone()),
        other => single("$eq", other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_normalize_shorthand() {
        assert_eq!(normalize(&Value::Int64(5)).unwrap(), v(json!({"$eq": 5})));
        assert_eq!(normalize(&v(json!({"a": 1}))).unwrap(), v(json!({"$eq": {"a": 1}})));
        assert_eq!(normalize(&v(json!([1, 2]))).unwrap(), v(json!({"$eq": [1, 2]})));
        assert_eq!(normalize(&v(json!({"$gt": 1}))).unwrap(), v(json!({"$gt": 1})));

        let re = Value::Regex(RegexValue::new("^a", ""));
        assert_eq!(normalize(&re).unwrap().get("$regex"), Some(&re));
    }

    #[test]
    fn test_normalize_regex_options() {
        let out = normalize(&v(json!({"$regex": "^ab", "$options": "i"}))).unwrap();
        let obj = out.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(
            obj.get("$regex"),
            Some(&Value::Regex(RegexValue::new("^ab", "i")))
        );
        assert!(normalize(&v(json!({"$regex": "("}))).is_err());
    }

    #[test]
    fn test_compile_rejects_unknown_operators() {
        let opts = Options::default();
        let err = compile(&v(json!({"$bogus": 1})), &opts).err().unwrap();
        assert_eq!(err.message(), "unknown top level operator: $bogus");
        let err = compile(&v(json!({"a": {"$bogus": 1}})), &opts).err().unwrap();
        assert_eq!(err.message(), "unknown query operator $bogus");
        assert!(compile(&Value::Int64(1), &opts).is_err());
    }

    #[test]
    fn test_compile_counts_clauses() {
        let opts = Options::default();
        let preds = compile(&v(json!({"a": {"$gt": 1, "$lt": 5}, "b": 2, "$or": [{"c": 1}]})), &opts).unwrap();
        assert_eq!(preds.len(), 4);
    }

    #[test]
    fn test_where_requires_scripts() {
        let opts = Options::default().with_script_enabled(false);
        let err = compile(&v(json!({"$where": "check"})), &opts).err().unwrap();
        assert!(err.message().contains("script_enabled"));
    }
}
