//! Array expression operators

use super::{compute_args, compute_single};
use crate::error::{bail, ensure, Result};
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::{is_equal, Map, Value};

fn bind(name: &str, value: Value) -> Map {
    let mut vars = Map::new();
    vars.insert(name.to_string(), value);
    vars
}

fn variable_name(spec: &Map, op: &str) -> Result<String> {
    match spec.get("as") {
        None => Ok("this".to_string()),
        Some(Value::String(name)) => Ok(name.clone()),
        Some(_) => bail!("{} 'as' must be a string", op),
    }
}

fn input_array(
    op: &str,
    obj: &Value,
    spec: &Map,
    options: &ComputeOptions<'_>,
) -> Result<Option<Vec<Value>>> {
    let input = spec.get("input").cloned().unwrap_or(Value::Missing);
    match compute_value(obj, &input, None, options)? {
        Value::Array(items) => Ok(Some(items)),
        Value::Missing | Value::Null => Ok(None),
        other => bail!("{} 'input' must resolve to an array, got {}", op, other.type_name()),
    }
}

pub fn array_elem_at(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let [array, index] = args.as_slice() else {
        bail!("$arrayElemAt expects an array of 2 arguments");
    };
    if array.is_nil() || index.is_nil() {
        return Ok(Value::Null);
    }
    let (Some(items), Some(idx)) = (array.as_array(), index.as_i64()) else {
        bail!("$arrayElemAt expects an array and an integer index");
    };
    let len = items.len() as i64;
    let position = if idx < 0 { len + idx } else { idx };
    Ok(usize::try_from(position)
        .ok()
        .and_then(|p| items.get(p))
        .cloned()
        .unwrap_or(Value::Missing))
}

pub fn concat_arrays(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let mut out = Vec::new();
    for arg in compute_args(obj, expr, options)? {
        match arg {
            Value::Array(items) => out.extend(items),
            Value::Missing | Value::Null => return Ok(Value::Null),
            other => bail!("$concatArrays only supports arrays, got {}", other.type_name()),
        }
    }
    Ok(Value::Array(out))
}

pub fn filter(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let Some(spec) = expr.as_object() else {
        bail!("$filter expects an object");
    };
    let name = variable_name(spec, "$filter")?;
    let Some(items) = input_array("$filter", obj, spec, options)? else {
        return Ok(Value::Null);
    };
    let cond = spec.get("cond").cloned().unwrap_or(Value::Bool(true));
    let limit = match spec.get("limit") {
        Some(limit) => match compute_value(obj, limit, None, options)?.as_i64() {
            Some(n) if n >= 1 => n as usize,
            _ => bail!("$filter 'limit' must be a positive integer"),
        },
        None => usize::MAX,
    };
    let strict = options.use_strict_mode();
    let mut out = Vec::new();
    for item in items {
        if out.len() >= limit {
            break;
        }
        let frame = options.with_variables(bind(&name, item.clone()));
        if compute_value(obj, &cond, None, &frame)?.is_truthy(strict) {
            out.push(item);
        }
    }
    Ok(Value::Array(out))
}

pub fn in_array(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let [needle, haystack] = args.as_slice() else {
        bail!("$in expects an array of 2 arguments");
    };
    let Some(items) = haystack.as_array() else {
        bail!("$in requires an array as a second argument, found {}", haystack.type_name());
    };
    Ok(Value::Bool(items.iter().any(|item| is_equal(item, needle))))
}

pub fn is_array(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    Ok(Value::Bool(compute_single(obj, expr, options)?.is_array()))
}

pub fn map(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let Some(spec) = expr.as_object() else {
        bail!("$map expects an object");
    };
    let name = variable_name(spec, "$map")?;
    let Some(items) = input_array("$map", obj, spec, options)? else {
        return Ok(Value::Null);
    };
    let Some(body) = spec.get("in") else {
        bail!("$map requires an 'in' expression");
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let frame = options.with_variables(bind(&name, item));
        out.push(compute_value(obj, body, None, &frame)?);
    }
    Ok(Value::Array(out))
}

pub fn reduce(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let Some(spec) = expr.as_object() else {
        bail!("$reduce expects an object");
    };
    let Some(items) = input_array("$reduce", obj, spec, options)? else {
        return Ok(Value::Null);
    };
    let (Some(initial), Some(body)) = (spec.get("initialValue"), spec.get("in")) else {
        bail!("$reduce requires 'initialValue' and 'in' expressions");
    };
    let mut acc = compute_value(obj, initial, None, options)?;
    for item in items {
        let mut vars = bind("value", acc);
        vars.insert("this".to_string(), item);
        acc = compute_value(obj, body, None, &options.with_variables(vars))?;
    }
    Ok(acc)
}

pub fn size(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    match compute_single(obj, expr, options)? {
        Value::Array(items) => Ok(Value::from(items.len())),
        other => bail!("$size requires an array, found {}", other.type_name()),
    }
}

pub fn slice(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let (array, position, count) = match args.as_slice() {
        [array, n] => (array, None, n),
        [array, position, n] => (array, Some(position), n),
        _ => bail!("$slice expects an array of 2 or 3 arguments"),
    };
    if array.is_nil() {
        return Ok(Value::Null);
    }
    let Some(items) = array.as_array() else {
        bail!("$slice requires an array as first argument");
    };
    let Some(n) = count.as_i64() else {
        bail!("$slice count must be an integer");
    };
    Ok(Value::Array(slice_items(items, position.and_then(Value::as_i64), n)?))
}

/// Shared `$slice` semantics for expressions and projections
pub(crate) fn slice_items(items: &[Value], position: Option<i64>, n: i64) -> Result<Vec<Value>> {
    let len = items.len() as i64;
    let (start, end) = match position {
        None if n < 0 => ((len + n).max(0), len),
        None => (0, n.min(len)),
        Some(pos) => {
            ensure!(n > 0, "$slice count must be positive when a position is given");
            let start = if pos < 0 { (len + pos).max(0) } else { pos.min(len) };
            (start, (start + n).min(len))
        }
    };
    Ok(items[start as usize..end as usize].to_vec())
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{eval, v};
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_elem_at_and_size() {
        let doc = json!({"a": [1, 2, 3]});
        assert_eq!(eval(doc.clone(), json!({"$arrayElemAt": ["$a", -1]})).unwrap(), Value::Int64(3));
        assert!(eval(doc.clone(), json!({"$arrayElemAt": ["$a", 5]})).unwrap().is_missing());
        assert_eq!(eval(doc.clone(), json!({"$size": "$a"})).unwrap(), Value::Int64(3));
        assert!(eval(doc, json!({"$size": 1})).is_err());
    }

    #[test]
    fn test_filter_map_reduce() {
        let doc = json!({"a": [1, 2, 3, 4], "k": 2});
        let filtered = eval(
            doc.clone(),
            json!({"$filter": {"input": "$a", "as": "n", "cond": {"$gt": ["$$n", "$k"]}}}),
        )
        .unwrap();
        assert_eq!(filtered, v(json!([3, 4])));

        let mapped = eval(doc.clone(), json!({"$map": {"input": "$a", "in": {"$multiply": ["$$this", 10]}}})).unwrap();
        assert_eq!(mapped, v(json!([10, 20, 30, 40])));

        let reduced = eval(
            doc,
            json!({"$reduce": {"input": "$a", "initialValue": 0, "in": {"$add": ["$$value", "$$this"]}}}),
        )
        .unwrap();
        assert_eq!(reduced, Value::Int64(10));
    }

    #[test]
    fn test_concat_in_slice() {
        let doc = json!({"a": [1, 2], "b": [3]});
        assert_eq!(eval(doc.clone(), json!({"$concatArrays": ["$a", "$b"]})).unwrap(), v(json!([1, 2, 3])));
        assert_eq!(eval(doc.clone(), json!({"$in": [2, "$a"]})).unwrap(), Value::Bool(true));
        assert_eq!(eval(doc.clone(), json!({"$slice": ["$a", -1]})).unwrap(), v(json!([2])));
        assert_eq!(eval(doc.clone(), json!({"$slice": [[1, 2, 3, 4], 1, 2]})).unwrap(), v(json!([2, 3])));
        assert_eq!(eval(doc, json!({"$isArray": ["$a"]})).unwrap(), Value::Bool(true));
    }
}
