//! Canonical stringification and stable hashing
//!
//! `stringify` renders a value so that equal values produce identical text:
//! object keys are sorted, missing fields are skipped and integral floats are
//! printed as integers. The default hash is xxHash3 over that text, which
//! keeps hashing coherent with `is_equal`.

use super::{is_equal, Value};
use crate::error::Result;
use chrono::SecondsFormat;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Host-supplied replacement for the default hash
pub type HashFunction = Arc<dyn Fn(&Value) -> u64 + Send + Sync>;

/// Render a value in canonical form
pub fn stringify(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Missing => out.push_str("undefined"),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        Value::Int64(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float64(f) => write_float(*f, out),
        Value::String(s) => {
            let _ = write!(out, "{}", serde_json::Value::String(s.clone()));
        }
        Value::DateTime(d) => {
            let _ = write!(out, "Date({})", d.to_rfc3339_opts(SecondsFormat::Nanos, true));
        }
        Value::Binary(b) => {
            let _ = write!(out, "Binary({})", hex::encode(b));
        }
        Value::Regex(r) => {
            let _ = write!(out, "/{}/{}", r.pattern, r.options);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj
                .iter()
                .filter(|(_, v)| !v.is_missing())
                .map(|(k, _)| k)
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", serde_json::Value::String(key.clone()));
                if let Some(v) = obj.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

fn write_float(f: f64, out: &mut String) {
    if f.is_nan() {
        out.push_str("NaN");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "Infinity" } else { "-Infinity" });
    } else if f.fract() == 0.0 && f.abs() < 9_223_372_036_854_775_808.0 {
        let _ = write!(out, "{}", f as i64);
    } else {
        let _ = write!(out, "{:?}", f);
    }
}

/// Stable 64-bit hash, using the custom function when one is configured
pub fn hash_code(value: &Value, custom: Option<&HashFunction>) -> u64 {
    match custom {
        Some(hash) => hash(value),
        None => xxh3_64(stringify(value).as_bytes()),
    }
}

/// Partition items by a computed key.
///
/// Keys are bucketed by hash and then chained by equality, so structurally
/// equal keys collapse into one group. Groups are returned in the order their
/// key was first seen; items keep their input order inside a group.
pub fn group_by<F>(
    items: Vec<Value>,
    mut key_fn: F,
    custom: Option<&HashFunction>,
) -> Result<Vec<(Value, Vec<Value>)>>
where
    F: FnMut(&Value) -> Result<Value>,
{
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();

    for item in items {
        let key = key_fn(&item)?;
        let chain = buckets.entry(hash_code(&key, custom)).or_default();
        match chain.iter().copied().find(|&idx| is_equal(&groups[idx].0, &key)) {
            Some(idx) => groups[idx].1.push(item),
            None => {
                chain.push(groups.len());
                groups.push((key, vec![item]));
            }
        }
    }

    Ok(groups)
}

/// Remove duplicates, keeping the first occurrence of each value
pub fn unique(items: &[Value], custom: Option<&HashFunction>) -> Vec<Value> {
    let mut seen: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        let chain = seen.entry(hash_code(item, custom)).or_default();
        if !chain.iter().any(|&idx| is_equal(&out[idx], item)) {
            chain.push(out.len());
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stringify_canonical() {
        let a = Value::from(json!({"b": 1.0, "a": "x"}));
        assert_eq!(stringify(&a), r#"{"a":"x","b":1}"#);
        assert_eq!(stringify(&Value::Float64(2.5)), "2.5");
        assert_eq!(stringify(&Value::Missing), "undefined");
    }

    #[test]
    fn test_hash_coherent_with_equality() {
        let a = Value::from(json!({"x": [1, {"y": 2}], "z": null}));
        let b = Value::from(json!({"z": null, "x": [1.0, {"y": 2.0}]}));
        assert!(is_equal(&a, &b));
        assert_eq!(hash_code(&a, None), hash_code(&b, None));
    }

    #[test]
    fn test_custom_hash() {
        let constant: HashFunction = Arc::new(|_| 7);
        assert_eq!(hash_code(&Value::Int64(1), Some(&constant)), 7);
    }

    #[test]
    fn test_group_by_first_seen_order() {
        let items: Vec<Value> = [3, 1, 3, 2, 1].iter().map(|&i| Value::Int64(i)).collect();
        let groups = group_by(items, |v| Ok(v.clone()), None).unwrap();
        let keys: Vec<_> = groups.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Value::Int64(3), Value::Int64(1), Value::Int64(2)]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn test_group_by_with_colliding_hash() {
        let constant: HashFunction = Arc::new(|_| 0);
        let items = vec![Value::from("a"), Value::from("b"), Value::from("a")];
        let groups = group_by(items, |v| Ok(v.clone()), Some(&constant)).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_unique() {
        let items = vec![Value::Int64(1), Value::Float64(1.0), Value::Int64(2)];
        assert_eq!(unique(&items, None), vec![Value::Int64(1), Value::Int64(2)]);
    }
}
