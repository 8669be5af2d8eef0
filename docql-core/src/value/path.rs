//! Dotted path utilities
//!
//! Paths are dot-separated field names; purely numeric segments index into
//! arrays. When a named segment meets an array, resolution fans out over the
//! array elements, which is how `"items.price"` reaches every element.

use super::{Map, Value};

/// Options for `resolve_graph`
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOptions {
    /// Keep array slots for elements without the path, marked `Missing`
    pub preserve_missing: bool,
    /// Keep sibling keys of each object on the path
    pub preserve_keys: bool,
}

pub(crate) fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Highest array index a write may pad up to
const MAX_PADDED_INDEX: usize = 1 << 20;

/// Slot `idx` of an array, padding with nulls when it lies past the end.
/// Indices beyond `MAX_PADDED_INDEX` are never padded.
fn padded_slot(items: &mut Vec<Value>, idx: usize) -> Option<&mut Value> {
    if idx >= items.len() {
        if idx > MAX_PADDED_INDEX {
            return None;
        }
        items.resize(idx + 1, Value::Null);
    }
    items.get_mut(idx)
}

/// Read one path segment from an object or array
pub(crate) fn get_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    match value {
        Value::Object(obj) => obj.get(field).filter(|v| !v.is_missing()),
        Value::Array(items) if is_index(field) => {
            field.parse::<usize>().ok().and_then(|idx| items.get(idx))
        }
        _ => None,
    }
}

/// Resolve a dotted path; the result is `Missing` when nothing is found
pub fn resolve(obj: &Value, selector: &str) -> Value {
    resolve_with(obj, selector, false)
}

/// Resolve a dotted path, optionally unwrapping single-element arrays
/// produced by fanning out over nested arrays.
pub fn resolve_with(obj: &Value, selector: &str, unwrap_array: bool) -> Value {
    if !matches!(obj, Value::Object(_) | Value::Array(_)) {
        return Value::Missing;
    }
    let path: Vec<&str> = selector.split('.').collect();
    let mut depth = 0usize;
    let result = resolve_path(obj, &path, &mut depth);
    if unwrap_array && result.is_array() {
        unwrap(result, depth)
    } else {
        result
    }
}

fn resolve_path(obj: &Value, path: &[&str], depth: &mut usize) -> Value {
    let mut value = obj;
    for (i, field) in path.iter().enumerate() {
        if let Value::Array(items) = value {
            if !is_index(field) {
                // stop when a nested array is reached on the first segment
                if i == 0 && *depth > 0 {
                    return value.clone();
                }
                *depth += 1;
                let rest = &path[i..];
                let collected = items
                    .iter()
                    .map(|item| resolve_path(item, rest, depth))
                    .filter(|v| !v.is_missing())
                    .collect();
                return Value::Array(collected);
            }
        }
        match get_field(value, field) {
            Some(next) => value = next,
            None => return Value::Missing,
        }
    }
    value.clone()
}

fn unwrap(mut value: Value, mut depth: usize) -> Value {
    while depth > 0 {
        depth -= 1;
        value = match value {
            Value::Array(mut items) if items.len() == 1 => items.swap_remove(0),
            other => return other,
        };
    }
    value
}

/// Resolve the full object graph leading to a path.
///
/// The result keeps the containing structure, e.g. `{a: [{b: 1}]}` for the
/// path `a.b`, so several graphs can be merged back into one document.
/// `None` means the path does not exist.
pub fn resolve_graph(obj: &Value, selector: &str, options: GraphOptions) -> Option<Value> {
    let (key, next) = match selector.split_once('.') {
        Some((key, rest)) => (key, Some(rest)),
        None => (selector, None),
    };

    match obj {
        Value::Array(_) if is_index(key) => {
            let item = get_field(obj, key)?;
            let value = match next {
                Some(rest) => resolve_graph(item, rest, options)?,
                None => item.clone(),
            };
            Some(Value::Array(vec![value]))
        }
        Value::Array(items) => {
            let mut result = Vec::with_capacity(items.len());
            for item in items {
                match resolve_graph(item, selector, options) {
                    Some(value) => result.push(value),
                    None if options.preserve_missing => result.push(Value::Missing),
                    None => {}
                }
            }
            Some(Value::Array(result))
        }
        _ => {
            let item = get_field(obj, key)?;
            let value = match next {
                Some(rest) => resolve_graph(item, rest, options)?,
                None => item.clone(),
            };
            let mut result = match (options.preserve_keys, obj) {
                (true, Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            result.insert(key.to_string(), value);
            Some(Value::Object(result))
        }
    }
}

/// Remove `Missing` placeholders left by `resolve_graph`
pub fn filter_missing(value: &mut Value) {
    match value {
        Value::Array(items) => {
            items.retain(|v| !v.is_missing());
            items.iter_mut().for_each(filter_missing);
        }
        Value::Object(obj) => {
            obj.retain(|_, v| !v.is_missing());
            obj.values_mut().for_each(filter_missing);
        }
        _ => {}
    }
}

/// Deep merge `input` into `target`.
///
/// Objects merge key by key and arrays index by index; any other input
/// replaces the target. A missing or null input leaves the target untouched.
pub fn merge(target: &mut Value, input: Value) {
    if input.is_nil() {
        return;
    }
    if target.is_nil() {
        *target = input;
        return;
    }
    let input = match (&mut *target, input) {
        (Value::Array(dst), Value::Array(src)) => {
            let mut src = src.into_iter();
            for slot in dst.iter_mut() {
                match src.next() {
                    Some(item) => merge(slot, item),
                    None => break,
                }
            }
            dst.extend(src);
            return;
        }
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
            return;
        }
        (_, input) => input,
    };
    *target = input;
}

/// Walk a path and apply `f` to the container holding the last segment
fn walk(
    obj: &mut Value,
    names: &[&str],
    f: &mut dyn FnMut(&mut Value, &str),
    build_graph: bool,
    descend_array: bool,
) {
    let Some((key, rest)) = names.split_first() else {
        return;
    };
    if rest.is_empty() {
        if matches!(obj, Value::Object(_) | Value::Array(_)) {
            f(obj, *key);
        }
        return;
    }

    let item = match obj {
        Value::Object(map) => {
            if build_graph && map.get(*key).map_or(true, Value::is_nil) {
                map.insert(key.to_string(), Value::object());
            }
            map.get_mut(*key)
        }
        Value::Array(items) if is_index(key) => {
            let idx = key.parse::<usize>().unwrap_or(usize::MAX);
            if build_graph {
                if let Some(slot) = padded_slot(items, idx).filter(|slot| slot.is_nil()) {
                    *slot = Value::object();
                }
            }
            items.get_mut(idx)
        }
        _ => None,
    };
    let Some(item) = item else {
        return;
    };

    let next_is_index = rest.first().map_or(false, |n| is_index(n));
    match item {
        Value::Array(elements) if descend_array && !next_is_index => {
            for element in elements.iter_mut() {
                walk(element, rest, f, build_graph, descend_array);
            }
        }
        other => walk(other, rest, f, build_graph, descend_array),
    }
}

/// Set the value at a path, creating intermediate objects as needed.
/// Array slots beyond the current length are padded with nulls; an index
/// too large to pad leaves the document unchanged.
pub fn set_value(obj: &mut Value, selector: &str, value: Value) {
    let names: Vec<&str> = selector.split('.').collect();
    let mut assign = |container: &mut Value, key: &str| match container {
        Value::Object(map) => {
            map.insert(key.to_string(), value.clone());
        }
        Value::Array(items) if is_index(key) => {
            if let Some(slot) = key.parse::<usize>().ok().and_then(|idx| padded_slot(items, idx)) {
                *slot = value.clone();
            }
        }
        _ => {}
    };
    walk(obj, &names, &mut assign, true, false);
}

/// Remove the value at a path
pub fn remove_value(obj: &mut Value, selector: &str, descend_array: bool) {
    let names: Vec<&str> = selector.split('.').collect();
    let mut remove = |container: &mut Value, key: &str| match container {
        Value::Object(map) => {
            map.shift_remove(key);
        }
        Value::Array(items) if is_index(key) => {
            if let Ok(idx) = key.parse::<usize>() {
                if idx < items.len() {
                    items.remove(idx);
                }
            }
        }
        Value::Array(items) if descend_array => {
            for item in items.iter_mut() {
                if let Value::Object(map) = item {
                    map.shift_remove(key);
                }
            }
        }
        _ => {}
    };
    walk(obj, &names, &mut remove, false, descend_array);
}

/// Flatten nested arrays up to `depth` levels
pub fn flatten(items: &[Value], depth: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(inner) if depth > 0 => out.extend(flatten(inner, depth - 1)),
            other => out.push(other.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_resolve_simple_and_indexed() {
        let doc = v(json!({"a": {"b": [10, 20, {"c": 5}]}}));
        assert_eq!(resolve(&doc, "a.b.1"), Value::Int64(20));
        assert_eq!(resolve(&doc, "a.b.2.c"), Value::Int64(5));
        assert!(resolve(&doc, "a.x").is_missing());
        assert!(resolve(&Value::Int64(3), "a").is_missing());
    }

    #[test]
    fn test_resolve_fans_out_over_arrays() {
        let doc = v(json!({"items": [{"p": 1}, {"q": 2}, {"p": 3}]}));
        assert_eq!(resolve(&doc, "items.p"), v(json!([1, 3])));
    }

    #[test]
    fn test_resolve_unwrap_nested_single() {
        let doc = v(json!({"a": [{"b": [{"c": ["123"]}]}]}));
        assert_eq!(resolve(&doc, "a.b.c"), v(json!([[["123"]]])));
        assert_eq!(resolve_with(&doc, "a.b.c", true), v(json!(["123"])));
    }

    #[test]
    fn test_resolve_graph() {
        let doc = v(json!({"a": [{"b": 1, "c": 2}, {"c": 3}], "d": 4}));
        let graph = resolve_graph(&doc, "a.b", GraphOptions::default()).unwrap();
        assert_eq!(graph, v(json!({"a": [{"b": 1}]})));

        let opts = GraphOptions { preserve_missing: true, ..Default::default() };
        let mut graph = resolve_graph(&doc, "a.b", opts).unwrap();
        assert!(graph.get("a").unwrap().as_array().unwrap()[1].is_missing());
        filter_missing(&mut graph);
        assert_eq!(graph, v(json!({"a": [{"b": 1}]})));

        assert!(resolve_graph(&doc, "x.y", GraphOptions::default()).is_none());
    }

    #[test]
    fn test_set_value_builds_graph() {
        let mut doc = v(json!({"a": 1}));
        set_value(&mut doc, "b.c.d", Value::Int64(2));
        assert_eq!(doc, v(json!({"a": 1, "b": {"c": {"d": 2}}})));

        let mut doc = v(json!({"arr": [1]}));
        set_value(&mut doc, "arr.3", Value::Int64(9));
        assert_eq!(doc, v(json!({"arr": [1, null, null, 9]})));
    }

    #[test]
    fn test_set_value_ignores_unpaddable_index() {
        let mut doc = v(json!({"a": [1, 2]}));
        set_value(&mut doc, "a.18446744073709551615", Value::Int64(1));
        set_value(&mut doc, "a.99999999999", Value::Int64(1));
        set_value(&mut doc, "a.99999999999.b", Value::Int64(1));
        set_value(&mut doc, "a.99999999999999999999999", Value::Int64(1));
        assert_eq!(doc, v(json!({"a": [1, 2]})));

        set_value(&mut doc, "a.1.b", Value::Int64(3));
        assert_eq!(doc, v(json!({"a": [1, 2]})));
        set_value(&mut doc, "a.2.b", Value::Int64(3));
        assert_eq!(doc, v(json!({"a": [1, 2, {"b": 3}]})));
    }

    #[test]
    fn test_remove_value() {
        let mut doc = v(json!({"a": {"b": 1, "c": 2}}));
        remove_value(&mut doc, "a.b", false);
        assert_eq!(doc, v(json!({"a": {"c": 2}})));

        let mut doc = v(json!({"a": [{"b": 1, "c": 2}, {"b": 3}]}));
        remove_value(&mut doc, "a.b", true);
        assert_eq!(doc, v(json!({"a": [{"c": 2}, {}]})));
    }

    #[test]
    fn test_merge() {
        let mut target = v(json!({"a": [{"x": 1}, {"x": 2}], "b": 1}));
        merge(&mut target, v(json!({"a": [{"y": 1}], "c": 3})));
        assert_eq!(target, v(json!({"a": [{"x": 1, "y": 1}, {"x": 2}], "b": 1, "c": 3})));

        let mut target = Value::Missing;
        merge(&mut target, Value::Int64(1));
        assert_eq!(target, Value::Int64(1));

        let mut target = Value::Int64(1);
        merge(&mut target, Value::Missing);
        assert_eq!(target, Value::Int64(1));
    }

    #[test]
    fn test_flatten() {
        let items = vec![v(json!([1, [2, [3]]])), Value::Int64(4)];
        assert_eq!(flatten(&items, 1), vec![Value::Int64(1), v(json!([2, [3]])), Value::Int64(4)]);
        assert_eq!(flatten(&items, usize::MAX).len(), 4);
    }
}
