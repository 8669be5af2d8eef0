//! Integration tests for the `Query` façade and its cursor

use docql_core::{CollationSpec, EngineConfig, Lazy, Options, Query, Value};
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;

fn v(j: serde_json::Value) -> Value {
    Value::from(j)
}

fn inventory() -> Vec<Value> {
    v(json!([
        {"_id": 1, "item": "journal", "qty": 25, "tags": ["blank", "red"], "size": {"h": 14, "w": 21}},
        {"_id": 2, "item": "notebook", "qty": 50, "tags": ["red", "blank"], "size": {"h": 8.5, "w": 11}},
        {"_id": 3, "item": "paper", "qty": 100, "tags": ["red", "blank", "plain"], "size": {"h": 8.5, "w": 11}},
        {"_id": 4, "item": "planner", "qty": 75, "tags": ["blank", "red"], "size": {"h": 22.85, "w": 30}},
        {"_id": 5, "item": "postcard", "qty": 45, "tags": ["blue"], "size": {"h": 10, "w": 15.25}}
    ]))
    .into_array()
}

fn ids(docs: &[Value]) -> Vec<i64> {
    docs.iter()
        .filter_map(|d| d.get("_id").and_then(Value::as_i64))
        .collect()
}

#[test]
fn test_find_sort_skip_limit_project() {
    let query = Query::new(v(json!({"tags": "red"})), Options::default()).unwrap();
    let out = query
        .find(Lazy::new(inventory()), Some(v(json!({"item": 1, "qty": 1}))))
        .sort(v(json!({"qty": -1})))
        .skip(1)
        .limit(2)
        .all()
        .unwrap();
    assert_eq!(
        out,
        v(json!([
            {"_id": 4, "item": "planner", "qty": 75},
            {"_id": 2, "item": "notebook", "qty": 50}
        ]))
        .into_array()
    );
}

#[test]
fn test_cursor_is_lazy() {
    let pulled = Rc::new(Cell::new(0usize));
    let counter = pulled.clone();
    let mut source = inventory().into_iter();
    let stream = Lazy::from_fn(move || {
        counter.set(counter.get() + 1);
        source.next()
    });

    let query = Query::new(v(json!({"qty": {"$gt": 30}})), Options::default()).unwrap();
    let mut cursor = query.find(stream, None).limit(1);
    assert_eq!(pulled.get(), 0);
    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.get("_id"), Some(&Value::from(2)));
    assert_eq!(pulled.get(), 2);
    assert!(cursor.next().is_none());
}

#[test]
fn test_count_and_remove() {
    let query = Query::new(
        v(json!({"$or": [{"size.h": {"$lt": 9}}, {"item": {"$regex": "^p", "$options": "i"}}]})),
        Options::default(),
    )
    .unwrap();
    assert_eq!(query.find(Lazy::new(inventory()), None).count().unwrap(), 4);
    assert_eq!(ids(&query.remove(inventory()).unwrap()), vec![1]);
}

#[test]
fn test_collation_on_cursor() {
    let docs = v(json!([{"n": "b"}, {"n": "B"}, {"n": "a"}, {"n": "item10"}, {"n": "item9"}])).into_array();
    let query = Query::new(v(json!({})), Options::default()).unwrap();

    let mut spec = CollationSpec::new("en");
    spec.strength = 2;
    spec.numeric_ordering = true;
    let out = query
        .find(Lazy::new(docs.clone()), Some(v(json!({"_id": 0}))))
        .sort(v(json!({"n": 1})))
        .collation(spec)
        .all()
        .unwrap();
    let names: Vec<&str> = out.iter().filter_map(|d| d.get("n").and_then(Value::as_str)).collect();
    assert_eq!(names, vec!["a", "b", "B", "item9", "item10"]);

    let plain = query
        .find(Lazy::new(docs), None)
        .sort(v(json!({"n": 1})))
        .all()
        .unwrap();
    let names: Vec<&str> = plain.iter().filter_map(|d| d.get("n").and_then(Value::as_str)).collect();
    assert_eq!(names, vec!["B", "a", "b", "item10", "item9"]);
}

#[test]
fn test_expr_uses_config_variables() {
    let config = EngineConfig::from_toml_str("[variables]\nminimum = 60\n").unwrap();
    let options = Options::from_config(&config);
    let query = Query::new(v(json!({"$expr": {"$gte": ["$qty", "$$minimum"]}})), options).unwrap();
    let out = query.find(Lazy::new(inventory()), None).all().unwrap();
    assert_eq!(ids(&out), vec![3, 4]);
}

#[test]
fn test_custom_id_key() {
    let options = Options::default().with_id_key("key");
    let docs = v(json!([{"key": "x", "_id": 1, "a": 1}])).into_array();
    let query = Query::new(v(json!({})), options).unwrap();
    let out = query.find(Lazy::new(docs), Some(v(json!({"a": 1})))).all().unwrap();
    assert_eq!(out, v(json!([{"key": "x", "a": 1}])).into_array());
}

#[test]
fn test_invalid_filters() {
    let opts = Options::default();
    assert!(Query::new(v(json!({"a": {"$nope": 1}})), opts.clone()).is_err());
    assert!(Query::new(v(json!({"$bogus": []})), opts.clone()).is_err());
    assert!(Query::new(v(json!([1, 2])), opts.clone()).is_err());
    assert!(Query::new(v(json!({"$where": "nothing"})), opts.with_script_enabled(false)).is_err());
}
