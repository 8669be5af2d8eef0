//! End-to-end pipeline scenarios
//!
//! Each test runs a full pipeline through `Aggregator` with the default
//! options, the way a host application would.

use docql_core::context::Context;
use docql_core::options::Collection;
use docql_core::{compute_value, Aggregator, ComputeOptions, Options, Query, Value};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;

// =========================================================================
// Test Helpers
// =========================================================================

fn v(j: serde_json::Value) -> Value {
    Value::from(j)
}

fn docs(j: serde_json::Value) -> Vec<Value> {
    v(j).into_array()
}

fn aggregate(pipeline: serde_json::Value, input: serde_json::Value) -> Vec<Value> {
    Aggregator::new(v(pipeline), Options::default())
        .unwrap()
        .run(docs(input))
        .unwrap()
}

fn collection(j: serde_json::Value) -> Collection {
    Arc::new(RwLock::new(docs(j)))
}

fn negate(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> docql_core::Result<Value> {
    let n = compute_value(obj, expr, None, options)?;
    Ok(Value::from(-n.as_i64().unwrap_or_default()))
}

fn echo(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> docql_core::Result<Value> {
    compute_value(obj, expr, None, options)
}

// =========================================================================
// Scenarios
// =========================================================================

#[test]
fn test_bucket_with_default() {
    let out = aggregate(
        json!([{"$bucket": {"groupBy": "$score", "boundaries": [0, 50, 100], "default": 150}}]),
        json!([{"score": 20}, {"score": 55}, {"score": 95}, {"score": 120}, {"score": 75}]),
    );
    assert_eq!(
        out,
        docs(json!([
            {"_id": 0, "count": 1},
            {"_id": 50, "count": 3},
            {"_id": 150, "count": 1}
        ]))
    );
}

#[test]
fn test_group_follows_presort_order() {
    let out = aggregate(
        json!([
            {"$sort": {"_id": -1}},
            {"$group": {
                "_id": "$quiz",
                "first": {"$first": "$score"},
                "last": {"$last": "$score"},
                "sum": {"$sum": "$score"},
                "avg": {"$avg": "$score"},
                "max": {"$max": "$score"},
                "min": {"$min": "$score"}
            }}
        ]),
        json!([
            {"_id": 1, "quiz": 1, "score": 8},
            {"_id": 2, "quiz": 2, "score": 9},
            {"_id": 3, "quiz": 1, "score": 6},
            {"_id": 4, "quiz": 2, "score": 5},
            {"_id": 5, "quiz": 1, "score": 10},
            {"_id": 6, "quiz": 2, "score": 7}
        ]),
    );
    assert_eq!(
        out,
        docs(json!([
            {"_id": 2, "first": 7, "last": 9, "sum": 21, "avg": 7.0, "max": 9, "min": 5},
            {"_id": 1, "first": 10, "last": 8, "sum": 24, "avg": 8.0, "max": 10, "min": 6}
        ]))
    );
}

#[test]
fn test_min_max_scaler_is_exact() {
    let out = aggregate(
        json!([
            {"$setWindowFields": {
                "sortBy": {"a": 1},
                "output": {"scaled": {"$minMaxScaler": {"input": "$a"}}}
            }},
            {"$project": {"_id": 0, "a": 1, "scaled": 1}}
        ]),
        json!([{"a": 5}, {"a": 21}, {"a": 1}, {"a": 13}]),
    );
    let scaled: Vec<f64> = out
        .iter()
        .map(|doc| doc.get("scaled").and_then(Value::as_f64).unwrap())
        .collect();
    assert_eq!(scaled, vec![0.0, 0.2, 0.6, 1.0]);
}

#[test]
fn test_all_matches_single_element_nested_path() {
    let query = Query::new(v(json!({"a.b.c": {"$all": ["123"]}})), Options::default()).unwrap();
    assert!(query.test(&v(json!({"a": {"b": [{"c": ["123"]}]}}))).unwrap());
    assert!(query.test(&v(json!({"a": [{"b": [{"c": "123"}]}]}))).unwrap());
    assert!(!query.test(&v(json!({"a": {"b": [{"c": ["456"]}]}}))).unwrap());
}

#[test]
fn test_union_with_keeps_collection_order() {
    let first = collection(json!([{"n": 1}, {"n": 2}]));
    let second = collection(json!([{"n": 2}, {"n": 3}]));
    let options = Options::default().with_collection_resolver(Arc::new(move |name: &str| match name {
        "first" => Some(first.clone()),
        "second" => Some(second.clone()),
        _ => None,
    }));

    let out = Aggregator::new(
        v(json!([
            {"$unionWith": "first"},
            {"$unionWith": {"coll": "second", "pipeline": [{"$project": {"n": 1}}]}}
        ])),
        options,
    )
    .unwrap()
    .run(docs(json!([{"n": 0}])))
    .unwrap();
    assert_eq!(out, docs(json!([{"n": 0}, {"n": 1}, {"n": 2}, {"n": 2}, {"n": 3}])));
}

#[test]
fn test_register_same_name_twice() {
    let mut ctx = Context::full();
    assert!(ctx.register_expression("$negate", negate).is_ok());
    assert!(ctx.register_expression("$negate", negate).is_ok());
    let err = ctx.register_expression("$negate", echo).unwrap_err();
    assert!(err.message().contains("$negate"));

    let options = Options::default().with_context(ctx);
    let out = Aggregator::new(v(json!([{"$project": {"_id": 0, "x": {"$negate": -3}}}])), options)
        .unwrap()
        .run(docs(json!([{"_id": 1}])))
        .unwrap();
    assert_eq!(out, docs(json!([{"x": 3}])));
}

// =========================================================================
// Broader pipelines
// =========================================================================

#[test]
fn test_group_accounts_for_every_document() {
    let input: Vec<Value> = (0..50).map(|i| v(json!({"k": i % 7, "i": i}))).collect();
    let out = Aggregator::new(
        v(json!([{"$group": {"_id": "$k", "items": {"$push": "$i"}}}])),
        Options::default(),
    )
    .unwrap()
    .run(input)
    .unwrap();
    let mut seen: Vec<i64> = out
        .iter()
        .flat_map(|g| g.get("items").cloned().unwrap_or_default().into_array())
        .filter_map(|i| i.as_i64())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<i64>>());
    assert_eq!(out.len(), 7);
}

#[test]
fn test_lookup_unwind_and_facet() {
    let orders = collection(json!([
        {"_id": 1, "item": "pen", "qty": 2},
        {"_id": 2, "item": "ink", "qty": 1},
        {"_id": 3, "item": "pen", "qty": 5}
    ]));
    let options = Options::default()
        .with_collection_resolver(Arc::new(move |name: &str| (name == "orders").then(|| orders.clone())));

    let out = Aggregator::new(
        v(json!([
            {"$lookup": {"from": "orders", "localField": "sku", "foreignField": "item", "as": "orders"}},
            {"$unwind": "$orders"},
            {"$facet": {
                "bySku": [
                    {"$group": {"_id": "$sku", "qty": {"$sum": "$orders.qty"}}},
                    {"$sort": {"_id": 1}}
                ],
                "total": [{"$count": "n"}]
            }}
        ])),
        options,
    )
    .unwrap()
    .run(docs(json!([{"sku": "pen"}, {"sku": "ink"}, {"sku": "cap"}])))
    .unwrap();
    assert_eq!(
        out,
        docs(json!([{
            "bySku": [{"_id": "ink", "qty": 1}, {"_id": "pen", "qty": 7}],
            "total": [{"n": 3}]
        }]))
    );
}

#[test]
fn test_out_then_read_back() {
    let target = collection(json!([{"stale": true}]));
    let shared = target.clone();
    let options = Options::default()
        .with_collection_resolver(Arc::new(move |name: &str| (name == "report").then(|| shared.clone())));

    let out = Aggregator::new(
        v(json!([
            {"$match": {"score": {"$gte": 50}}},
            {"$addFields": {"passed": true}},
            {"$out": "report"}
        ])),
        options,
    )
    .unwrap()
    .run(docs(json!([{"score": 40}, {"score": 70}, {"score": 90}])))
    .unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(
        *target.read(),
        docs(json!([{"score": 70, "passed": true}, {"score": 90, "passed": true}]))
    );
}

#[test]
fn test_errors_carry_messages() {
    let err = Aggregator::new(
        v(json!([{"$bucket": {"groupBy": "$x", "boundaries": [5, 1, 9]}}])),
        Options::default(),
    )
    .unwrap()
    .run(docs(json!([{"x": 1}])))
    .unwrap_err();
    assert!(!err.message().is_empty());

    let err = Aggregator::new(
        v(json!([{"$project": {"_id": 0, "x": {"$subtract": ["a", 1]}}}])),
        Options::default(),
    )
    .unwrap()
    .run(docs(json!([{}])))
    .unwrap_err();
    assert!(err.message().contains("subtract"));
}

#[test]
fn test_add_fields_with_oversized_array_index() {
    let out = aggregate(
        json!([{"$addFields": {"a.18446744073709551615": 1, "a.99999999999": 2, "a.2": 3}}]),
        json!([{"a": [1, 2]}]),
    );
    assert_eq!(out, docs(json!([{"a": [1, 2, 3]}])));
}
