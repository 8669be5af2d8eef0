//! Query and pipeline performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use docql_core::{Aggregator, Lazy, Options, Query, Value};
use serde_json::json;

const REGIONS: [&str; 4] = ["north", "south", "east", "west"];
const TAGS: [&str; 3] = ["a", "b", "c"];

fn documents(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            let region = REGIONS[i % 4];
            let qty = (i * 37) % 101;
            let price = ((i * 13) % 50) as f64 + 0.5;
            let tags = &TAGS[..(i % 3) + 1];
            Value::from(json!({
                "_id": i,
                "region": region,
                "qty": qty,
                "price": price,
                "tags": tags,
            }))
        })
        .collect()
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let options = Options::default();

    for size in [1_000usize, 10_000] {
        let docs = documents(size);
        let query = Query::new(
            Value::from(json!({"qty": {"$gte": 50}, "tags": {"$in": ["c"]}})),
            options.clone(),
        )
        .unwrap();

        group.bench_with_input(BenchmarkId::new("filter", size), &docs, |b, docs| {
            b.iter(|| {
                let out = query.find(Lazy::new(docs.clone()), None).all().unwrap();
                black_box(out);
            });
        });

        group.bench_with_input(BenchmarkId::new("sort_limit", size), &docs, |b, docs| {
            b.iter(|| {
                let out = query
                    .find(Lazy::new(docs.clone()), Some(Value::from(json!({"qty": 1}))))
                    .sort(Value::from(json!({"price": -1})))
                    .limit(10)
                    .all()
                    .unwrap();
                black_box(out);
            });
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let options = Options::default();
    let docs = documents(10_000);

    let grouping = Aggregator::new(
        Value::from(json!([
            {"$match": {"qty": {"$gt": 10}}},
            {"$group": {"_id": "$region", "total": {"$sum": "$qty"}, "avg": {"$avg": "$price"}}},
            {"$sort": {"total": -1}}
        ])),
        options.clone(),
    )
    .unwrap();
    group.bench_function("group_by_region", |b| {
        b.iter(|| black_box(grouping.run(docs.clone()).unwrap()));
    });

    let windows = Aggregator::new(
        Value::from(json!([
            {"$setWindowFields": {
                "partitionBy": "$region",
                "sortBy": {"_id": 1},
                "output": {
                    "running": {"$sum": "$qty", "window": {"documents": ["unbounded", "current"]}},
                    "rank": {"$rank": {}}
                }
            }}
        ])),
        options.clone(),
    )
    .unwrap();
    group.bench_function("set_window_fields", |b| {
        b.iter(|| black_box(windows.run(docs.clone()).unwrap()));
    });

    let buckets = Aggregator::new(
        Value::from(json!([{"$bucketAuto": {"groupBy": "$price", "buckets": 8}}])),
        options,
    )
    .unwrap();
    group.bench_function("bucket_auto", |b| {
        b.iter(|| black_box(buckets.run(docs.clone()).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_query, bench_pipeline);
criterion_main!(benches);
