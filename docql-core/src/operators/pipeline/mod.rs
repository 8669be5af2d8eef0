//! Pipeline stages
//!
//! Every stage has the shape `(stream, stage_expression, options) -> stream`.
//! Stages that need the whole input (sorting, grouping, bucketing, windows)
//! materialize it on the first pull; all other stages stay element-wise.

mod basic;
mod bucket;
mod bucket_auto;
mod group;
mod lookup;
mod output;
mod project;
mod set_window_fields;
mod sort;

pub use basic::{
    add_fields, count, limit, match_stage, redact, replace_root, replace_with, sample, skip,
    unset, unwind,
};
pub use bucket::bucket;
pub use bucket_auto::bucket_auto;
pub use group::group;
pub use lookup::{facet, lookup, union_with};
pub use output::{merge, out};
pub use project::project;
pub use set_window_fields::set_window_fields;
pub use sort::{sort, sort_by_count};

pub(crate) use project::Projection;
pub(crate) use sort::sort_values;

use crate::context::PipelineOperator;
use crate::error::{bail, Result};
use crate::evaluator::compute_value;
use crate::options::{ComputeOptions, Options};
use crate::value::{Map, Value};

/// Stages loaded by `Context::init()`
pub(crate) const CORE_OPERATORS: &[(&str, PipelineOperator)] = &[
    ("$limit", limit),
    ("$match", match_stage),
    ("$project", project),
    ("$skip", skip),
    ("$sort", sort),
];

/// Remaining stages loaded by `Context::full()`
pub(crate) const OPERATORS: &[(&str, PipelineOperator)] = &[
    ("$addFields", add_fields),
    ("$bucket", bucket),
    ("$bucketAuto", bucket_auto),
    ("$count", count),
    ("$facet", facet),
    ("$group", group),
    ("$lookup", lookup),
    ("$merge", merge),
    ("$out", out),
    ("$redact", redact),
    ("$replaceRoot", replace_root),
    ("$replaceWith", replace_with),
    ("$sample", sample),
    ("$set", add_fields),
    ("$setWindowFields", set_window_fields),
    ("$sortByCount", sort_by_count),
    ("$unionWith", union_with),
    ("$unset", unset),
    ("$unwind", unwind),
];

/// Evaluate an expression against a document in a fresh frame
pub(crate) fn compute_doc(obj: &Value, expr: &Value, options: &Options) -> Result<Value> {
    compute_value(obj, expr, None, &ComputeOptions::new(options))
}

/// Borrow a stage argument as an object
pub(crate) fn expect_object<'v>(name: &str, expr: &'v Value) -> Result<&'v Map> {
    match expr {
        Value::Object(map) => Ok(map),
        other => bail!("{} expects an object, got {}", name, other.type_name()),
    }
}

/// Build a one-key object
pub(crate) fn single_key(key: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), value);
    Value::Object(map)
}
