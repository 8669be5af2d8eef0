//! Element-wise stages and simple stream stages

use super::{compute_doc, expect_object, single_key, Projection};
use crate::error::{bail, ensure, Result};
use crate::evaluator;
use crate::lazy::Lazy;
use crate::operators::as_count;
use crate::options::{ComputeOptions, Options};
use crate::query::Query;
use crate::value::{remove_value, resolve, set_value, Map, Value};
use rand::seq::SliceRandom;
use tracing::trace;

/// Keep documents matching a filter
pub fn match_stage(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let query = Query::new(expr.clone(), options.clone())?;
    trace!("attached $match");
    Ok(collection.filter(move |obj| query.test(obj)))
}

pub fn skip(collection: Lazy, expr: &Value, _options: &Options) -> Result<Lazy> {
    Ok(collection.drop(as_count("$skip", expr)?))
}

pub fn limit(collection: Lazy, expr: &Value, _options: &Options) -> Result<Lazy> {
    Ok(collection.take(as_count("$limit", expr)?))
}

/// Replace the stream with `{<name>: <number of documents>}`
pub fn count(collection: Lazy, expr: &Value, _options: &Options) -> Result<Lazy> {
    let name = match expr.as_str().map(str::trim) {
        Some(name) if !name.is_empty() && !name.starts_with('$') && !name.contains('.') => {
            name.to_string()
        }
        _ => bail!("Invalid expression value for $count"),
    };
    Ok(collection.transform(move |values| {
        Ok(vec![single_key(&name, Value::from(values.len()))])
    }))
}

/// Add or overwrite fields; a field computed as missing is removed
pub fn add_fields(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let fields = expect_object("$addFields", expr)?.clone();
    if fields.is_empty() {
        return Ok(collection);
    }
    let options = options.clone();
    Ok(collection.map(move |obj| {
        let mut out = obj.clone();
        for (field, expr) in &fields {
            let value = compute_doc(&obj, expr, &options)?;
            if value.is_missing() {
                remove_value(&mut out, field, false);
            } else {
                set_value(&mut out, field, value);
            }
        }
        Ok(out)
    }))
}

/// Remove fields: `"a"` or `["a", "b.c"]`
pub fn unset(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let fields = match expr {
        Value::String(field) => vec![field.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(field) => Ok(field.clone()),
                _ => bail!("$unset requires a string or an array of strings"),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => bail!("$unset requires a string or an array of strings"),
    };
    let mut spec = Map::with_capacity(fields.len());
    for field in fields {
        spec.insert(field, Value::Int64(0));
    }
    let projection = Projection::compile(&spec, options, true)?;
    let options = options.clone();
    Ok(collection.map(move |obj| projection.apply(&obj, &options)))
}

fn replace(collection: Lazy, new_root: Value, options: &Options) -> Lazy {
    let options = options.clone();
    collection.map(move |obj| {
        let root = compute_doc(&obj, &new_root, &options)?;
        ensure!(
            root.is_object(),
            "$replaceRoot expression must return an object, got {}",
            root.type_name()
        );
        Ok(root)
    })
}

/// Promote a computed document: `{newRoot: <expr>}`
pub fn replace_root(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let Some(new_root) = expect_object("$replaceRoot", expr)?.get("newRoot") else {
        bail!("$replaceRoot requires a 'newRoot' expression");
    };
    Ok(replace(collection, new_root.clone(), options))
}

/// Same as `$replaceRoot` with the expression given directly
pub fn replace_with(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    Ok(replace(collection, expr.clone(), options))
}

/// Restrict content with `$$KEEP`, `$$PRUNE` and `$$DESCEND`
pub fn redact(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let expr = expr.clone();
    let options = options.clone();
    Ok(collection
        .map(move |obj| evaluator::redact(&obj, &expr, &ComputeOptions::new(&options)))
        .filter(|obj| Ok(!obj.is_missing())))
}

/// Pick `size` documents at random, without repetition
pub fn sample(collection: Lazy, expr: &Value, _options: &Options) -> Result<Lazy> {
    let Some(size) = expect_object("$sample", expr)?.get("size") else {
        bail!("$sample requires a 'size' field");
    };
    let size = as_count("$sample size", size)?;
    Ok(collection.transform(move |mut values| {
        values.shuffle(&mut rand::thread_rng());
        values.truncate(size);
        Ok(values)
    }))
}

/// Unwind options
struct UnwindSpec {
    field: String,
    include_array_index: Option<String>,
    preserve_null_and_empty: bool,
}

impl UnwindSpec {
    fn parse(expr: &Value) -> Result<Self> {
        let (path, include_array_index, preserve) = match expr {
            Value::String(path) => (path.as_str(), None, false),
            Value::Object(spec) => {
                let Some(path) = spec.get("path").and_then(Value::as_str) else {
                    bail!("$unwind requires a 'path' string");
                };
                let index = match spec.get("includeArrayIndex") {
                    None => None,
                    Some(Value::String(name)) if !name.starts_with('$') => Some(name.clone()),
                    Some(_) => bail!("$unwind 'includeArrayIndex' must be a field name"),
                };
                let preserve = spec
                    .get("preserveNullAndEmptyArrays")
                    .is_some_and(|v| v.is_truthy(true));
                (path, index, preserve)
            }
            _ => bail!("$unwind expects a field path or an object"),
        };
        let Some(field) = path.strip_prefix('$') else {
            bail!("$unwind field path must be prefixed by '$': {}", path);
        };
        Ok(Self {
            field: field.to_string(),
            include_array_index,
            preserve_null_and_empty: preserve,
        })
    }

    fn with_index(&self, mut obj: Value, index: Option<usize>) -> Value {
        if let (Some(name), Value::Object(map)) = (&self.include_array_index, &mut obj) {
            map.insert(name.clone(), index.map_or(Value::Null, Value::from));
        }
        obj
    }

    fn expand(&self, obj: Value) -> Vec<Value> {
        match resolve(&obj, &self.field) {
            Value::Array(items) if items.is_empty() => {
                if !self.preserve_null_and_empty {
                    return Vec::new();
                }
                let mut out = obj;
                remove_value(&mut out, &self.field, false);
                vec![self.with_index(out, None)]
            }
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let mut out = obj.clone();
                    set_value(&mut out, &self.field, item);
                    self.with_index(out, Some(i))
                })
                .collect(),
            value if value.is_nil() && !self.preserve_null_and_empty => Vec::new(),
            _ => vec![self.with_index(obj, None)],
        }
    }
}

/// Emit one document per element of an array field
pub fn unwind(collection: Lazy, expr: &Value, _options: &Options) -> Result<Lazy> {
    let spec = UnwindSpec::parse(expr)?;
    Ok(Lazy::from_results(collection.flat_map(move |item| match item {
        Ok(obj) => spec.expand(obj).into_iter().map(Ok).collect::<Vec<_>>(),
        Err(e) => vec![Err(e)],
    })))
}
