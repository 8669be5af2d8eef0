//! Stages that write to a host collection: `$out` and `$merge`
//!
//! Both stages pass every document through unchanged and perform their
//! write when the document is pulled, so a stream that is never consumed
//! leaves the target untouched.

use super::expect_object;
use crate::aggregator::Aggregator;
use crate::error::{bail, ensure, EngineError, Result};
use crate::evaluator::compute_value;
use crate::lazy::Lazy;
use crate::options::{Collection, ComputeOptions, Options};
use crate::value::{hash_code, is_equal, resolve, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

fn target_name(stage: &str, value: Option<&Value>) -> Result<String> {
    match value {
        Some(Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        _ => bail!("{} requires the name of the target collection", stage),
    }
}

/// Replace the contents of a collection with the stream
pub fn out(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let name = target_name("$out", Some(expr))?;
    let options = options.clone();
    let mut upstream = collection;
    let mut target: Option<Collection> = None;
    let mut failed = false;

    Ok(Lazy::from_results(std::iter::from_fn(move || {
        if failed {
            return None;
        }
        if target.is_none() {
            match options.resolve_collection(&name) {
                Ok(collection) => {
                    collection.write().clear();
                    debug!(collection = %name, "$out cleared target");
                    target = Some(collection);
                }
                Err(e) => {
                    failed = true;
                    return Some(Err(e));
                }
            }
        }
        let item = upstream.next()?;
        if let (Ok(doc), Some(target)) = (&item, &target) {
            target.write().push(doc.clone());
        }
        Some(item)
    })))
}

/// Action for an incoming document that matches an existing one
#[derive(Debug, Clone)]
enum WhenMatched {
    Replace,
    KeepExisting,
    Merge,
    Fail,
    Pipeline(Arc<Value>),
}

/// Action for an incoming document with no match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhenNotMatched {
    Insert,
    Discard,
    Fail,
}

struct MergeSpec {
    into: String,
    on: Vec<String>,
    bindings: Option<Value>,
    when_matched: WhenMatched,
    when_not_matched: WhenNotMatched,
}

impl MergeSpec {
    fn parse(expr: &Value, options: &Options) -> Result<Self> {
        let spec = match expr {
            Value::String(_) => {
                let mut spec = Map::with_capacity(1);
                spec.insert("into".to_string(), expr.clone());
                spec
            }
            other => expect_object("$merge", other)?.clone(),
        };
        let into = target_name("$merge", spec.get("into"))?;
        let on = match spec.get("on") {
            None => vec![options.id_key().to_string()],
            Some(Value::String(field)) => vec![field.clone()],
            Some(Value::Array(fields)) if !fields.is_empty() => fields
                .iter()
                .map(|f| match f {
                    Value::String(f) => Ok(f.clone()),
                    _ => bail!("$merge 'on' must contain field names"),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => bail!("$merge 'on' must be a field name or an array of field names"),
        };
        let when_matched = match spec.get("whenMatched") {
            None => WhenMatched::Merge,
            Some(Value::String(mode)) => match mode.as_str() {
                "replace" => WhenMatched::Replace,
                "keepExisting" => WhenMatched::KeepExisting,
                "merge" => WhenMatched::Merge,
                "fail" => WhenMatched::Fail,
                other => bail!("$merge 'whenMatched' mode '{}' is not supported", other),
            },
            Some(pipeline @ Value::Array(_)) => {
                Aggregator::new(pipeline.clone(), options.clone())?;
                WhenMatched::Pipeline(Arc::new(pipeline.clone()))
            }
            Some(other) => bail!("$merge 'whenMatched' must be a mode or a pipeline, found {}", other),
        };
        let when_not_matched = match spec.get("whenNotMatched").and_then(Value::as_str) {
            None | Some("insert") => WhenNotMatched::Insert,
            Some("discard") => WhenNotMatched::Discard,
            Some("fail") => WhenNotMatched::Fail,
            Some(other) => bail!("$merge 'whenNotMatched' mode '{}' is not supported", other),
        };
        let bindings = spec.get("let").cloned();
        ensure!(
            bindings.is_none() || matches!(when_matched, WhenMatched::Pipeline(_)),
            "$merge 'let' is only allowed with a 'whenMatched' pipeline"
        );
        Ok(Self {
            into,
            on,
            bindings,
            when_matched,
            when_not_matched,
        })
    }

    fn key(&self, doc: &Value) -> Value {
        match self.on.as_slice() {
            [field] => resolve(doc, field),
            fields => Value::Array(fields.iter().map(|f| resolve(doc, f)).collect()),
        }
    }
}

/// Positions of the target documents by their `on` key
struct TargetIndex {
    buckets: HashMap<u64, Vec<(Value, usize)>>,
}

impl TargetIndex {
    fn build(docs: &[Value], spec: &MergeSpec, options: &Options) -> Result<Self> {
        let mut index = Self {
            buckets: HashMap::new(),
        };
        for (i, doc) in docs.iter().enumerate() {
            let key = spec.key(doc);
            ensure!(
                index.find(&key, options).is_none(),
                "$merge requires the 'on' fields to identify target documents uniquely"
            );
            index.insert(key, i, options);
        }
        Ok(index)
    }

    fn find(&self, key: &Value, options: &Options) -> Option<usize> {
        self.buckets
            .get(&hash_code(key, options.hash_function()))?
            .iter()
            .find(|(candidate, _)| is_equal(candidate, key))
            .map(|(_, i)| *i)
    }

    fn insert(&mut self, key: Value, position: usize, options: &Options) {
        self.buckets
            .entry(hash_code(&key, options.hash_function()))
            .or_default()
            .push((key, position));
    }
}

fn merge_documents(target: &Value, incoming: &Value) -> Value {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(update)) => {
            let mut merged = existing.clone();
            for (k, v) in update {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

fn apply_merge(
    doc: &Value,
    spec: &MergeSpec,
    target: &Collection,
    index: &mut TargetIndex,
    options: &Options,
) -> Result<()> {
    let key = spec.key(doc);
    let mut docs = target.write();
    let Some(position) = index.find(&key, options) else {
        return match spec.when_not_matched {
            WhenNotMatched::Insert => {
                index.insert(key, docs.len(), options);
                docs.push(doc.clone());
                Ok(())
            }
            WhenNotMatched::Discard => Ok(()),
            WhenNotMatched::Fail => Err(EngineError::assertion(
                "$merge failed due to matching as specified by 'whenNotMatched' option.",
            )),
        };
    };

    let existing = &docs[position];
    let updated = match &spec.when_matched {
        WhenMatched::Replace => doc.clone(),
        WhenMatched::KeepExisting => return Ok(()),
        WhenMatched::Merge => merge_documents(existing, doc),
        WhenMatched::Fail => bail!("$merge failed due to matching as specified by 'whenMatched' option."),
        WhenMatched::Pipeline(pipeline) => {
            let mut variables = options.variables().clone();
            match &spec.bindings {
                Some(bindings) => {
                    let copts = ComputeOptions::new(options);
                    match compute_value(doc, bindings, None, &copts)? {
                        Value::Object(bound) => variables.extend(bound),
                        other => bail!("$merge 'let' must evaluate to an object, found {}", other),
                    }
                }
                None => {
                    variables.insert("new".to_string(), doc.clone());
                }
            }
            let aggregator = Aggregator::new((**pipeline).clone(), options.clone().with_variables(variables))?;
            match aggregator.run(vec![existing.clone()])?.into_iter().next() {
                Some(updated) => updated,
                None => return Ok(()),
            }
        }
    };
    docs[position] = updated;
    Ok(())
}

/// Merge the stream into a collection, keyed by the `on` fields
pub fn merge(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = MergeSpec::parse(expr, options)?;
    let options = options.clone();
    let mut state: Option<(Collection, TargetIndex)> = None;

    Ok(collection.map(move |doc| {
        if state.is_none() {
            let target = options.resolve_collection(&spec.into)?;
            let index = TargetIndex::build(&target.read(), &spec, &options)?;
            debug!(collection = %spec.into, "$merge indexed target");
            state = Some((target, index));
        }
        if let Some((target, index)) = &mut state {
            apply_merge(&doc, &spec, target, index, &options)?;
        }
        Ok(doc)
    }))
}
