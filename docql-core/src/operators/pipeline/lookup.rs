//! Stages that read other collections: `$lookup`, `$unionWith`, `$facet`

use super::expect_object;
use crate::aggregator::Aggregator;
use crate::error::{bail, ensure, Result};
use crate::evaluator::compute_value;
use crate::lazy::Lazy;
use crate::options::{ComputeOptions, Options};
use crate::value::{flatten, hash_code, is_equal, resolve, set_value, Map, Value};
use std::collections::HashMap;
use tracing::trace;

/// Source of documents for a stage: a named collection or an inline array
#[derive(Debug, Clone)]
enum Source {
    Named(String),
    Inline(Vec<Value>),
}

impl Source {
    fn parse(stage: &str, value: Option<&Value>) -> Result<Self> {
        match value {
            Some(Value::String(name)) => Ok(Self::Named(name.clone())),
            Some(Value::Array(items)) => Ok(Self::Inline(items.clone())),
            _ => bail!("{} requires a collection name or an array of documents", stage),
        }
    }

    /// Snapshot the documents; named collections are resolved on every call
    fn load(&self, options: &Options) -> Result<Vec<Value>> {
        match self {
            Self::Named(name) => Ok(options.resolve_collection(name)?.read().clone()),
            Self::Inline(items) => Ok(items.clone()),
        }
    }
}

/// Values a field contributes to an equality join; arrays join element-wise
fn join_values(value: Value) -> Vec<Value> {
    match value {
        Value::Missing => vec![Value::Null],
        Value::Array(items) if items.is_empty() => vec![Value::Null],
        Value::Array(items) => flatten(&items, 1),
        other => vec![other],
    }
}

/// Hash index over the foreign collection
struct ForeignIndex {
    docs: Vec<Value>,
    buckets: HashMap<u64, Vec<(Value, usize)>>,
}

impl ForeignIndex {
    fn build(docs: Vec<Value>, foreign_field: &str, options: &Options) -> Self {
        let mut buckets: HashMap<u64, Vec<(Value, usize)>> = HashMap::new();
        for (i, doc) in docs.iter().enumerate() {
            for key in join_values(resolve(doc, foreign_field)) {
                buckets
                    .entry(hash_code(&key, options.hash_function()))
                    .or_default()
                    .push((key, i));
            }
        }
        Self { docs, buckets }
    }

    /// Foreign documents matching any local value, in foreign order
    fn matches(&self, local: Value, options: &Options) -> Vec<Value> {
        let mut hits: Vec<usize> = Vec::new();
        for key in join_values(local) {
            if let Some(chain) = self.buckets.get(&hash_code(&key, options.hash_function())) {
                hits.extend(
                    chain
                        .iter()
                        .filter(|(candidate, _)| is_equal(candidate, &key))
                        .map(|(_, i)| *i),
                );
            }
        }
        hits.sort_unstable();
        hits.dedup();
        hits.into_iter().map(|i| self.docs[i].clone()).collect()
    }
}

struct LookupSpec {
    from: Source,
    local_field: Option<String>,
    foreign_field: Option<String>,
    bindings: Map,
    pipeline: Value,
    as_field: String,
}

impl LookupSpec {
    fn parse(expr: &Value, options: &Options) -> Result<Self> {
        let spec = expect_object("$lookup", expr)?;
        let field = |key: &str| -> Result<Option<String>> {
            match spec.get(key) {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => bail!("$lookup '{}' must be a string, found {}", key, other),
            }
        };
        let Some(as_field) = field("as")? else {
            bail!("$lookup requires an 'as' field");
        };
        let (local_field, foreign_field) = (field("localField")?, field("foreignField")?);
        ensure!(
            local_field.is_some() == foreign_field.is_some(),
            "$lookup requires both or neither of 'localField' and 'foreignField'"
        );
        let pipeline = spec.get("pipeline").cloned().unwrap_or(Value::Array(Vec::new()));
        ensure!(
            local_field.is_some() || spec.contains_key("pipeline"),
            "$lookup requires either 'localField'/'foreignField' or a 'pipeline'"
        );
        // validate the sub-pipeline once up front
        Aggregator::new(pipeline.clone(), options.clone())?;
        let bindings = match spec.get("let") {
            None => Map::new(),
            Some(Value::Object(bindings)) => bindings.clone(),
            Some(other) => bail!("$lookup 'let' must be an object, found {}", other),
        };
        Ok(Self {
            from: Source::parse("$lookup", spec.get("from"))?,
            local_field,
            foreign_field,
            bindings,
            pipeline,
            as_field,
        })
    }
}

/// Join documents from another collection into an array field
pub fn lookup(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = LookupSpec::parse(expr, options)?;
    let options = options.clone();
    let mut index: Option<ForeignIndex> = None;
    let mut foreign: Option<Vec<Value>> = None;
    trace!(as_field = %spec.as_field, "attached $lookup");

    Ok(collection.map(move |obj| {
        let joined = match (&spec.local_field, &spec.foreign_field) {
            (Some(local), Some(foreign_field)) => {
                if index.is_none() {
                    let docs = spec.from.load(&options)?;
                    index = Some(ForeignIndex::build(docs, foreign_field, &options));
                }
                match &index {
                    Some(index) => index.matches(resolve(&obj, local), &options),
                    None => Vec::new(),
                }
            }
            _ => match &foreign {
                Some(docs) => docs.clone(),
                None => foreign.insert(spec.from.load(&options)?).clone(),
            },
        };

        let joined = if spec.bindings.is_empty() && spec.pipeline.as_array().map_or(true, Vec::is_empty) {
            joined
        } else {
            let copts = ComputeOptions::new(&options);
            let mut variables = Map::with_capacity(spec.bindings.len());
            for (name, expr) in &spec.bindings {
                variables.insert(name.clone(), compute_value(&obj, expr, None, &copts)?);
            }
            let mut variables_all = options.variables().clone();
            variables_all.extend(variables);
            let sub_options = options.clone().with_variables(variables_all);
            Aggregator::new(spec.pipeline.clone(), sub_options)?.run(joined)?
        };

        let mut out = obj;
        set_value(&mut out, &spec.as_field, Value::Array(joined));
        Ok(out)
    }))
}

/// Append the documents of another collection, optionally transformed by a
/// pipeline. The other collection is only read once the input is exhausted.
pub fn union_with(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let (source, pipeline) = match expr {
        Value::String(_) | Value::Array(_) => (Source::parse("$unionWith", Some(expr))?, None),
        Value::Object(spec) => (
            Source::parse("$unionWith", spec.get("coll"))?,
            spec.get("pipeline").cloned(),
        ),
        other => bail!("$unionWith expects a collection or an object, found {}", other),
    };
    let aggregator = pipeline
        .map(|pipeline| Aggregator::new(pipeline, options.clone()))
        .transpose()?;
    let options = options.clone();
    let tail = Lazy::empty().flat_transform(move |_| {
        let docs = Lazy::new(source.load(&options)?);
        match &aggregator {
            Some(aggregator) => aggregator.stream(docs),
            None => Ok(docs),
        }
    });
    Ok(Lazy::concat(vec![collection, tail]))
}

const FACET_FORBIDDEN: [&str; 3] = ["$facet", "$merge", "$out"];

/// Run several sub-pipelines over the same input, producing one document
pub fn facet(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = expect_object("$facet", expr)?;
    let mut facets = Vec::with_capacity(spec.len());
    for (name, pipeline) in spec {
        let Value::Array(stages) = pipeline else {
            bail!("$facet field '{}' must be a pipeline array", name);
        };
        for stage in stages {
            let forbidden = stage
                .as_object()
                .and_then(|s| s.keys().next())
                .filter(|op| FACET_FORBIDDEN.contains(&op.as_str()));
            if let Some(op) = forbidden {
                bail!("{} is not allowed to be used within a $facet stage", op);
            }
        }
        facets.push((name.clone(), Aggregator::new(pipeline.clone(), options.clone())?));
    }
    Ok(collection.transform(move |values| {
        let mut out = Map::with_capacity(facets.len());
        for (name, aggregator) in &facets {
            out.insert(name.clone(), Value::Array(aggregator.run(values.clone())?));
        }
        Ok(vec![Value::Object(out)])
    }))
}
