//! `$project`
//!
//! A projection is compiled once per stage. Each key is classified as an
//! inclusion, an exclusion or a handler that computes the field. Exclusions
//! start from a full copy of the document and strip paths; inclusions resolve
//! the containing graph of every included path and merge the graphs, so
//! `{"a.b": 1}` keeps `a` as an array when it was one. Handlers run last and
//! remove their field when they produce nothing.

use crate::context::{is_operator, ProjectionOperator};
use crate::error::{bail, ensure, Result};
use crate::evaluator::compute_value;
use crate::lazy::Lazy;
use crate::options::{ComputeOptions, Options};
use crate::value::{
    filter_missing, merge, remove_value, resolve, resolve_graph, set_value, GraphOptions, Map,
    Value,
};
use tracing::trace;

/// How a non-boolean projection field is produced
enum Handler {
    /// Constant value
    Literal(Value),
    /// `"$path"` or `"$$var"` reference
    Expression(Value),
    /// Array of expressions, missing entries become null
    Array(Vec<Value>),
    /// Expression operator applied to its argument
    Operator { name: String, args: Value },
    /// Projection operator such as `$slice` or `$elemMatch`
    Projection { f: ProjectionOperator, args: Value },
    /// Nested projection over a sub-document, or a computed object when the
    /// field is absent
    Nested { expr: Value, projection: Box<Projection> },
}

/// Compiled projection
pub(crate) struct Projection {
    included: Vec<String>,
    excluded: Vec<String>,
    handlers: Vec<(String, Handler)>,
    /// Set at the top level when the id is projected implicitly
    implicit_id: Option<String>,
    /// Set at the top level when the id is the only exclusion
    only_id_excluded: Option<String>,
}

fn is_flag(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Int64(_) | Value::Float64(_))
}

fn validate(spec: &Map, id_key: &str) -> Result<()> {
    let (mut inclusions, mut exclusions) = (false, false);
    for (key, value) in spec {
        ensure!(!key.starts_with('$'), "Field names may not start with '$'.");
        ensure!(
            !key.ends_with(".$"),
            "Positional projection operator '$' is not supported."
        );
        if key == id_key || !is_flag(value) {
            continue;
        }
        if value.is_truthy(false) {
            inclusions = true;
        } else {
            exclusions = true;
        }
        ensure!(
            !(inclusions && exclusions),
            "Projection cannot have a mix of inclusion and exclusion."
        );
    }
    Ok(())
}

impl Projection {
    /// Validate and classify a projection specification
    pub(crate) fn compile(spec: &Map, options: &Options, is_root: bool) -> Result<Self> {
        let id_key = options.id_key();
        validate(spec, id_key)?;

        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut handlers = Vec::new();
        for (key, value) in spec {
            let handler = match value {
                flag if is_flag(flag) => {
                    if flag.is_truthy(false) {
                        included.push(key.clone());
                    } else {
                        excluded.push(key.clone());
                    }
                    continue;
                }
                Value::Array(items) => Handler::Array(items.clone()),
                Value::Object(sub) => Self::classify_object(sub, options)?,
                Value::String(s) if s.starts_with('$') => Handler::Expression(value.clone()),
                other => Handler::Literal(other.clone()),
            };
            handlers.push((key.clone(), handler));
        }

        let id_excluded = excluded.iter().any(|k| k == id_key);
        let only_id_excluded = (is_root
            && id_excluded
            && excluded.len() == 1
            && included.is_empty()
            && handlers.is_empty())
        .then(|| id_key.to_string());
        let implicit_id = (is_root && !id_excluded && !included.iter().any(|k| k == id_key))
            .then(|| id_key.to_string());

        Ok(Self {
            included,
            excluded,
            handlers,
            implicit_id,
            only_id_excluded,
        })
    }

    fn classify_object(sub: &Map, options: &Options) -> Result<Handler> {
        let operator = match sub.keys().next() {
            Some(key) if sub.len() == 1 => key.as_str(),
            _ => "",
        };
        let args = sub.get(operator).cloned().unwrap_or(Value::Missing);
        if let Some(f) = options.projection_operator(operator) {
            let numeric_args = match &args {
                Value::Array(items) => items.iter().all(Value::is_number),
                other => other.is_number(),
            };
            // `$slice` with non-numeric arguments is the array expression
            if operator == "$slice" && !numeric_args {
                return Ok(Handler::Expression(Value::Object(sub.clone())));
            }
            return Ok(Handler::Projection { f, args });
        }
        if is_operator(operator) {
            return Ok(Handler::Operator {
                name: operator.to_string(),
                args,
            });
        }
        Ok(Handler::Nested {
            expr: Value::Object(sub.clone()),
            projection: Box::new(Self::compile(sub, options, false)?),
        })
    }

    /// Project a top-level document
    pub(crate) fn apply(&self, obj: &Value, options: &Options) -> Result<Value> {
        let copts = ComputeOptions::new(options);
        self.apply_with(obj, &copts.with_root(obj))
    }

    fn apply_with(&self, obj: &Value, copts: &ComputeOptions<'_>) -> Result<Value> {
        if let Some(id_key) = &self.only_id_excluded {
            let mut out = obj.clone();
            if let Value::Object(map) = &mut out {
                map.shift_remove(id_key);
            }
            return Ok(out);
        }

        let mut out = Value::object();
        if !self.excluded.is_empty() && self.included.is_empty() {
            merge(&mut out, obj.clone());
            for key in &self.excluded {
                remove_value(&mut out, key, true);
            }
        }

        let graph_options = GraphOptions {
            preserve_missing: true,
            preserve_keys: false,
        };
        for key in &self.included {
            if let Some(graph) = resolve_graph(obj, key, graph_options) {
                merge(&mut out, graph);
            }
        }
        if !self.included.is_empty() {
            filter_missing(&mut out);
        }

        for (key, handler) in &self.handlers {
            let value = handler.compute(obj, key, copts)?;
            if value.is_missing() {
                remove_value(&mut out, key, true);
            } else {
                set_value(&mut out, key, value);
            }
        }

        if let (Some(id_key), Value::Object(map)) = (&self.implicit_id, &mut out) {
            let id = resolve(obj, id_key);
            if !id.is_missing() {
                let mut ordered = Map::with_capacity(map.len() + 1);
                ordered.insert(id_key.clone(), id);
                ordered.extend(map.drain(..).filter(|(k, _)| k != id_key));
                *map = ordered;
            }
        }
        Ok(out)
    }
}

impl Handler {
    fn compute(&self, obj: &Value, key: &str, copts: &ComputeOptions<'_>) -> Result<Value> {
        match self {
            Handler::Literal(value) => Ok(value.clone()),
            Handler::Expression(expr) => compute_value(obj, expr, None, copts),
            Handler::Array(items) => items
                .iter()
                .map(|item| {
                    compute_value(obj, item, None, copts).map(|v| match v {
                        Value::Missing => Value::Null,
                        v => v,
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Handler::Operator { name, args } => compute_value(obj, args, Some(name), copts),
            Handler::Projection { f, args } => f(obj, args, key, copts),
            Handler::Nested { expr, projection } => match resolve(obj, key) {
                Value::Missing => compute_value(obj, expr, None, copts),
                Value::Array(items) => items
                    .iter()
                    .map(|item| projection.apply_with(item, copts))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array),
                target @ Value::Object(_) => projection.apply_with(&target, copts),
                _ => projection.apply_with(obj, copts),
            },
        }
    }
}

/// Reshape every document
pub fn project(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let Value::Object(spec) = expr else {
        bail!("$project expects an object, got {}", expr.type_name());
    };
    if spec.is_empty() {
        return Ok(collection);
    }
    let projection = Projection::compile(spec, options, true)?;
    trace!(fields = spec.len(), "attached $project");
    let options = options.clone();
    Ok(collection.map(move |obj| projection.apply(&obj, &options)))
}
