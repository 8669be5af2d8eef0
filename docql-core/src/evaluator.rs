//! Expression evaluation
//!
//! `compute_value` is the single recursive entry point used by query
//! operators, pipeline stages and every expression operator. Operator
//! resolution follows a fixed rule: a `$name` is looked up as an expression
//! operator first and as an accumulator second.

use crate::context::is_operator;
use crate::error::{bail, ensure, EngineError, Result};
use crate::options::ComputeOptions;
use crate::value::{resolve, Map, Value};
use std::borrow::Cow;

/// Literals interpreted by `$redact`
pub const REDACT_KEEP: &str = "$$KEEP";
pub const REDACT_PRUNE: &str = "$$PRUNE";
pub const REDACT_DESCEND: &str = "$$DESCEND";

/// Evaluate `expr` against `obj`.
///
/// `operator` names the operator the expression is an argument of, if any.
/// The root document is bound on the first call and shared by nested calls.
pub fn compute_value(
    obj: &Value,
    expr: &Value,
    operator: Option<&str>,
    options: &ComputeOptions<'_>,
) -> Result<Value> {
    let root = options.root().unwrap_or(obj);
    let copts = options.with_root(root);

    if let Some(name) = operator.filter(|name| is_operator(name)) {
        return call_operator(obj, expr, name, &copts);
    }

    match expr {
        Value::String(s) if s.starts_with('$') => compute_path(obj, root, s, &copts),
        Value::Array(items) => items
            .iter()
            .map(|item| compute_value(obj, item, None, &copts))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = Map::with_capacity(map.len());
            for (key, value) in map {
                if is_operator(key)
                    && (copts.options().expression_operator(key).is_some()
                        || copts.options().accumulator_operator(key).is_some())
                {
                    ensure!(
                        map.len() == 1,
                        "Invalid aggregation expression '{}'.",
                        expr
                    );
                    return compute_value(obj, value, Some(key), &copts);
                }
                let computed = compute_value(obj, value, Some(key), &copts)?;
                if !computed.is_missing() {
                    result.insert(key.clone(), computed);
                }
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

/// Evaluate an expression that is not the argument of an operator
pub fn evaluate(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    compute_value(obj, expr, None, options)
}

fn call_operator(
    obj: &Value,
    expr: &Value,
    name: &str,
    copts: &ComputeOptions<'_>,
) -> Result<Value> {
    if let Some(f) = copts.options().expression_operator(name) {
        return f(obj, expr, copts);
    }

    if let Some(f) = copts.options().accumulator_operator(name) {
        let (collection, expr) = match obj {
            Value::Array(_) => (Cow::Borrowed(obj), Cow::Borrowed(expr)),
            _ => (
                Cow::Owned(compute_value(obj, expr, None, copts)?),
                Cow::Owned(Value::Null),
            ),
        };
        let Value::Array(items) = collection.as_ref() else {
            bail!("'{}' target must be an array.", name);
        };
        // the accumulator works on the array alone, so it gets a fresh root
        return f(items, &expr, &copts.without_root());
    }

    bail!("unknown operator '{}'", name)
}

fn compute_path(
    obj: &Value,
    root: &Value,
    path: &str,
    copts: &ComputeOptions<'_>,
) -> Result<Value> {
    if matches!(path, REDACT_KEEP | REDACT_PRUNE | REDACT_DESCEND) {
        return Ok(Value::from(path));
    }

    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let base: Cow<'_, Value> = match head {
        "$$ROOT" => Cow::Borrowed(root),
        "$$CURRENT" => Cow::Borrowed(obj),
        "$$REMOVE" => Cow::Owned(Value::Missing),
        "$$NOW" => Cow::Owned(Value::DateTime(copts.now())),
        var if var.starts_with("$$") => {
            let name = &var[2..];
            Cow::Owned(copts.variable(name, obj).ok_or_else(|| {
                EngineError::assertion(format!("Use of undefined variable: {}", name))
            })?)
        }
        _ => return Ok(resolve(root, &path[1..])),
    };

    Ok(match rest {
        Some(rest) => resolve(&base, rest),
        None => base.into_owned(),
    })
}

/// Apply a `$redact` expression to a document.
///
/// Returns `Missing` when the document is pruned. Nested documents are only
/// visited when the expression is a `$cond`.
pub fn redact(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let result = compute_value(obj, expr, None, options)?;
    match result.as_str() {
        Some(REDACT_KEEP) => Ok(obj.clone()),
        Some(REDACT_PRUNE) => Ok(Value::Missing),
        Some(REDACT_DESCEND) => {
            let descends = expr.as_object().map_or(false, |e| e.contains_key("$cond"));
            let (true, Value::Object(fields)) = (descends, obj) else {
                return Ok(obj.clone());
            };
            let mut output = Map::with_capacity(fields.len());
            for (key, value) in fields {
                match value {
                    Value::Array(items) => {
                        let mut kept = Vec::with_capacity(items.len());
                        for item in items {
                            let item = if item.is_object() {
                                redact(item, expr, &options.with_root(item))?
                            } else {
                                item.clone()
                            };
                            if !item.is_nil() {
                                kept.push(item);
                            }
                        }
                        output.insert(key.clone(), Value::Array(kept));
                    }
                    Value::Object(_) => {
                        let redacted = redact(value, expr, &options.with_root(value))?;
                        if !redacted.is_nil() {
                            output.insert(key.clone(), redacted);
                        }
                    }
                    other => {
                        output.insert(key.clone(), other.clone());
                    }
                }
            }
            Ok(Value::Object(output))
        }
        _ => Ok(result),
    }
}
