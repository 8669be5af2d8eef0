//! Query operators
//!
//! Each operator compiles `(selector, value)` into a predicate over a whole
//! document. Field operators resolve the selector with array unwrapping and
//! then compare the resolved value against the operand, so a condition on
//! `"items.price"` is satisfied when any element of `items` satisfies it.

use crate::context::{is_operator, Predicate, QueryOperator};
use crate::error::{bail, ensure, Result};
use crate::evaluator::evaluate;
use crate::options::{ComputeOptions, Options};
use crate::query::compiler::normalize;
use crate::query::Query;
use crate::value::compare::type_rank;
use crate::value::{compare, flatten, is_equal, resolve_with, Map, Value};
use regex::Regex;
use std::cmp::Ordering;

pub(crate) const OPERATORS: &[(&str, QueryOperator)] = &[
    ("$all", all),
    ("$and", and),
    ("$elemMatch", elem_match),
    ("$eq", eq),
    ("$exists", exists),
    ("$expr", expr),
    ("$gt", gt),
    ("$gte", gte),
    ("$in", in_list),
    ("$jsonSchema", json_schema),
    ("$lt", lt),
    ("$lte", lte),
    ("$mod", modulo),
    ("$ne", ne),
    ("$nin", not_in_list),
    ("$nor", nor),
    ("$not", not),
    ("$or", or),
    ("$regex", regex),
    ("$size", size),
    ("$type", type_of),
    ("$where", where_script),
];

/// Build a predicate that resolves `selector` and hands the result to `test`
/// together with the array flattening depth implied by the path.
fn field_predicate<F>(selector: &str, test: F) -> Predicate
where
    F: Fn(&Value, usize) -> Result<bool> + Send + Sync + 'static,
{
    let selector = selector.to_string();
    let depth = selector.split('.').count().saturating_sub(1).max(1);
    Box::new(move |obj| test(&resolve_with(obj, &selector, true), depth))
}

fn as_slice(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}

fn matches_eq(a: &Value, b: &Value, depth: usize) -> bool {
    if is_equal(a, b) || (a.is_nil() && b.is_nil()) {
        return true;
    }
    match a {
        Value::Array(items) => {
            items.iter().any(|x| is_equal(x, b))
                || flatten(items, depth).iter().any(|x| is_equal(x, b))
        }
        _ => false,
    }
}

pub fn eq(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let b = value.clone();
    Ok(field_predicate(selector, move |a, depth| Ok(matches_eq(a, &b, depth))))
}

pub fn ne(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let b = value.clone();
    Ok(field_predicate(selector, move |a, depth| Ok(!matches_eq(a, &b, depth))))
}

/// Candidate of an `$in` list: a literal or a compiled pattern
enum Candidate {
    Literal(Value),
    Pattern(Regex),
}

fn compile_candidates(name: &str, value: &Value) -> Result<Vec<Candidate>> {
    let Some(items) = value.as_array() else {
        bail!("{} expects an array", name);
    };
    items
        .iter()
        .map(|item| match item {
            Value::Regex(re) => re.compile().map(Candidate::Pattern),
            other => Ok(Candidate::Literal(other.clone())),
        })
        .collect()
}

fn matches_in(a: &Value, candidates: &[Candidate]) -> bool {
    if a.is_nil() {
        return candidates
            .iter()
            .any(|c| matches!(c, Candidate::Literal(v) if v.is_nil()));
    }
    let mut values: Vec<&Value> = as_slice(a).iter().collect();
    if a.is_array() {
        values.push(a);
    }
    candidates.iter().any(|candidate| match candidate {
        Candidate::Literal(b) => values.iter().any(|x| is_equal(x, b)),
        Candidate::Pattern(re) => values
            .iter()
            .any(|x| x.as_str().is_some_and(|s| re.is_match(s))),
    })
}

pub fn in_list(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let candidates = compile_candidates("$in", value)?;
    Ok(field_predicate(selector, move |a, _| Ok(matches_in(a, &candidates))))
}

pub fn not_in_list(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let candidates = compile_candidates("$nin", value)?;
    Ok(field_predicate(selector, move |a, _| Ok(!matches_in(a, &candidates))))
}

/// Any element of `a` of the same type class as `b` ordered as `accept` says
fn ordered(selector: &str, value: &Value, accept: fn(Ordering) -> bool) -> Predicate {
    let b = value.clone();
    field_predicate(selector, move |a, _| {
        Ok(as_slice(a)
            .iter()
            .any(|x| type_rank(x) == type_rank(&b) && accept(compare(x, &b))))
    })
}

pub fn lt(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    Ok(ordered(selector, value, Ordering::is_lt))
}

pub fn lte(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    Ok(ordered(selector, value, Ordering::is_le))
}

pub fn gt(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    Ok(ordered(selector, value, Ordering::is_gt))
}

pub fn gte(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    Ok(ordered(selector, value, Ordering::is_ge))
}

pub fn modulo(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let (divisor, remainder) = match value.as_array().map(Vec::as_slice) {
        Some([d, r]) => match (d.as_f64(), r.as_f64()) {
            (Some(d), Some(r)) => (d.trunc(), r.trunc()),
            _ => bail!("$mod divisor and remainder must be numbers"),
        },
        _ => bail!("$mod expects an array of 2 numbers"),
    };
    ensure!(divisor != 0.0, "$mod divisor cannot be 0");
    Ok(field_predicate(selector, move |a, _| {
        Ok(as_slice(a).iter().any(|x| match x {
            Value::Int64(i) => (*i as f64 % divisor) == remainder,
            Value::Float64(f) => (f.trunc() % divisor) == remainder,
            _ => false,
        }))
    }))
}

pub fn regex(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let re = match value {
        Value::Regex(re) => re.compile()?,
        Value::String(pattern) => crate::value::RegexValue::new(pattern.clone(), "").compile()?,
        other => bail!("$regex has to be a string or a regex, got {}", other.type_name()),
    };
    Ok(field_predicate(selector, move |a, _| {
        let lhs = as_slice(a);
        let hit = |x: &Value| x.as_str().is_some_and(|s| re.is_match(s));
        Ok(lhs.iter().any(hit) || flatten(lhs, 1).iter().any(hit))
    }))
}

pub fn exists(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let wanted = value.is_truthy(false);
    Ok(field_predicate(selector, move |a, _| Ok(a.is_missing() != wanted)))
}

pub fn size(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let Some(n) = value.as_i64() else {
        bail!("$size expects an integer");
    };
    Ok(field_predicate(selector, move |a, _| {
        Ok(a.as_array().is_some_and(|items| items.len() as i64 == n))
    }))
}

/// One requirement of an `$all` list
enum Requirement {
    Element(ElementQuery),
    Pattern(Regex),
    Equals(Value),
}

pub fn all(selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let Some(queries) = value.as_array() else {
        bail!("$all expects an array");
    };
    let mut requirements = Vec::with_capacity(queries.len());
    for query in queries {
        requirements.push(match query {
            Value::Object(map) if map.contains_key("$elemMatch") => {
                let criteria = map.get("$elemMatch").cloned().unwrap_or_default();
                Requirement::Element(ElementQuery::new(&criteria, options)?)
            }
            Value::Regex(re) => Requirement::Pattern(re.compile()?),
            other => Requirement::Equals(other.clone()),
        });
    }
    Ok(field_predicate(selector, move |a, depth| {
        if requirements.is_empty() || a.is_missing() {
            return Ok(false);
        }
        let values = as_slice(a);
        if values.is_empty() {
            return Ok(false);
        }
        let flat = flatten(values, depth);
        for requirement in &requirements {
            let matched = match requirement {
                Requirement::Element(query) => query.test_any(values)?,
                Requirement::Pattern(re) => values
                    .iter()
                    .any(|x| x.as_str().is_some_and(|s| re.is_match(s))),
                Requirement::Equals(b) => {
                    values.iter().any(|x| is_equal(x, b)) || flat.iter().any(|x| is_equal(x, b))
                }
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }))
}

/// Sub-query applied to array elements.
///
/// A criteria made only of field operators (`{$gt: 1}`) is applied to the
/// element itself by wrapping it under a temporary key.
pub(crate) struct ElementQuery {
    query: Query,
    wrapped: bool,
}

impl ElementQuery {
    pub(crate) fn new(criteria: &Value, options: &Options) -> Result<Self> {
        let Some(map) = criteria.as_object() else {
            bail!("$elemMatch expects an object");
        };
        let wrapped = !map.is_empty()
            && map.keys().all(|k| is_operator(k))
            && !map
                .keys()
                .any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor" | "$expr" | "$where"));
        let condition = if wrapped {
            let mut outer = Map::new();
            outer.insert("temp".to_string(), criteria.clone());
            Value::Object(outer)
        } else {
            criteria.clone()
        };
        Ok(Self {
            query: Query::new(condition, options.clone())?,
            wrapped,
        })
    }

    pub(crate) fn test(&self, item: &Value) -> Result<bool> {
        if self.wrapped {
            let mut outer = Map::new();
            outer.insert("temp".to_string(), item.clone());
            self.query.test(&Value::Object(outer))
        } else {
            self.query.test(item)
        }
    }

    /// True when any of `items` matches
    pub(crate) fn test_any(&self, items: &[Value]) -> Result<bool> {
        for item in items {
            if self.test(item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub fn elem_match(selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let element = ElementQuery::new(value, options)?;
    Ok(field_predicate(selector, move |a, _| match a {
        Value::Array(items) => element.test_any(items),
        _ => Ok(false),
    }))
}

/// Whether `value` has the BSON type named by `alias` (a name or a number)
fn has_type(value: &Value, alias: &Value) -> Result<bool> {
    let name = match alias {
        Value::String(s) => s.as_str(),
        other => match other.as_i64() {
            Some(1) => "double",
            Some(2) => "string",
            Some(3) => "object",
            Some(4) => "array",
            Some(5) => "binData",
            Some(6) => "undefined",
            Some(8) => "bool",
            Some(9) => "date",
            Some(10) => "null",
            Some(11) => "regex",
            Some(16) => "int",
            Some(18) => "long",
            _ => bail!("$type got an unsupported type code {}", other),
        },
    };
    Ok(match name {
        "number" => value.is_number(),
        "long" => matches!(value, Value::Int64(_)),
        "undefined" | "missing" => value.is_missing(),
        "double" | "string" | "object" | "array" | "binData" | "bool" | "date" | "null"
        | "regex" | "int" => value.type_name() == name,
        other => bail!("$type got an unsupported type alias '{}'", other),
    })
}

pub fn type_of(selector: &str, value: &Value, _options: &Options) -> Result<Predicate> {
    let aliases = as_slice(value).to_vec();
    // validate aliases up front
    for alias in &aliases {
        has_type(&Value::Null, alias)?;
    }
    Ok(field_predicate(selector, move |a, _| {
        for alias in &aliases {
            if has_type(a, alias)? {
                return Ok(true);
            }
            if let Value::Array(items) = a {
                for item in items {
                    if has_type(item, alias)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }))
}

pub fn not(selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let mut criteria = Map::new();
    criteria.insert(selector.to_string(), normalize(value)?);
    let query = Query::new(Value::Object(criteria), options.clone())?;
    Ok(Box::new(move |obj| Ok(!query.test(obj)?)))
}

fn sub_queries(name: &str, value: &Value, options: &Options) -> Result<Vec<Query>> {
    let Some(items) = value.as_array() else {
        bail!("Invalid expression: {} expects value to be an array", name);
    };
    ensure!(!items.is_empty(), "{} expects a non-empty array", name);
    items
        .iter()
        .map(|condition| Query::new(condition.clone(), options.clone()))
        .collect()
}

fn any_matches(queries: &[Query], obj: &Value) -> Result<bool> {
    for query in queries {
        if query.test(obj)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn and(_selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let queries = sub_queries("$and", value, options)?;
    Ok(Box::new(move |obj| {
        for query in &queries {
            if !query.test(obj)? {
                return Ok(false);
            }
        }
        Ok(true)
    }))
}

pub fn or(_selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let queries = sub_queries("$or", value, options)?;
    Ok(Box::new(move |obj| any_matches(&queries, obj)))
}

pub fn nor(_selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let queries = sub_queries("$nor", value, options)?;
    Ok(Box::new(move |obj| Ok(!any_matches(&queries, obj)?)))
}

pub fn expr(_selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let expression = value.clone();
    let options = options.clone();
    Ok(Box::new(move |obj| {
        let result = evaluate(obj, &expression, &ComputeOptions::new(&options))?;
        Ok(result.is_truthy(options.use_strict_mode()))
    }))
}

pub fn where_script(_selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    ensure!(
        options.script_enabled(),
        "$where operator requires 'script_enabled' option to be true."
    );
    let Some(name) = value.as_str() else {
        bail!("$where expects the name of a registered script");
    };
    let Some(script) = options.script(name).cloned() else {
        bail!("$where script '{}' is not registered", name);
    };
    Ok(Box::new(move |obj| Ok(script(obj))))
}

pub fn json_schema(_selector: &str, value: &Value, options: &Options) -> Result<Predicate> {
    let Some(validator) = options.json_schema_validator() else {
        bail!("missing option 'json_schema_validator'. Configure to use \"$jsonSchema\" operator.");
    };
    let check = validator(value)?;
    Ok(Box::new(move |obj| Ok(check(obj))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SchemaPredicate;
    use serde_json::json;
    use std::sync::Arc;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn matches(doc: serde_json::Value, condition: serde_json::Value) -> bool {
        Query::new(v(condition), Options::default())
            .unwrap()
            .test(&v(doc))
            .unwrap()
    }

    #[test]
    fn test_equality() {
        assert!(matches(json!({"a": 1}), json!({"a": 1})));
        assert!(matches(json!({"a": 1.0}), json!({"a": 1})));
        assert!(matches(json!({"a": [1, 2]}), json!({"a": 2})));
        assert!(matches(json!({"a": [1, 2]}), json!({"a": [1, 2]})));
        assert!(matches(json!({"b": 1}), json!({"a": null})));
        assert!(matches(json!({"a": {"x": 1, "y": 2}}), json!({"a": {"y": 2, "x": 1}})));
        assert!(!matches(json!({"a": 1}), json!({"a": {"$ne": 1}})));
        assert!(matches(json!({"a": [{"b": 3}, {"b": 4}]}), json!({"a.b": 4})));
    }

    #[test]
    fn test_ordering_respects_type_class() {
        assert!(matches(json!({"a": 5}), json!({"a": {"$gt": 3, "$lte": 5}})));
        assert!(!matches(json!({"a": "5"}), json!({"a": {"$gt": 3}})));
        assert!(matches(json!({"a": [1, 10]}), json!({"a": {"$gt": 5}})));
        assert!(matches(json!({"a": "abc"}), json!({"a": {"$lt": "abd"}})));
        assert!(!matches(json!({}), json!({"a": {"$lt": 5}})));
    }

    #[test]
    fn test_membership() {
        assert!(matches(json!({"a": 2}), json!({"a": {"$in": [1, 2]}})));
        assert!(matches(json!({"a": [3, 4]}), json!({"a": {"$in": [4]}})));
        assert!(matches(json!({"a": [3, 4]}), json!({"a": {"$in": [[3, 4]]}})));
        assert!(matches(json!({}), json!({"a": {"$in": [null]}})));
        assert!(matches(json!({"a": 9}), json!({"a": {"$nin": [1, 2]}})));

        let pattern = Value::Regex(crate::value::RegexValue::new("^ab", ""));
        let mut criteria = Map::new();
        criteria.insert("$in".to_string(), Value::Array(vec![pattern]));
        let mut condition = Map::new();
        condition.insert("a".to_string(), Value::Object(criteria));
        let query = Query::new(Value::Object(condition), Options::default()).unwrap();
        assert!(query.test(&v(json!({"a": "abc"}))).unwrap());
        assert!(!query.test(&v(json!({"a": "cab"}))).unwrap());

        assert!(Query::new(v(json!({"a": {"$in": 1}})), Options::default()).is_err());
    }

    #[test]
    fn test_regex_exists_size_mod() {
        assert!(matches(json!({"a": "Hello"}), json!({"a": {"$regex": "^hel", "$options": "i"}})));
        assert!(matches(json!({"a": ["x", "hello"]}), json!({"a": {"$regex": "ell"}})));
        assert!(matches(json!({"a": null}), json!({"a": {"$exists": true}})));
        assert!(matches(json!({}), json!({"a": {"$exists": false}})));
        assert!(matches(json!({"a": [1, 2, 3]}), json!({"a": {"$size": 3}})));
        assert!(!matches(json!({"a": 3}), json!({"a": {"$size": 1}})));
        assert!(matches(json!({"a": 10}), json!({"a": {"$mod": [4, 2]}})));
        assert!(Query::new(v(json!({"a": {"$mod": [0, 1]}})), Options::default()).is_err());
    }

    #[test]
    fn test_all() {
        assert!(matches(json!({"tags": ["a", "b", "c"]}), json!({"tags": {"$all": ["a", "c"]}})));
        assert!(!matches(json!({"tags": ["a"]}), json!({"tags": {"$all": ["a", "z"]}})));
        assert!(!matches(json!({"tags": []}), json!({"tags": {"$all": ["a"]}})));
        assert!(matches(json!({"tags": "a"}), json!({"tags": {"$all": ["a"]}})));
        assert!(matches(
            json!({"items": [{"n": 1}, {"n": 5}]}),
            json!({"items": {"$all": [{"$elemMatch": {"n": {"$gt": 4}}}]}})
        ));
    }

    #[test]
    fn test_all_single_element_nested_arrays() {
        let condition = json!({"a.b.c": {"$all": ["123"]}});
        assert!(matches(json!({"a": {"b": {"c": ["123"]}}}), condition.clone()));
        assert!(matches(json!({"a": {"b": [{"c": ["123"]}]}}), condition.clone()));
        assert!(matches(json!({"a": [{"b": [{"c": "123"}]}]}), condition));
    }

    #[test]
    fn test_elem_match() {
        let doc = json!({"results": [{"product": "abc", "score": 10}, {"product": "xyz", "score": 5}]});
        assert!(matches(doc.clone(), json!({"results": {"$elemMatch": {"product": "xyz", "score": {"$gte": 5}}}})));
        assert!(!matches(doc, json!({"results": {"$elemMatch": {"product": "xyz", "score": {"$gte": 8}}}})));
        assert!(matches(json!({"r": [82, 85, 88]}), json!({"r": {"$elemMatch": {"$gte": 80, "$lt": 85}}})));
        assert!(!matches(json!({"r": 82}), json!({"r": {"$elemMatch": {"$gte": 80}}})));
    }

    #[test]
    fn test_type() {
        assert!(matches(json!({"a": 1}), json!({"a": {"$type": "int"}})));
        assert!(matches(json!({"a": 1.5}), json!({"a": {"$type": 1}})));
        assert!(matches(json!({"a": 1.5}), json!({"a": {"$type": "number"}})));
        assert!(matches(json!({"a": ["x", 1]}), json!({"a": {"$type": "string"}})));
        assert!(matches(json!({"a": [1]}), json!({"a": {"$type": ["array"]}})));
        assert!(!matches(json!({"a": "x"}), json!({"a": {"$type": "bool"}})));
        assert!(Query::new(v(json!({"a": {"$type": "decimal128"}})), Options::default()).is_err());
    }

    #[test]
    fn test_logical() {
        let doc = json!({"a": 1, "b": 2});
        assert!(matches(doc.clone(), json!({"$and": [{"a": 1}, {"b": 2}]})));
        assert!(matches(doc.clone(), json!({"$or": [{"a": 9}, {"b": 2}]})));
        assert!(matches(doc.clone(), json!({"$nor": [{"a": 9}, {"b": 9}]})));
        assert!(matches(doc.clone(), json!({"a": {"$not": {"$gt": 3}}})));
        assert!(!matches(doc.clone(), json!({"a": {"$not": 1}})));
        assert!(matches(doc, json!({"$expr": {"$gt": ["$b", "$a"]}})));
        assert!(Query::new(v(json!({"$or": {"a": 1}})), Options::default()).is_err());
    }

    #[test]
    fn test_where_uses_registered_scripts() {
        let script: crate::options::ScriptPredicate =
            Arc::new(|doc: &Value| doc.get("a").and_then(Value::as_i64) == Some(1));
        let opts = Options::default().with_script("is_one", script);
        let query = Query::new(v(json!({"$where": "is_one"})), opts.clone()).unwrap();
        assert!(query.test(&v(json!({"a": 1}))).unwrap());
        assert!(!query.test(&v(json!({"a": 2}))).unwrap());
        assert!(Query::new(v(json!({"$where": "unknown"})), opts).is_err());
    }

    #[test]
    fn test_json_schema_needs_validator() {
        assert!(Query::new(v(json!({"$jsonSchema": {"required": ["a"]}})), Options::default()).is_err());

        let validator: crate::options::JsonSchemaValidator = Arc::new(|schema: &Value| {
            let required: Vec<String> = schema
                .get("required")
                .map(|r| r.clone().into_array())
                .unwrap_or_default()
                .iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect();
            let check: SchemaPredicate =
                Arc::new(move |doc: &Value| required.iter().all(|k| doc.get(k).is_some()));
            Ok::<_, crate::error::EngineError>(check)
        });
        let opts = Options::default().with_json_schema_validator(validator);
        let query = Query::new(v(json!({"$jsonSchema": {"required": ["a"]}})), opts).unwrap();
        assert!(query.test(&v(json!({"a": 0}))).unwrap());
        assert!(!query.test(&v(json!({"b": 0}))).unwrap());
    }
}
