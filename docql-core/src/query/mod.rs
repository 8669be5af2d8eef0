//! Query façade
//!
//! A `Query` owns a compiled filter and the options it was compiled with.
//! It tests single documents, filters collections through a lazy `Cursor`,
//! and splits out the documents that do not match.

pub mod compiler;
pub mod cursor;

pub use cursor::Cursor;

use crate::context::Predicate;
use crate::error::Result;
use crate::lazy::Lazy;
use crate::options::Options;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Compiled filter document
#[derive(Clone)]
pub struct Query {
    condition: Value,
    predicates: Arc<Vec<Predicate>>,
    options: Options,
}

impl Query {
    /// Compile a filter document
    pub fn new(condition: Value, options: Options) -> Result<Self> {
        let predicates = compiler::compile(&condition, &options)?;
        debug!(predicates = predicates.len(), "compiled query");
        Ok(Self {
            condition,
            predicates: Arc::new(predicates),
            options,
        })
    }

    /// Parse and compile a filter given as JSON text
    pub fn from_json_str(condition: &str, options: Options) -> Result<Self> {
        Self::new(Value::from_json_str(condition)?, options)
    }

    pub fn condition(&self) -> &Value {
        &self.condition
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Check a document against every predicate, stopping at the first miss
    pub fn test(&self, obj: &Value) -> Result<bool> {
        for predicate in self.predicates.iter() {
            if !predicate(obj)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Lazily select matching documents, optionally projecting them
    pub fn find(&self, collection: Lazy, projection: Option<Value>) -> Cursor {
        Cursor::new(collection, self.clone(), projection)
    }

    /// Documents that do not match, in input order
    pub fn remove<I>(&self, collection: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut kept = Vec::new();
        for obj in collection {
            if !self.test(&obj)? {
                kept.push(obj);
            }
        }
        Ok(kept)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("condition", &self.condition)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_empty_condition_matches_everything() {
        let query = Query::new(Value::object(), Options::default()).unwrap();
        assert!(query.test(&v(json!({"a": 1}))).unwrap());
        assert!(query.test(&Value::object()).unwrap());
    }

    #[test]
    fn test_conjunction() {
        let query = Query::from_json_str(r#"{"a": {"$gte": 2}, "b": "x"}"#, Options::default()).unwrap();
        assert!(query.test(&v(json!({"a": 3, "b": "x"}))).unwrap());
        assert!(!query.test(&v(json!({"a": 3, "b": "y"}))).unwrap());
        assert!(!query.test(&v(json!({"a": 1, "b": "x"}))).unwrap());
    }

    #[test]
    fn test_errors_surface_from_test() {
        let query = Query::new(v(json!({"$expr": {"$divide": ["$a", 0]}})), Options::default()).unwrap();
        assert!(query.test(&v(json!({"a": 1}))).is_err());
    }

    #[test]
    fn test_remove_keeps_non_matching() {
        let query = Query::new(v(json!({"done": true})), Options::default()).unwrap();
        let docs = vec![
            v(json!({"id": 1, "done": true})),
            v(json!({"id": 2, "done": false})),
            v(json!({"id": 3})),
        ];
        let kept = query.remove(docs).unwrap();
        assert_eq!(kept, vec![v(json!({"id": 2, "done": false})), v(json!({"id": 3}))]);
    }
}
