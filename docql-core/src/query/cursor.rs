//! Lazy query result cursor
//!
//! Filtering happens first, then sort, skip and limit, then projection.
//! The stages are assembled on the first pull, so modifiers may be chained
//! freely before iteration starts.

use super::Query;
use crate::aggregator::Aggregator;
use crate::collation::CollationSpec;
use crate::error::Result;
use crate::lazy::Lazy;
use crate::value::{Map, Value};

/// Result set of `Query::find`
pub struct Cursor {
    source: Option<Lazy>,
    query: Query,
    projection: Option<Value>,
    sort: Option<Value>,
    skip: Option<usize>,
    limit: Option<usize>,
    collation: Option<CollationSpec>,
    result: Option<Lazy>,
}

impl Cursor {
    pub(crate) fn new(source: Lazy, query: Query, projection: Option<Value>) -> Self {
        Self {
            source: Some(source),
            query,
            projection,
            sort: None,
            skip: None,
            limit: None,
            collation: None,
            result: None,
        }
    }

    /// Sort the matches by a `{field: 1 | -1}` specification
    pub fn sort(mut self, spec: Value) -> Self {
        self.sort = Some(spec);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Compare strings with a collation when sorting
    pub fn collation(mut self, spec: CollationSpec) -> Self {
        self.collation = Some(spec);
        self
    }

    fn stage(name: &str, value: Value) -> Value {
        let mut stage = Map::with_capacity(1);
        stage.insert(name.to_string(), value);
        Value::Object(stage)
    }

    fn fetch(&mut self) -> Result<&mut Lazy> {
        if self.result.is_none() {
            let source = self.source.take().unwrap_or_else(Lazy::empty);
            let query = self.query.clone();
            let filtered = source.filter(move |obj| query.test(obj));

            let mut pipeline = Vec::new();
            if let Some(sort) = self.sort.take() {
                pipeline.push(Self::stage("$sort", sort));
            }
            if let Some(skip) = self.skip {
                pipeline.push(Self::stage("$skip", Value::from(skip)));
            }
            if let Some(limit) = self.limit {
                pipeline.push(Self::stage("$limit", Value::from(limit)));
            }
            if let Some(projection) = self.projection.take() {
                pipeline.push(Self::stage("$project", projection));
            }

            let mut options = self.query.options().clone();
            if let Some(collation) = self.collation.take() {
                options = options.with_collation(collation);
            }
            let stream = Aggregator::new(Value::Array(pipeline), options)?.stream(filtered)?;
            self.result = Some(stream);
        }
        Ok(self.result.get_or_insert_with(Lazy::empty))
    }

    /// All remaining results
    pub fn all(mut self) -> Result<Vec<Value>> {
        self.fetch()?;
        match self.result.take() {
            Some(stream) => stream.collect_values(),
            None => Ok(Vec::new()),
        }
    }

    /// Number of remaining results
    pub fn count(mut self) -> Result<usize> {
        self.fetch()?.size()
    }
}

impl Iterator for Cursor {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.fetch() {
            Ok(stream) => stream.next(),
            Err(e) => {
                self.result = Some(Lazy::empty());
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("query", &self.query)
            .field("projection", &self.projection)
            .field("sort", &self.sort)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("started", &self.result.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn people() -> Vec<Value> {
        vec![
            v(json!({"_id": 1, "name": "bob", "age": 31})),
            v(json!({"_id": 2, "name": "Alice", "age": 25})),
            v(json!({"_id": 3, "name": "carol", "age": 40})),
            v(json!({"_id": 4, "name": "dave", "age": 19})),
        ]
    }

    #[test]
    fn test_filter_sort_skip_limit_project() {
        let query = Query::new(v(json!({"age": {"$gt": 20}})), Options::default()).unwrap();
        let out = query
            .find(Lazy::new(people()), Some(v(json!({"name": 1, "_id": 0}))))
            .sort(v(json!({"age": -1})))
            .skip(1)
            .limit(1)
            .all()
            .unwrap();
        assert_eq!(out, vec![v(json!({"name": "bob"}))]);
    }

    #[test]
    fn test_count_and_iteration() {
        let query = Query::new(v(json!({"age": {"$lt": 35}})), Options::default()).unwrap();
        assert_eq!(query.find(Lazy::new(people()), None).count().unwrap(), 3);

        let ids: Vec<Value> = query
            .find(Lazy::new(people()), None)
            .map(|doc| doc.unwrap().get("_id").cloned().unwrap())
            .collect();
        assert_eq!(ids, vec![Value::Int64(1), Value::Int64(2), Value::Int64(4)]);
    }

    #[test]
    fn test_collation_sort() {
        let docs = vec![v(json!({"n": "beta"})), v(json!({"n": "Zulu"})), v(json!({"n": "alpha"}))];
        let query = Query::new(Value::object(), Options::default()).unwrap();

        let plain = query
            .find(Lazy::new(docs.clone()), None)
            .sort(v(json!({"n": 1})))
            .all()
            .unwrap();
        assert_eq!(plain[0], v(json!({"n": "Zulu"})));

        let mut spec = CollationSpec::new("en");
        spec.strength = 1;
        let folded = query
            .find(Lazy::new(docs), None)
            .sort(v(json!({"n": 1})))
            .collation(spec)
            .all()
            .unwrap();
        assert_eq!(folded, vec![v(json!({"n": "alpha"})), v(json!({"n": "beta"})), v(json!({"n": "Zulu"}))]);
    }

    #[test]
    fn test_nothing_pulled_before_iteration() {
        let pulled = Rc::new(Cell::new(0));
        let counter = pulled.clone();
        let mut docs = people().into_iter();
        let source = Lazy::from_fn(move || {
            counter.set(counter.get() + 1);
            docs.next()
        });
        let query = Query::new(Value::object(), Options::default()).unwrap();
        let mut cursor = query.find(source, None).limit(1);
        assert_eq!(pulled.get(), 0);
        assert!(cursor.next().is_some());
        assert_eq!(pulled.get(), 1);
    }
}
