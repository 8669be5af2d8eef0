//! Engine options and per-evaluation frames
//!
//! `Options` is built once per `Query`/`Aggregator` and never mutated after
//! that; cloning is cheap because the context and host hooks are shared.
//! `ComputeOptions` is the short-lived evaluation frame layered on top: the
//! current root document, local variable bindings and the current group key.

use crate::collation::CollationSpec;
use crate::context::{
    AccumulatorOperator, Context, ExpressionOperator, PipelineOperator, ProjectionOperator,
    QueryOperator, WindowOperator,
};
use crate::error::{bail, Result};
use crate::value::{HashFunction, Map, Value};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Named collection shared with the host
pub type Collection = Arc<RwLock<Vec<Value>>>;

/// Resolves a collection name for `$lookup`, `$unionWith`, `$out` and `$merge`
pub type CollectionResolver = Arc<dyn Fn(&str) -> Option<Collection> + Send + Sync>;

/// Compiled JSON schema check
pub type SchemaPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Builds a schema check from a `$jsonSchema` document
pub type JsonSchemaValidator = Arc<dyn Fn(&Value) -> Result<SchemaPredicate> + Send + Sync>;

/// Host predicate callable from `$where` by name
pub type ScriptPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Copy semantics for documents entering or leaving a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    None,
    CloneInput,
    CloneOutput,
    CloneAll,
}

/// Immutable engine options
#[derive(Clone)]
pub struct Options {
    id_key: String,
    processing_mode: ProcessingMode,
    use_strict_mode: bool,
    script_enabled: bool,
    use_global_context: bool,
    collation: Option<CollationSpec>,
    hash_function: Option<HashFunction>,
    collection_resolver: Option<CollectionResolver>,
    json_schema_validator: Option<JsonSchemaValidator>,
    scripts: HashMap<String, ScriptPredicate>,
    variables: Map,
    context: Arc<Context>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            id_key: "_id".to_string(),
            processing_mode: ProcessingMode::None,
            use_strict_mode: true,
            script_enabled: true,
            use_global_context: true,
            collation: None,
            hash_function: None,
            collection_resolver: None,
            json_schema_validator: None,
            scripts: HashMap::new(),
            variables: Map::new(),
            context: Context::shared_full(),
        }
    }
}

impl Options {
    /// Default options backed by the full operator context
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_key(mut self, id_key: impl Into<String>) -> Self {
        self.id_key = id_key.into();
        self
    }

    pub fn with_processing_mode(mut self, mode: ProcessingMode) -> Self {
        self.processing_mode = mode;
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.use_strict_mode = strict;
        self
    }

    pub fn with_script_enabled(mut self, enabled: bool) -> Self {
        self.script_enabled = enabled;
        self
    }

    pub fn with_global_context(mut self, enabled: bool) -> Self {
        self.use_global_context = enabled;
        self
    }

    pub fn with_collation(mut self, collation: CollationSpec) -> Self {
        self.collation = Some(collation);
        self
    }

    pub fn with_hash_function(mut self, hash: HashFunction) -> Self {
        self.hash_function = Some(hash);
        self
    }

    pub fn with_collection_resolver(mut self, resolver: CollectionResolver) -> Self {
        self.collection_resolver = Some(resolver);
        self
    }

    pub fn with_json_schema_validator(mut self, validator: JsonSchemaValidator) -> Self {
        self.json_schema_validator = Some(validator);
        self
    }

    /// Register a predicate callable as `{$where: "<name>"}`
    pub fn with_script(mut self, name: impl Into<String>, script: ScriptPredicate) -> Self {
        self.scripts.insert(name.into(), script);
        self
    }

    /// Bind global variables readable as `$$name`
    pub fn with_variables(mut self, variables: Map) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Arc::new(context);
        self
    }

    pub fn with_shared_context(mut self, context: Arc<Context>) -> Self {
        self.context = context;
        self
    }

    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    pub fn processing_mode(&self) -> ProcessingMode {
        self.processing_mode
    }

    pub fn use_strict_mode(&self) -> bool {
        self.use_strict_mode
    }

    pub fn script_enabled(&self) -> bool {
        self.script_enabled
    }

    pub fn use_global_context(&self) -> bool {
        self.use_global_context
    }

    pub fn collation(&self) -> Option<&CollationSpec> {
        self.collation.as_ref()
    }

    pub fn hash_function(&self) -> Option<&HashFunction> {
        self.hash_function.as_ref()
    }

    pub fn json_schema_validator(&self) -> Option<&JsonSchemaValidator> {
        self.json_schema_validator.as_ref()
    }

    pub fn script(&self, name: &str) -> Option<&ScriptPredicate> {
        self.scripts.get(name)
    }

    pub fn variables(&self) -> &Map {
        &self.variables
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Resolve a named collection through the host resolver
    pub fn resolve_collection(&self, name: &str) -> Result<Collection> {
        let Some(resolver) = &self.collection_resolver else {
            bail!("collection resolver is required to access collection '{}'", name);
        };
        match resolver(name) {
            Some(collection) => Ok(collection),
            None => bail!("collection '{}' could not be resolved", name),
        }
    }

    fn lookup<T>(&self, name: &str, get: impl Fn(&Context) -> Option<T>) -> Option<T> {
        if let Some(f) = get(&self.context) {
            return Some(f);
        }
        if !self.use_global_context {
            return None;
        }
        let global = Context::global().read();
        let found = get(&*global);
        if found.is_some() {
            debug!("operator '{}' resolved through the global context", name);
        }
        found
    }

    pub fn accumulator_operator(&self, name: &str) -> Option<AccumulatorOperator> {
        self.lookup(name, |ctx| ctx.accumulator(name))
    }

    pub fn expression_operator(&self, name: &str) -> Option<ExpressionOperator> {
        self.lookup(name, |ctx| ctx.expression(name))
    }

    pub fn pipeline_operator(&self, name: &str) -> Option<PipelineOperator> {
        self.lookup(name, |ctx| ctx.pipeline(name))
    }

    pub fn projection_operator(&self, name: &str) -> Option<ProjectionOperator> {
        self.lookup(name, |ctx| ctx.projection(name))
    }

    pub fn query_operator(&self, name: &str) -> Option<QueryOperator> {
        self.lookup(name, |ctx| ctx.query(name))
    }

    pub fn window_operator(&self, name: &str) -> Option<WindowOperator> {
        self.lookup(name, |ctx| ctx.window(name))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("id_key", &self.id_key)
            .field("processing_mode", &self.processing_mode)
            .field("use_strict_mode", &self.use_strict_mode)
            .field("script_enabled", &self.script_enabled)
            .field("use_global_context", &self.use_global_context)
            .field("collation", &self.collation)
            .field("custom_hash", &self.hash_function.is_some())
            .field("scripts", &self.scripts.keys().collect::<Vec<_>>())
            .field("context", &self.context)
            .finish()
    }
}

/// Local bindings of an evaluation frame
#[derive(Debug, Clone, Default)]
pub struct LocalData {
    /// Variables bound by `$let`, `$map`, `$filter` and friends
    pub variables: Map,
    /// Key of the group being accumulated
    pub group_id: Option<Value>,
}

/// Evaluation frame for one document
#[derive(Debug, Clone)]
pub struct ComputeOptions<'a> {
    options: &'a Options,
    root: Option<&'a Value>,
    local: LocalData,
    now: DateTime<Utc>,
}

impl<'a> ComputeOptions<'a> {
    /// Fresh frame with no root; `$$NOW` is fixed at creation
    pub fn new(options: &'a Options) -> Self {
        Self {
            options,
            root: None,
            local: LocalData::default(),
            now: Utc::now(),
        }
    }

    /// Child frame evaluating against a new root document
    pub fn with_root<'b>(&self, root: &'b Value) -> ComputeOptions<'b>
    where
        'a: 'b,
    {
        ComputeOptions {
            options: self.options,
            root: Some(root),
            local: self.local.clone(),
            now: self.now,
        }
    }

    /// Child frame with the root cleared, so the next evaluation binds it
    pub fn without_root(&self) -> ComputeOptions<'a> {
        ComputeOptions {
            root: None,
            ..self.clone()
        }
    }

    /// Child frame with extra local variables
    pub fn with_variables(&self, variables: Map) -> Self {
        let mut child = self.clone();
        child.local.variables.extend(variables);
        child
    }

    /// Child frame carrying a group key
    pub fn with_group_id(&self, group_id: Value) -> Self {
        let mut child = self.clone();
        child.local.group_id = Some(group_id);
        child
    }

    pub fn options(&self) -> &'a Options {
        self.options
    }

    pub fn root(&self) -> Option<&'a Value> {
        self.root
    }

    pub fn local(&self) -> &LocalData {
        &self.local
    }

    pub fn group_id(&self) -> Option<&Value> {
        self.local.group_id.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn id_key(&self) -> &'a str {
        self.options.id_key()
    }

    pub fn use_strict_mode(&self) -> bool {
        self.options.use_strict_mode()
    }

    pub fn hash_function(&self) -> Option<&'a HashFunction> {
        self.options.hash_function()
    }

    /// Look up a variable: local bindings, then `this`, then global bindings
    pub fn variable(&self, name: &str, current: &Value) -> Option<Value> {
        if let Some(v) = self.local.variables.get(name) {
            return Some(v.clone());
        }
        if name == "this" {
            return Some(current.clone());
        }
        self.options.variables().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExpressionOperator;

    fn seven(_obj: &Value, _expr: &Value, _opts: &ComputeOptions<'_>) -> Result<Value> {
        Ok(Value::Int64(7))
    }

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert_eq!(opts.id_key(), "_id");
        assert_eq!(opts.processing_mode(), ProcessingMode::None);
        assert!(opts.use_strict_mode());
        assert!(opts.expression_operator("$add").is_some());
    }

    #[test]
    fn test_builder_does_not_mutate_original() {
        let base = Options::default();
        let derived = base.clone().with_id_key("key").with_strict_mode(false);
        assert_eq!(base.id_key(), "_id");
        assert_eq!(derived.id_key(), "key");
        assert!(!derived.use_strict_mode());
    }

    #[test]
    fn test_global_fallback() {
        Context::global()
            .write()
            .register_expression("$globalSeven", seven as ExpressionOperator)
            .unwrap();
        let opts = Options::default().with_context(Context::new());
        assert!(opts.expression_operator("$globalSeven").is_some());
        let isolated = opts.with_global_context(false);
        assert!(isolated.expression_operator("$globalSeven").is_none());
    }

    #[test]
    fn test_variable_layers() {
        let mut globals = Map::new();
        globals.insert("x".into(), Value::Int64(1));
        globals.insert("y".into(), Value::Int64(1));
        let opts = Options::default().with_variables(globals);
        let frame = ComputeOptions::new(&opts);
        let mut locals = Map::new();
        locals.insert("y".into(), Value::Int64(2));
        let child = frame.with_variables(locals);
        let current = Value::from("doc");
        assert_eq!(child.variable("x", &current), Some(Value::Int64(1)));
        assert_eq!(child.variable("y", &current), Some(Value::Int64(2)));
        assert_eq!(child.variable("this", &current), Some(current.clone()));
        assert_eq!(child.variable("z", &current), None);
    }

    #[test]
    fn test_missing_resolver() {
        let err = Options::default().resolve_collection("users").unwrap_err();
        assert!(err.message().contains("resolver"));
    }
}
