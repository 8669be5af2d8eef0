//! Operator registry
//!
//! A `Context` maps operator names to implementations, one table per
//! operator category. Registration is additive: a name can be bound once per
//! category, re-binding it to the same function is a no-op and re-binding it
//! to a different function is rejected.
//!
//! A process-wide context is available through `Context::global()` and is
//! consulted when options enable the global fallback and the call-specific
//! context does not know an operator.

use crate::error::{bail, ensure, Result};
use crate::lazy::Lazy;
use crate::operators::{self, window::WindowOperatorInput};
use crate::options::{ComputeOptions, Options};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Compiled query predicate
pub type Predicate = Box<dyn Fn(&Value) -> Result<bool> + Send + Sync>;

/// Summarizes a whole array: `(collection, expr, options)`
pub type AccumulatorOperator = fn(&[Value], &Value, &ComputeOptions<'_>) -> Result<Value>;
/// Evaluated per document: `(obj, expr, options)`
pub type ExpressionOperator = fn(&Value, &Value, &ComputeOptions<'_>) -> Result<Value>;
/// Transforms a stream: `(collection, expr, options)`
pub type PipelineOperator = fn(Lazy, &Value, &Options) -> Result<Lazy>;
/// Projects a field: `(obj, expr, selector, options)`
pub type ProjectionOperator = fn(&Value, &Value, &str, &ComputeOptions<'_>) -> Result<Value>;
/// Compiles a field condition into a predicate: `(selector, value, options)`
pub type QueryOperator = fn(&str, &Value, &Options) -> Result<Predicate>;
/// Evaluated per document with the whole partition in view
pub type WindowOperator =
    fn(&Value, &[Value], &WindowOperatorInput<'_>, &ComputeOptions<'_>) -> Result<Value>;

/// Operator categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorType {
    Accumulator,
    Expression,
    Pipeline,
    Projection,
    Query,
    Window,
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorType::Accumulator => "accumulator",
            OperatorType::Expression => "expression",
            OperatorType::Pipeline => "pipeline",
            OperatorType::Projection => "projection",
            OperatorType::Query => "query",
            OperatorType::Window => "window",
        };
        f.write_str(name)
    }
}

/// Function pointer identity, used to detect conflicting registrations
pub trait OperatorFn: Copy {
    fn address(self) -> usize;
}

macro_rules! impl_operator_fn {
    ($($ty:ty),*) => {
        $(impl OperatorFn for $ty {
            fn address(self) -> usize {
                self as usize
            }
        })*
    };
}

impl_operator_fn!(
    AccumulatorOperator,
    ExpressionOperator,
    PipelineOperator,
    ProjectionOperator,
    QueryOperator,
    WindowOperator
);

/// Check that a name looks like `$name`
pub fn is_operator(name: &str) -> bool {
    name.len() > 1
        && name.starts_with('$')
        && name[1..]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Registry of operator implementations
#[derive(Clone, Default)]
pub struct Context {
    accumulator: HashMap<String, AccumulatorOperator>,
    expression: HashMap<String, ExpressionOperator>,
    pipeline: HashMap<String, PipelineOperator>,
    projection: HashMap<String, ProjectionOperator>,
    query: HashMap<String, QueryOperator>,
    window: HashMap<String, WindowOperator>,
}

fn insert<F: OperatorFn>(
    table: &mut HashMap<String, F>,
    kind: OperatorType,
    name: &str,
    f: F,
) -> Result<()> {
    ensure!(is_operator(name), "invalid operator name '{}'", name);
    if let Some(existing) = table.get(name) {
        if existing.address() != f.address() {
            bail!("{} operator '{}' is already registered", kind, name);
        }
        return Ok(());
    }
    table.insert(name.to_string(), f);
    Ok(())
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with the query and projection operators and the basic stages
    pub fn init() -> Self {
        let mut ctx = Self::new();
        for &(name, f) in operators::query::OPERATORS {
            ctx.query.insert(name.to_string(), f);
        }
        for &(name, f) in operators::projection::OPERATORS {
            ctx.projection.insert(name.to_string(), f);
        }
        for &(name, f) in operators::pipeline::CORE_OPERATORS {
            ctx.pipeline.insert(name.to_string(), f);
        }
        ctx
    }

    /// Context with every built-in operator
    pub fn full() -> Self {
        let mut ctx = Self::init();
        for &(name, f) in operators::accumulator::OPERATORS {
            ctx.accumulator.insert(name.to_string(), f);
        }
        for &(name, f) in operators::expression::OPERATORS {
            ctx.expression.insert(name.to_string(), f);
        }
        for &(name, f) in operators::pipeline::OPERATORS {
            ctx.pipeline.insert(name.to_string(), f);
        }
        for &(name, f) in operators::window::OPERATORS {
            ctx.window.insert(name.to_string(), f);
        }
        ctx
    }

    /// Shared instance of `Context::full()`
    pub fn shared_full() -> Arc<Context> {
        static FULL: OnceLock<Arc<Context>> = OnceLock::new();
        FULL.get_or_init(|| Arc::new(Context::full())).clone()
    }

    /// Process-wide fallback context, empty until operators are registered
    pub fn global() -> &'static RwLock<Context> {
        static GLOBAL: OnceLock<RwLock<Context>> = OnceLock::new();
        GLOBAL.get_or_init(|| RwLock::new(Context::new()))
    }

    pub fn register_accumulator(&mut self, name: &str, f: AccumulatorOperator) -> Result<()> {
        insert(&mut self.accumulator, OperatorType::Accumulator, name, f)
    }

    pub fn register_expression(&mut self, name: &str, f: ExpressionOperator) -> Result<()> {
        insert(&mut self.expression, OperatorType::Expression, name, f)
    }

    pub fn register_pipeline(&mut self, name: &str, f: PipelineOperator) -> Result<()> {
        insert(&mut self.pipeline, OperatorType::Pipeline, name, f)
    }

    pub fn register_projection(&mut self, name: &str, f: ProjectionOperator) -> Result<()> {
        insert(&mut self.projection, OperatorType::Projection, name, f)
    }

    pub fn register_query(&mut self, name: &str, f: QueryOperator) -> Result<()> {
        insert(&mut self.query, OperatorType::Query, name, f)
    }

    pub fn register_window(&mut self, name: &str, f: WindowOperator) -> Result<()> {
        insert(&mut self.window, OperatorType::Window, name, f)
    }

    /// Extend with accumulator operators, consuming and returning the context
    pub fn add_accumulator_ops<'n>(
        mut self,
        ops: impl IntoIterator<Item = (&'n str, AccumulatorOperator)>,
    ) -> Result<Self> {
        for (name, f) in ops {
            self.register_accumulator(name, f)?;
        }
        Ok(self)
    }

    /// Extend with expression operators
    pub fn add_expression_ops<'n>(
        mut self,
        ops: impl IntoIterator<Item = (&'n str, ExpressionOperator)>,
    ) -> Result<Self> {
        for (name, f) in ops {
            self.register_expression(name, f)?;
        }
        Ok(self)
    }

    /// Extend with pipeline operators
    pub fn add_pipeline_ops<'n>(
        mut self,
        ops: impl IntoIterator<Item = (&'n str, PipelineOperator)>,
    ) -> Result<Self> {
        for (name, f) in ops {
            self.register_pipeline(name, f)?;
        }
        Ok(self)
    }

    /// Extend with projection operators
    pub fn add_projection_ops<'n>(
        mut self,
        ops: impl IntoIterator<Item = (&'n str, ProjectionOperator)>,
    ) -> Result<Self> {
        for (name, f) in ops {
            self.register_projection(name, f)?;
        }
        Ok(self)
    }

    /// Extend with query operators
    pub fn add_query_ops<'n>(
        mut self,
        ops: impl IntoIterator<Item = (&'n str, QueryOperator)>,
    ) -> Result<Self> {
        for (name, f) in ops {
            self.register_query(name, f)?;
        }
        Ok(self)
    }

    /// Extend with window operators
    pub fn add_window_ops<'n>(
        mut self,
        ops: impl IntoIterator<Item = (&'n str, WindowOperator)>,
    ) -> Result<Self> {
        for (name, f) in ops {
            self.register_window(name, f)?;
        }
        Ok(self)
    }

    pub fn accumulator(&self, name: &str) -> Option<AccumulatorOperator> {
        self.accumulator.get(name).copied()
    }

    pub fn expression(&self, name: &str) -> Option<ExpressionOperator> {
        self.expression.get(name).copied()
    }

    pub fn pipeline(&self, name: &str) -> Option<PipelineOperator> {
        self.pipeline.get(name).copied()
    }

    pub fn projection(&self, name: &str) -> Option<ProjectionOperator> {
        self.projection.get(name).copied()
    }

    pub fn query(&self, name: &str) -> Option<QueryOperator> {
        self.query.get(name).copied()
    }

    pub fn window(&self, name: &str) -> Option<WindowOperator> {
        self.window.get(name).copied()
    }

    /// Number of registered operators in a category
    pub fn len(&self, kind: OperatorType) -> usize {
        match kind {
            OperatorType::Accumulator => self.accumulator.len(),
            OperatorType::Expression => self.expression.len(),
            OperatorType::Pipeline => self.pipeline.len(),
            OperatorType::Projection => self.projection.len(),
            OperatorType::Query => self.query.len(),
            OperatorType::Window => self.window.len(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("accumulator", &self.accumulator.len())
            .field("expression", &self.expression.len())
            .field("pipeline", &self.pipeline.len())
            .field("projection", &self.projection.len())
            .field("query", &self.query.len())
            .field("window", &self.window.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(_obj: &Value, _expr: &Value, _opts: &ComputeOptions<'_>) -> Result<Value> {
        Ok(Value::Int64(42))
    }

    fn other(_obj: &Value, _expr: &Value, _opts: &ComputeOptions<'_>) -> Result<Value> {
        Ok(Value::Int64(7))
    }

    #[test]
    fn test_operator_name_pattern() {
        assert!(is_operator("$sum"));
        assert!(is_operator("$date_1"));
        assert!(!is_operator("sum"));
        assert!(!is_operator("$"));
        assert!(!is_operator("$a.b"));
    }

    #[test]
    fn test_registration_conflicts() {
        let mut ctx = Context::new();
        ctx.register_expression("$answer", answer).unwrap();
        ctx.register_expression("$answer", answer).unwrap();
        let err = ctx.register_expression("$answer", other).unwrap_err();
        assert!(err.message().contains("already registered"));
        assert!(ctx.register_expression("answer", answer).is_err());
    }

    #[test]
    fn test_add_ops_is_chainable() {
        let ctx = Context::new()
            .add_expression_ops([("$answer", answer as ExpressionOperator)])
            .unwrap();
        assert!(ctx.expression("$answer").is_some());
        assert!(ctx.accumulator("$answer").is_none());
    }

    #[test]
    fn test_builtin_contexts() {
        let init = Context::init();
        assert!(init.query("$eq").is_some());
        assert!(init.pipeline("$match").is_some());
        assert!(init.pipeline("$group").is_none());

        let full = Context::full();
        assert!(full.pipeline("$group").is_some());
        assert!(full.accumulator("$sum").is_some());
        assert!(full.window("$rank").is_some());
        assert!(full.len(OperatorType::Expression) > 30);
    }
}
