//! Aggregation pipeline façade
//!
//! An `Aggregator` validates a pipeline once and can then run it over any
//! number of inputs. Stages are resolved through the options' operator
//! registry at construction, so an unknown stage fails before any input is
//! read.

use crate::context::PipelineOperator;
use crate::error::{bail, Result};
use crate::lazy::Lazy;
use crate::options::Options;
use crate::value::Value;
use std::fmt;
use tracing::{debug, trace};

/// A resolved pipeline stage
#[derive(Clone)]
struct Stage {
    operator: String,
    expr: Value,
    f: PipelineOperator,
}

/// Compiled aggregation pipeline
#[derive(Clone)]
pub struct Aggregator {
    stages: Vec<Stage>,
    options: Options,
}

impl Aggregator {
    /// Validate `pipeline`, an array of one-key stage objects
    pub fn new(pipeline: Value, options: Options) -> Result<Self> {
        let Value::Array(items) = pipeline else {
            bail!("pipeline must be an array of stages, got {}", pipeline.type_name());
        };
        let mut stages = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(map) = item else {
                bail!("pipeline stage must be an object, got {}", item.type_name());
            };
            if map.len() != 1 {
                bail!("pipeline stage must contain exactly one operator, found {}", map.len());
            }
            let Some((operator, expr)) = map.into_iter().next() else {
                bail!("pipeline stage must contain exactly one operator");
            };
            let Some(f) = options.pipeline_operator(&operator) else {
                bail!("unknown pipeline operator '{}'", operator);
            };
            stages.push(Stage { operator, expr, f });
        }
        debug!(stages = stages.len(), "compiled pipeline");
        Ok(Self { stages, options })
    }

    /// Parse a JSON pipeline
    pub fn from_json_str(pipeline: &str, options: Options) -> Result<Self> {
        Self::new(Value::from_json_str(pipeline)?, options)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Stage operator names in order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.operator.as_str()).collect()
    }

    /// Attach every stage to `collection`. Nothing is evaluated until the
    /// returned stream is pulled.
    pub fn stream(&self, collection: Lazy) -> Result<Lazy> {
        self.stages.iter().try_fold(collection, |stream, stage| {
            trace!(operator = %stage.operator, "attaching stage");
            (stage.f)(stream, &stage.expr, &self.options)
        })
    }

    /// Run the pipeline to completion
    pub fn run<I>(&self, collection: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'static,
    {
        self.stream(Lazy::new(collection))?.collect_values()
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("stages", &self.stage_names())
            .finish()
    }
}
