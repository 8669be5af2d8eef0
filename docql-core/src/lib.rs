//! DocQL Core - in-memory document query and aggregation engine
//!
//! This crate provides:
//! - A dynamic document `Value` model with total ordering and stable hashing
//! - Lazy pull-based streams
//! - An operator registry covering query, projection, expression,
//!   accumulator, window and pipeline operators
//! - `Query` filters with lazy cursors and `Aggregator` pipelines

pub mod aggregator;
pub mod collation;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod lazy;
pub mod operators;
pub mod options;
pub mod query;
pub mod value;

pub use aggregator::Aggregator;
pub use collation::CollationSpec;
pub use config::{EngineConfig, LoggingConfig};
pub use context::{Context, OperatorType};
pub use error::{EngineError, Result};
pub use evaluator::compute_value;
pub use lazy::Lazy;
pub use operators::window::WindowCache;
pub use options::{Collection, ComputeOptions, Options, ProcessingMode};
pub use query::{Cursor, Query};
pub use value::{Map, Value};
