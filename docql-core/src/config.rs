//! Engine configuration
//!
//! Settings are read from TOML and turned into [`Options`]. Host hooks such
//! as collection resolvers and script predicates cannot be expressed in a
//! file and are attached afterwards with the `Options::with_*` builders.

use crate::collation::CollationSpec;
use crate::options::{Options, ProcessingMode};
use crate::value::{Map, Value};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identifier field name
    pub id_key: String,
    pub processing_mode: ProcessingMode,
    pub use_strict_mode: bool,
    /// Allow `$where` to call registered script predicates
    pub script_enabled: bool,
    /// Fall back to the process-wide context for unknown operators
    pub use_global_context: bool,
    pub collation: Option<CollationSpec>,
    /// Global variables visible as `$$name`
    pub variables: IndexMap<String, serde_json::Value>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `docql_core=debug`
    pub level: String,
    pub json_format: bool,
    /// Runs slower than this are logged as warnings
    pub slow_run_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id_key: "_id".to_string(),
            processing_mode: ProcessingMode::None,
            use_strict_mode: true,
            script_enabled: true,
            use_global_context: true,
            collation: None,
            variables: IndexMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            slow_run_threshold_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_key.is_empty() {
            return Err(anyhow::anyhow!("id_key cannot be empty"));
        }
        if self.id_key.contains('.') || self.id_key.starts_with('$') {
            return Err(anyhow::anyhow!("id_key must be a plain field name, got '{}'", self.id_key));
        }
        if let Some(collation) = &self.collation {
            collation.validate().context("Invalid collation")?;
        }
        if self.logging.level.trim().is_empty() {
            return Err(anyhow::anyhow!("logging level cannot be empty"));
        }
        Ok(())
    }

    /// Build engine options from this configuration
    pub fn to_options(&self) -> Options {
        Options::from_config(self)
    }
}

impl Options {
    /// Options described by `config`, backed by the full operator context
    pub fn from_config(config: &EngineConfig) -> Self {
        let variables: Map = config
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value.clone())))
            .collect();
        let options = Options::default()
            .with_id_key(config.id_key.clone())
            .with_processing_mode(config.processing_mode)
            .with_strict_mode(config.use_strict_mode)
            .with_script_enabled(config.script_enabled)
            .with_global_context(config.use_global_context)
            .with_variables(variables);
        match &config.collation {
            Some(collation) => options.with_collation(collation.clone()),
            None => options,
        }
    }
}
