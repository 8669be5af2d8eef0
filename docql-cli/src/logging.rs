//! Logging setup and slow run reporting

use anyhow::Result;
use docql_core::LoggingConfig;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = Registry::default().with(env_filter);

    if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr);
        subscriber.with(json_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact();
        subscriber.with(fmt_layer).try_init()?;
    }
    Ok(())
}

/// Times one command and warns when it exceeds the threshold
pub struct RunTimer {
    started: Instant,
    threshold: Duration,
    command: &'static str,
}

impl RunTimer {
    pub fn start(command: &'static str, threshold_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            threshold: Duration::from_millis(threshold_ms),
            command,
        }
    }

    /// Log the run if it was slow, returning whether it was
    pub fn finish(self, documents: usize) -> bool {
        let elapsed = self.started.elapsed();
        let slow = elapsed >= self.threshold;
        if slow {
            tracing::warn!(
                target: "slow_run",
                command = self.command,
                duration_ms = elapsed.as_millis() as u64,
                documents,
                "Slow run detected"
            );
        } else {
            tracing::debug!(
                command = self.command,
                duration_ms = elapsed.as_millis() as u64,
                documents,
                "Run finished"
            );
        }
        slow
    }
}
