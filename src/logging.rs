//! Structured logging
//!
//! Installs a `tracing` subscriber once per process. `RUST_LOG` overrides the
//! configured level, e.g. `RUST_LOG=trial_reconciler=debug`.
//!
//! Field names used across the crate:
//! - `trial`, `workload`: namespace-qualified object names
//! - `metric`: metric name
//! - `address`, `query`, `completion_time`: capture diagnostics

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns [`Error::Logging`] if logging was already initialized, the level
/// directive is invalid, or another subscriber is installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(Error::Logging("logging already initialized".to_string()));
    }

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::Logging(format!("invalid log level {:?}: {e}", config.level)))?,
    };

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
    };
    installed.map_err(|e| Error::Logging(e.to_string()))?;

    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}
