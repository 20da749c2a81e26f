//! Controller configuration
//!
//! Resolved once at startup and shared read-only by the reconciler and the
//! controller runtime. Durations are written in milliseconds in JSON.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use trial_reconciler::config::ControllerConfig;
//!
//! let config = ControllerConfig::builder()
//!     .stable_grace(Duration::from_millis(500))
//!     .max_concurrent_reconciles(8)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_concurrent_reconciles, 8);
//!
//! let parsed = ControllerConfig::from_json(r#"{"stable_grace_ms": 250}"#).unwrap();
//! assert_eq!(parsed.stable_grace, Duration::from_millis(250));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::workload::WorkloadDefaults;
use crate::{Error, Result};

/// Anti-flicker window after a `Stable` transition.
pub const DEFAULT_STABLE_GRACE: Duration = Duration::from_secs(1);

/// Process configuration for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Passes within this window after a `Stable` transition only requeue
    #[serde(rename = "stable_grace_ms", with = "millis")]
    pub stable_grace: Duration,
    /// Trials reconciled in parallel
    pub max_concurrent_reconciles: usize,
    /// First delay after an infrastructure error
    #[serde(rename = "error_backoff_initial_ms", with = "millis")]
    pub error_backoff_initial: Duration,
    /// Upper bound for the error delay
    #[serde(rename = "error_backoff_max_ms", with = "millis")]
    pub error_backoff_max: Duration,
    /// Run workload defaults
    pub workload: WorkloadDefaults,
    /// Logging
    pub logging: LoggingConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stable_grace: DEFAULT_STABLE_GRACE,
            max_concurrent_reconciles: 4,
            error_backoff_initial: Duration::from_millis(100),
            error_backoff_max: Duration::from_secs(30),
            workload: WorkloadDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// Parse and validate a JSON document; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed input or
    /// [`Error::InvalidConfig`] if validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the controller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.workload.image.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "default workload image must not be empty".to_string(),
            ));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_reconciles must be at least 1".to_string(),
            ));
        }
        if self.error_backoff_initial > self.error_backoff_max {
            return Err(Error::InvalidConfig(format!(
                "error backoff initial {:?} exceeds maximum {:?}",
                self.error_backoff_initial, self.error_backoff_max
            )));
        }
        Ok(())
    }

    /// Error backoff for the given number of consecutive failures (1-based).
    #[must_use]
    pub fn error_backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.error_backoff_initial
            .saturating_mul(1u32 << exp)
            .min(self.error_backoff_max)
    }
}

/// Builder for `ControllerConfig`.
#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    /// Set the anti-flicker window.
    #[must_use]
    pub fn stable_grace(mut self, grace: Duration) -> Self {
        self.config.stable_grace = grace;
        self
    }

    /// Set the reconcile concurrency.
    #[must_use]
    pub fn max_concurrent_reconciles(mut self, n: usize) -> Self {
        self.config.max_concurrent_reconciles = n;
        self
    }

    /// Set the error backoff bounds.
    #[must_use]
    pub fn error_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.error_backoff_initial = initial;
        self.config.error_backoff_max = max;
        self
    }

    /// Set the run workload defaults.
    #[must_use]
    pub fn workload(mut self, defaults: WorkloadDefaults) -> Self {
        self.config.workload = defaults;
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if validation fails.
    pub fn build(self) -> Result<ControllerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
