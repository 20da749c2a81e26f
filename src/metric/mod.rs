//! Metric Capture Client
//!
//! The reconciler resolves a metric's target (see [`resolve_target`]) and
//! hands it to a [`MetricCapture`] implementation for one collection attempt.
//! A capture either yields a value with an optional standard deviation or a
//! [`CaptureError`]. Errors with a positive `retry_after` are transient and
//! never consume the metric's attempt budget.

mod local;
mod target;

pub use local::LocalCapture;
pub use target::{resolve_target, target_strategy, MetricTarget, ServiceEndpoint, TargetStrategy};

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::trial::{Metric, Trial};

/// A successful capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Captured {
    /// Measured value
    pub value: f64,
    /// Standard deviation; zero when not reported
    pub stddev: f64,
}

impl Captured {
    /// A value without a reported error.
    #[must_use]
    pub const fn value(value: f64) -> Self {
        Self { value, stddev: 0.0 }
    }

    /// Reject NaN or infinite results; they have no decimal text to store.
    ///
    /// # Errors
    ///
    /// Returns a non-transient [`CaptureError`] naming the metric.
    pub fn finite(self, metric: &str) -> Result<Self, CaptureError> {
        if self.value.is_finite() && self.stddev.is_finite() {
            Ok(self)
        } else {
            Err(CaptureError::failed(format!(
                "metric {metric} produced a non-finite value ({}, stddev {})",
                self.value, self.stddev
            )))
        }
    }
}

/// Failed capture attempt with diagnostics.
///
/// The diagnostic fields are logged when a metric exhausts its budget; only
/// `message` ends up in the trial's `Failed` condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct CaptureError {
    /// Human-readable failure
    pub message: String,
    /// Do not retry sooner than this; `None` or zero means non-transient
    pub retry_after: Option<Duration>,
    /// Address that was queried
    pub address: Option<String>,
    /// Query that was evaluated
    pub query: Option<String>,
    /// Completion time the query was evaluated at
    pub completion_time: Option<DateTime<Utc>>,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl CaptureError {
    /// A non-transient failure that consumes an attempt.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_after: None,
            address: None,
            query: None,
            completion_time: None,
        }
    }

    /// A transient failure; retry no sooner than `after`.
    #[must_use]
    pub fn transient(message: impl Into<String>, after: Duration) -> Self {
        Self {
            retry_after: Some(after),
            ..Self::failed(message)
        }
    }

    /// Attach the queried address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Attach the evaluated query.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Attach the completion time used for the query.
    #[must_use]
    pub fn with_completion_time(mut self, at: DateTime<Utc>) -> Self {
        self.completion_time = Some(at);
        self
    }

    /// Retry delay if this failure is transient.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after.filter(|d| !d.is_zero())
    }
}

impl From<crate::Error> for CaptureError {
    fn from(err: crate::Error) -> Self {
        Self::failed(err.to_string())
    }
}

/// Executes one metric collection attempt against a resolved target.
pub trait MetricCapture: Send + Sync {
    /// Capture a metric for a trial.
    fn capture(
        &self,
        metric: &Metric,
        trial: &Trial,
        target: &MetricTarget,
    ) -> impl Future<Output = Result<Captured, CaptureError>> + Send;
}
