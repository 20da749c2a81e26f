//! Value - per-metric result and capture budget

use serde::{Deserialize, Serialize};

/// Capture attempts granted to a metric on first reference.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Collected result of one metric for one trial.
///
/// `attempts_remaining` never increases. It is decremented on non-retryable
/// capture failures and forced to zero on success, after which the slot is
/// closed for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    /// Metric name
    pub name: String,
    /// Exact decimal text of the value; empty until captured
    #[serde(default)]
    pub value: String,
    /// Exact decimal text of the measurement error, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Remaining capture attempts
    pub attempts_remaining: u32,
}

impl Value {
    /// Create an uncollected value with the default budget.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            error: None,
            attempts_remaining: DEFAULT_ATTEMPTS,
        }
    }

    /// Whether no further capture will be attempted.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.attempts_remaining == 0
    }

    /// Store a captured value and close the slot.
    ///
    /// A zero `stddev` is treated as "not reported".
    pub fn record_success(&mut self, value: f64, stddev: f64) {
        self.value = format_decimal(value);
        if stddev != 0.0 {
            self.error = Some(format_decimal(stddev));
        }
        self.attempts_remaining = 0;
    }

    /// Consume one attempt. Returns `true` if the budget is now exhausted.
    pub fn record_failure(&mut self) -> bool {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining == 0
    }
}

/// Shortest decimal text that round-trips to the same `f64`.
///
/// Only meaningful for finite values; captures are checked before they are
/// recorded.
#[must_use]
pub fn format_decimal(v: f64) -> String {
    format!("{v}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_value_has_default_budget() {
        let v = Value::new("latency");
        assert_eq!(v.attempts_remaining, 3);
        assert!(!v.is_resolved());
        assert!(v.value.is_empty());
    }

    #[test]
    fn test_success_closes_slot() {
        let mut v = Value::new("latency");
        v.record_failure();
        v.record_success(12.3, 0.0);
        assert_eq!(v.value, "12.3");
        assert_eq!(v.error, None);
        assert_eq!(v.attempts_remaining, 0);

        let mut w = Value::new("throughput");
        w.record_success(1500.0, 0.25);
        assert_eq!(w.value, "1500");
        assert_eq!(w.error.as_deref(), Some("0.25"));
    }

    #[test]
    fn test_failure_exhausts_after_three() {
        let mut v = Value::new("latency");
        assert!(!v.record_failure());
        assert!(!v.record_failure());
        assert!(v.record_failure());
        assert!(v.record_failure());
        assert_eq!(v.attempts_remaining, 0);
    }

    #[test]
    fn test_format_decimal_avoids_exponent() {
        assert_eq!(format_decimal(1e21), "1000000000000000000000");
        assert_eq!(format_decimal(0.1), "0.1");
        assert_eq!(format_decimal(-3.5), "-3.5");
    }
}
