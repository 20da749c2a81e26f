//! Local metric capture
//!
//! `Local` metrics are computed from the trial itself. The query is either
//! `duration` (seconds between start and completion, the default for an
//! empty query) or a numeric literal.

use super::{CaptureError, Captured, MetricCapture, MetricTarget};
use crate::trial::{Metric, MetricKind, Trial};

/// Capture client for `Local` metrics.
///
/// Other kinds need a network client and are rejected with a non-transient
/// error.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCapture;

impl LocalCapture {
    fn evaluate(metric: &Metric, trial: &Trial) -> Result<Captured, CaptureError> {
        let query = metric.query.trim();
        if query.is_empty() || query == "duration" {
            let (Some(start), Some(end)) = (trial.status.start_time, trial.status.completion_time)
            else {
                return Err(CaptureError::failed(format!(
                    "metric {} requires both start and completion time",
                    metric.name
                ))
                .with_query(query));
            };
            #[allow(clippy::cast_precision_loss)]
            let secs = (end - start).num_milliseconds() as f64 / 1000.0;
            return Ok(Captured::value(secs));
        }

        query.parse::<f64>().map(Captured::value).map_err(|_| {
            CaptureError::failed(format!("unsupported local query for metric {}", metric.name))
                .with_query(query)
        })
    }
}

impl MetricCapture for LocalCapture {
    async fn capture(
        &self,
        metric: &Metric,
        trial: &Trial,
        _target: &MetricTarget,
    ) -> Result<Captured, CaptureError> {
        if metric.kind != MetricKind::Local {
            return Err(CaptureError::failed(format!(
                "no capture client configured for {:?} metric {}",
                metric.kind, metric.name
            )));
        }
        Self::evaluate(metric, trial)
    }
}
