//! Workload Status Aggregator
//!
//! Unit-level container timestamps are preferred over the workload's own
//! start/completion times. When the workload reports a time the unit view
//! does not corroborate yet, the result is flagged inconsistent and carries
//! nothing else; callers re-poll without mutating anything.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{ContainerState, ExecutionUnit, UnitPhase, Workload};
use crate::trial::TrialStatus;

/// A failure surfaced from a workload or one of its units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Reason
    pub reason: String,
    /// Message
    pub message: String,
}

/// Result of aggregating one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    /// Earliest container start across units
    pub started_at: Option<DateTime<Utc>>,
    /// Latest container finish across units
    pub finished_at: Option<DateTime<Utc>>,
    /// Failures, workload-level first
    pub failures: Vec<FailureReport>,
    /// The unit view lags behind the workload view
    pub inconsistent: bool,
}

impl Aggregate {
    fn inconsistent() -> Self {
        Self {
            inconsistent: true,
            ..Self::default()
        }
    }
}

/// Aggregate a workload and the units it owned at the time of the call.
#[must_use]
pub fn aggregate(workload: &Workload, units: &[ExecutionUnit]) -> Aggregate {
    let mut started_at = None;
    let mut finished_at = None;
    for unit in units {
        for container in &unit.containers {
            match container {
                ContainerState::Running { started_at: s } => {
                    started_at = earliest_time(started_at, Some(*s)).0;
                }
                ContainerState::Terminated {
                    started_at: s,
                    finished_at: f,
                    ..
                } => {
                    started_at = earliest_time(started_at, Some(*s)).0;
                    finished_at = latest_time(finished_at, Some(*f), None).0;
                }
                ContainerState::Waiting { .. } => {}
            }
        }
    }

    if (started_at.is_none() && workload.status.start_time.is_some())
        || (finished_at.is_none() && workload.status.completion_time.is_some())
    {
        return Aggregate::inconsistent();
    }

    let mut failures = Vec::new();
    if let Some(c) = workload.failure() {
        failures.push(FailureReport {
            reason: c.reason.clone(),
            message: c.message.clone(),
        });
    }
    // Catches units the workload controller never reflected (e.g. init container failures)
    failures.extend(
        units
            .iter()
            .filter(|u| u.phase == UnitPhase::Failed)
            .map(|u| FailureReport {
                reason: u.reason.clone(),
                message: u.message.clone(),
            }),
    );

    Aggregate {
        started_at,
        finished_at,
        failures,
        inconsistent: false,
    }
}

/// Earliest-wins: take `candidate` if it precedes `current` or `current` is unset.
#[must_use]
pub fn earliest_time(
    current: Option<DateTime<Utc>>,
    candidate: Option<DateTime<Utc>>,
) -> (Option<DateTime<Utc>>, bool) {
    match (current, candidate) {
        (None, Some(n)) => (Some(n), true),
        (Some(c), Some(n)) if n < c => (Some(n), true),
        _ => (current, false),
    }
}

/// Latest-wins: take `candidate` (shifted by `offset`) if it follows `current`
/// or `current` is unset.
///
/// The comparison uses the unshifted candidate, so re-observing the same
/// start with a positive offset is a no-op.
#[must_use]
pub fn latest_time(
    current: Option<DateTime<Utc>>,
    candidate: Option<DateTime<Utc>>,
    offset: Option<Duration>,
) -> (Option<DateTime<Utc>>, bool) {
    match (current, candidate) {
        (Some(c), Some(n)) if c >= n => (current, false),
        (_, Some(n)) => {
            let shifted = offset
                .and_then(|o| chrono::Duration::from_std(o).ok())
                .and_then(|o| n.checked_add_signed(o))
                .unwrap_or(n);
            (Some(shifted), true)
        }
        (_, None) => (current, false),
    }
}

/// Merge an aggregate's time bracket into a trial status.
///
/// Returns `true` if either timestamp changed.
pub fn merge_times(status: &mut TrialStatus, agg: &Aggregate, offset: Option<Duration>) -> bool {
    let (start, start_changed) = latest_time(status.start_time, agg.started_at, offset);
    let (finish, finish_changed) = earliest_time(status.completion_time, agg.finished_at);
    status.start_time = start;
    status.completion_time = finish;
    start_changed || finish_changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;
    use crate::trial::ConditionStatus;
    use crate::workload::{WorkloadCondition, WorkloadConditionKind, WorkloadSpec, WorkloadStatus};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn workload() -> Workload {
        Workload {
            metadata: ObjectMeta::new("ns", "t1"),
            spec: WorkloadSpec::default(),
            status: WorkloadStatus::default(),
        }
    }

    fn unit(name: &str, containers: Vec<ContainerState>) -> ExecutionUnit {
        let mut u = ExecutionUnit::new(ObjectMeta::new("ns", name));
        u.containers = containers;
        u
    }

    #[test]
    fn test_unit_times_bracket_execution() {
        let mut w = workload();
        w.status.start_time = Some(at(0));
        w.status.completion_time = Some(at(200));
        let units = vec![
            unit(
                "a",
                vec![ContainerState::Terminated {
                    started_at: at(12),
                    finished_at: at(90),
                    exit_code: 0,
                    reason: String::new(),
                }],
            ),
            unit(
                "b",
                vec![ContainerState::Terminated {
                    started_at: at(10),
                    finished_at: at(95),
                    exit_code: 0,
                    reason: String::new(),
                }],
            ),
        ];

        let agg = aggregate(&w, &units);
        assert!(!agg.inconsistent);
        assert_eq!(agg.started_at, Some(at(10)));
        assert_eq!(agg.finished_at, Some(at(95)));
        assert!(agg.failures.is_empty());
    }

    #[test]
    fn test_running_units_have_no_finish() {
        let mut w = workload();
        w.status.start_time = Some(at(0));
        let units = vec![unit("a", vec![ContainerState::Running { started_at: at(3) }])];

        let agg = aggregate(&w, &units);
        assert_eq!(agg.started_at, Some(at(3)));
        assert_eq!(agg.finished_at, None);
    }

    #[test]
    fn test_uncorroborated_workload_time_is_inconsistent() {
        let mut w = workload();
        w.status.start_time = Some(at(0));
        let units = vec![unit("a", vec![ContainerState::Waiting { reason: "Pulling".into() }])];
        let agg = aggregate(&w, &units);
        assert!(agg.inconsistent);
        assert_eq!(agg.started_at, None);

        let mut done = workload();
        done.status.start_time = Some(at(0));
        done.status.completion_time = Some(at(50));
        done.status.conditions.push(WorkloadCondition {
            kind: WorkloadConditionKind::Failed,
            status: ConditionStatus::True,
            reason: "BackoffLimitExceeded".into(),
            message: String::new(),
        });
        let units = vec![unit("a", vec![ContainerState::Running { started_at: at(1) }])];
        let agg = aggregate(&done, &units);
        assert!(agg.inconsistent);
        assert!(agg.failures.is_empty());
    }

    #[test]
    fn test_failures_do_not_short_circuit_times() {
        let mut w = workload();
        w.status.start_time = Some(at(0));
        w.status.completion_time = Some(at(30));
        w.status.conditions.push(WorkloadCondition {
            kind: WorkloadConditionKind::Failed,
            status: ConditionStatus::True,
            reason: "BackoffLimitExceeded".into(),
            message: "Job has reached the specified backoff limit".into(),
        });
        let mut failed = unit(
            "a",
            vec![ContainerState::Terminated {
                started_at: at(5),
                finished_at: at(20),
                exit_code: 1,
                reason: "Error".into(),
            }],
        );
        failed.phase = UnitPhase::Failed;
        failed.reason = "Error".into();

        let agg = aggregate(&w, &[failed]);
        assert_eq!(agg.started_at, Some(at(5)));
        assert_eq!(agg.finished_at, Some(at(20)));
        assert_eq!(agg.failures.len(), 2);
        assert_eq!(agg.failures[0].reason, "BackoffLimitExceeded");
        assert_eq!(agg.failures[1].reason, "Error");
    }

    #[test]
    fn test_no_units_and_no_workload_times() {
        let agg = aggregate(&workload(), &[]);
        assert_eq!(agg, Aggregate::default());
    }

    #[test]
    fn test_merge_brackets_monotonically() {
        let mut status = TrialStatus::default();
        let first = Aggregate {
            started_at: Some(at(10)),
            finished_at: Some(at(100)),
            ..Aggregate::default()
        };
        let second = Aggregate {
            started_at: Some(at(5)),
            finished_at: Some(at(90)),
            ..Aggregate::default()
        };

        assert!(merge_times(&mut status, &first, None));
        assert!(merge_times(&mut status, &second, None));
        assert_eq!(status.start_time, Some(at(10)));
        assert_eq!(status.completion_time, Some(at(90)));
        assert!(!merge_times(&mut status, &second, None));
    }

    #[test]
    fn test_offset_applies_only_to_start() {
        let mut status = TrialStatus::default();
        let agg = Aggregate {
            started_at: Some(at(10)),
            finished_at: Some(at(100)),
            ..Aggregate::default()
        };
        let offset = Some(Duration::from_secs(30));

        assert!(merge_times(&mut status, &agg, offset));
        assert_eq!(status.start_time, Some(at(40)));
        assert_eq!(status.completion_time, Some(at(100)));

        // Re-observing the same data must not shift the start again
        assert!(!merge_times(&mut status, &agg, offset));
        assert_eq!(status.start_time, Some(at(40)));
    }
}
