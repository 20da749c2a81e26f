//! Run workloads and their execution units
//!
//! A run workload performs the trial's actual work; the orchestrator runs it
//! as one or more execution units (pods). The reconciler only creates the
//! workload and then observes it; the aggregator turns the two views (the
//! workload's own status and the unit states) into a time bracket and
//! failure reports.

mod aggregate;
mod builder;

pub use aggregate::{aggregate, earliest_time, latest_time, merge_times, Aggregate, FailureReport};
pub use builder::{new_run_workload, PullPolicy, WorkloadDefaults, WorkloadTemplate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, LABEL_TRIAL_ROLE, ROLE_TRIAL_SETUP};
use crate::selector::LabelSelector;
use crate::trial::ConditionStatus;

/// Workload-level condition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadConditionKind {
    /// All units finished successfully.
    Complete,
    /// The workload gave up (e.g. backoff limit reached).
    Failed,
}

/// Workload-level condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadCondition {
    /// Kind
    pub kind: WorkloadConditionKind,
    /// Status
    pub status: ConditionStatus,
    /// Reason
    #[serde(default)]
    pub reason: String,
    /// Message
    #[serde(default)]
    pub message: String,
}

/// Workload status as reported by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    /// When the orchestrator started the workload
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When the orchestrator considered the workload complete
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<WorkloadCondition>,
}

/// Workload spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Selects the workload's execution units
    #[serde(default)]
    pub selector: LabelSelector,
    /// What the units run
    #[serde(default)]
    pub template: WorkloadTemplate,
}

/// A run or setup workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: WorkloadSpec,
    /// Status
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    /// Whether this is an auxiliary setup workload.
    #[must_use]
    pub fn is_setup(&self) -> bool {
        self.metadata.label(LABEL_TRIAL_ROLE) == Some(ROLE_TRIAL_SETUP)
    }

    /// The workload's `Failed=True` condition, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&WorkloadCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.kind == WorkloadConditionKind::Failed && c.status == ConditionStatus::True)
    }
}

/// Execution unit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnitPhase {
    /// Accepted, not yet running.
    #[default]
    Pending,
    /// At least one container is running.
    Running,
    /// All containers exited successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// State could not be obtained.
    Unknown,
}

/// State of one container inside an execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Not started yet.
    Waiting {
        /// Why the container is waiting
        #[serde(default)]
        reason: String,
    },
    /// Running since `started_at`.
    Running {
        /// Start time
        started_at: DateTime<Utc>,
    },
    /// Exited.
    Terminated {
        /// Start time
        started_at: DateTime<Utc>,
        /// Exit time
        finished_at: DateTime<Utc>,
        /// Exit code
        #[serde(default)]
        exit_code: i32,
        /// Termination reason
        #[serde(default)]
        reason: String,
    },
}

/// An execution unit (pod) belonging to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    /// Metadata
    pub metadata: ObjectMeta,
    /// Phase
    #[serde(default)]
    pub phase: UnitPhase,
    /// Reason for the current phase
    #[serde(default)]
    pub reason: String,
    /// Message for the current phase
    #[serde(default)]
    pub message: String,
    /// Container states
    #[serde(default)]
    pub containers: Vec<ContainerState>,
}

impl ExecutionUnit {
    /// Create a pending unit with no containers.
    #[must_use]
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            phase: UnitPhase::Pending,
            reason: String::new(),
            message: String::new(),
            containers: Vec::new(),
        }
    }
}
