//! Trial and Experiment objects
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──< Trial (N)
//!                      │
//!                      ├── PatchOperation (N) [ordered, wait flag]
//!                      ├── Value (N)          [one per declared metric]
//!                      └── ConditionLedger    [Stable, Patched, Observed, Failed, Complete]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trial_reconciler::trial::{ConditionKind, ConditionStatus, Trial};
//!
//! let mut trial = Trial::builder("default", "trial-001").experiment("tune").build();
//!
//! let now = chrono::Utc::now();
//! trial.status.conditions.apply(ConditionKind::Stable, ConditionStatus::True, "", "", now);
//! assert!(trial.status.conditions.is(ConditionKind::Stable, ConditionStatus::True));
//! ```

mod condition;
mod experiment_record;
mod trial_record;
mod value;

pub use condition::{ConditionKind, ConditionLedger, ConditionStatus, TrialCondition};
pub use experiment_record::{Experiment, ExperimentBuilder, ExperimentSpec, Metric, MetricKind};
pub use trial_record::{
    PatchOperation, Trial, TrialBuilder, TrialPhase, TrialSpec, TrialStatus,
};
pub use value::{format_decimal, Value, DEFAULT_ATTEMPTS};
