//! Trial Record - one execution attempt of an experiment's configuration

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::{ConditionKind, ConditionLedger, ConditionStatus};
use super::value::Value;
use crate::meta::{ObjectKey, ObjectMeta, OwnerReference, TargetRef, LABEL_EXPERIMENT};
use crate::workload::WorkloadTemplate;
use crate::{Error, Result};

/// A configuration change applied to the cluster for a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// Patched object
    pub target: TargetRef,
    /// Patch document as applied by the patch logic
    #[serde(default)]
    pub patch: serde_json::Value,
    /// Stabilization has not been confirmed yet; only ever cleared by the
    /// reconciler
    #[serde(default)]
    pub wait: bool,
}

impl PatchOperation {
    /// A patch operation still waiting for stabilization.
    #[must_use]
    pub fn waiting(target: TargetRef) -> Self {
        Self {
            target,
            patch: serde_json::Value::Null,
            wait: true,
        }
    }
}

/// Trial spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialSpec {
    /// Ordered patch operations
    #[serde(default)]
    pub patch_operations: Vec<PatchOperation>,
    /// Collected metric values
    #[serde(default)]
    pub values: Vec<Value>,
    /// Bias added to the observed start time (e.g. a warm-up period)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_offset: Option<Duration>,
    /// Namespace used to resolve unit-scoped metric targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
    /// Run workload template; configured defaults apply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<WorkloadTemplate>,
}

/// Trial status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStatus {
    /// Human-readable summary, recomputed on every commit
    #[serde(default)]
    pub phase: String,
    /// Condition ledger
    #[serde(default)]
    pub conditions: ConditionLedger,
    /// When the trial workload started executing
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When the trial workload finished executing
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Summary of where a trial is in its lifecycle.
///
/// Derived from the condition set and timestamps; never stored as the source
/// of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    /// Nothing has happened yet.
    New,
    /// Waiting for patched objects to settle.
    Stabilizing,
    /// Stable, run workload not yet observed running.
    Stable,
    /// Run workload is executing.
    Running,
    /// Run workload finished; metrics are being collected.
    Observing,
    /// Terminal failure.
    Failed,
    /// Terminal success.
    Completed,
}

impl TrialPhase {
    /// Phase text shown by printing tools.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "Created",
            Self::Stabilizing => "Stabilizing",
            Self::Stable => "Stable",
            Self::Running => "Running",
            Self::Observing => "Capturing Metrics",
            Self::Failed => "Failed",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trial object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: TrialSpec,
    /// Status
    #[serde(default)]
    pub status: TrialStatus,
}

impl Trial {
    /// Create a trial with an empty spec and status.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: TrialSpec::default(),
            status: TrialStatus::default(),
        }
    }

    /// Create a builder for a trial as the experiment expansion would create it.
    #[must_use]
    pub fn builder(namespace: impl Into<String>, name: impl Into<String>) -> TrialBuilder {
        TrialBuilder::new(namespace, name)
    }

    /// Namespace-qualified name.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Whether the trial reached `Complete=True` or `Failed=True`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let ledger = &self.status.conditions;
        ledger.is(ConditionKind::Complete, ConditionStatus::True)
            || ledger.is(ConditionKind::Failed, ConditionStatus::True)
    }

    /// Whether any patch operation still waits for stabilization.
    #[must_use]
    pub fn has_pending_patches(&self) -> bool {
        self.spec.patch_operations.iter().any(|p| p.wait)
    }

    /// Identity of the parent experiment.
    ///
    /// Resolved from the experiment label, falling back to an `Experiment`
    /// owner reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingExperiment`] when neither is present.
    pub fn experiment_key(&self) -> Result<ObjectKey> {
        let name = self
            .metadata
            .label(LABEL_EXPERIMENT)
            .filter(|n| !n.is_empty())
            .or_else(|| {
                self.metadata
                    .owner_references
                    .iter()
                    .find(|o| o.kind == "Experiment")
                    .map(|o| o.name.as_str())
            })
            .ok_or_else(|| Error::MissingExperiment(self.key().to_string()))?;
        Ok(ObjectKey::new(self.metadata.namespace.clone(), name))
    }

    /// Name of the parent experiment, if it can be determined.
    #[must_use]
    pub fn experiment_name(&self) -> Option<String> {
        self.experiment_key().ok().map(|k| k.name)
    }

    /// Namespace for unit-scoped metric targets.
    #[must_use]
    pub fn target_namespace(&self) -> &str {
        self.spec
            .target_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.metadata.namespace)
    }

    /// Find the value slot for a metric, creating it with the default budget.
    pub fn find_or_create_value(&mut self, name: &str) -> &mut Value {
        let index = match self.spec.values.iter().position(|v| v.name == name) {
            Some(index) => index,
            None => {
                self.spec.values.push(Value::new(name));
                self.spec.values.len() - 1
            }
        };
        &mut self.spec.values[index]
    }

    /// Look up a collected value by metric name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.spec.values.iter().find(|v| v.name == name)
    }

    /// Derive the lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> TrialPhase {
        let ledger = &self.status.conditions;
        if ledger.is(ConditionKind::Failed, ConditionStatus::True) {
            TrialPhase::Failed
        } else if ledger.is(ConditionKind::Complete, ConditionStatus::True) {
            TrialPhase::Completed
        } else if self.status.completion_time.is_some() {
            TrialPhase::Observing
        } else if self.status.start_time.is_some() {
            TrialPhase::Running
        } else if ledger.is(ConditionKind::Stable, ConditionStatus::True) {
            TrialPhase::Stable
        } else if self.has_pending_patches() || ledger.get(ConditionKind::Stable).is_some() {
            TrialPhase::Stabilizing
        } else {
            TrialPhase::New
        }
    }

    /// Recompute the status phase text.
    pub fn sync_phase(&mut self) {
        self.status.phase = self.phase().to_string();
    }
}

/// Builder for `Trial`.
///
/// Built trials start with `Stable=Unknown`: stabilization has not been
/// evaluated yet.
#[derive(Debug)]
pub struct TrialBuilder {
    trial: Trial,
    created_at: DateTime<Utc>,
}

impl TrialBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            trial: Trial::new(namespace, name),
            created_at: Utc::now(),
        }
    }

    /// Set the parent experiment (label and owner reference).
    #[must_use]
    pub fn experiment(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.trial
            .metadata
            .labels
            .insert(LABEL_EXPERIMENT.to_string(), name.clone());
        self.trial
            .metadata
            .owner_references
            .push(OwnerReference::controller("Experiment", name));
        self
    }

    /// Add a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.trial.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Append a patch operation.
    #[must_use]
    pub fn patch(mut self, op: PatchOperation) -> Self {
        self.trial.spec.patch_operations.push(op);
        self
    }

    /// Set the start time offset.
    #[must_use]
    pub fn start_time_offset(mut self, offset: Duration) -> Self {
        self.trial.spec.start_time_offset = Some(offset);
        self
    }

    /// Set the namespace for unit-scoped metric targets.
    #[must_use]
    pub fn target_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.trial.spec.target_namespace = Some(namespace.into());
        self
    }

    /// Set the run workload template.
    #[must_use]
    pub fn template(mut self, template: WorkloadTemplate) -> Self {
        self.trial.spec.template = Some(template);
        self
    }

    /// Set the creation time used for the initial conditions.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the `Trial`.
    #[must_use]
    pub fn build(mut self) -> Trial {
        self.trial.status.conditions.apply(
            ConditionKind::Stable,
            ConditionStatus::Unknown,
            "",
            "",
            self.created_at,
        );
        self.trial.sync_phase();
        self.trial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_seeds_stable_unknown() {
        let trial = Trial::builder("default", "t1").experiment("exp").build();
        assert_eq!(
            trial.status.conditions.check(ConditionKind::Stable, ConditionStatus::Unknown),
            Some(true)
        );
        assert_eq!(trial.status.phase, "Stabilizing");
        assert!(!trial.is_finished());
    }

    #[test]
    fn test_experiment_key_from_label_or_owner() {
        let trial = Trial::builder("ns", "t1").experiment("exp").build();
        assert_eq!(trial.experiment_key().unwrap(), ObjectKey::new("ns", "exp"));

        let mut owned = Trial::new("ns", "t2");
        owned
            .metadata
            .owner_references
            .push(OwnerReference::controller("Experiment", "parent"));
        assert_eq!(owned.experiment_key().unwrap().name, "parent");

        let orphan = Trial::new("ns", "t3");
        assert!(matches!(orphan.experiment_key(), Err(Error::MissingExperiment(_))));
    }

    #[test]
    fn test_find_or_create_value_is_lazy_and_stable() {
        let mut trial = Trial::new("ns", "t1");
        trial.find_or_create_value("latency").attempts_remaining = 1;
        trial.find_or_create_value("cost");
        assert_eq!(trial.spec.values.len(), 2);
        assert_eq!(trial.find_or_create_value("latency").attempts_remaining, 1);
        assert_eq!(trial.spec.values.len(), 2);
    }

    #[test]
    fn test_target_namespace_falls_back() {
        let trial = Trial::new("ns", "t1");
        assert_eq!(trial.target_namespace(), "ns");
        let targeted = Trial::builder("ns", "t1").target_namespace("app").build();
        assert_eq!(targeted.target_namespace(), "app");
    }

    #[test]
    fn test_phase_progression() {
        let now = Utc::now();
        let mut trial = Trial::new("ns", "t1");
        assert_eq!(trial.phase(), TrialPhase::New);

        trial.status.conditions.apply(ConditionKind::Stable, ConditionStatus::True, "", "", now);
        assert_eq!(trial.phase(), TrialPhase::Stable);

        trial.status.start_time = Some(now);
        assert_eq!(trial.phase(), TrialPhase::Running);

        trial.status.completion_time = Some(now);
        assert_eq!(trial.phase(), TrialPhase::Observing);

        trial.status.conditions.apply(ConditionKind::Complete, ConditionStatus::True, "", "", now);
        assert_eq!(trial.phase(), TrialPhase::Completed);
        assert!(trial.is_finished());
    }
}
