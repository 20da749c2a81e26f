//! Run workload construction
//!
//! The image and pull policy defaults are process configuration resolved once
//! at startup and passed in by reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Workload, WorkloadSpec, WorkloadStatus};
use crate::meta::{
    ObjectMeta, OwnerReference, LABEL_EXPERIMENT, LABEL_TRIAL, LABEL_TRIAL_ROLE, ROLE_TRIAL_RUN,
};
use crate::selector::LabelSelector;
use crate::trial::Trial;

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PullPolicy {
    /// Always pull.
    Always,
    /// Pull only when the image is missing.
    #[default]
    IfNotPresent,
    /// Never pull.
    Never,
}

/// What a run workload executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadTemplate {
    /// Container image
    #[serde(default)]
    pub image: String,
    /// Pull policy
    #[serde(default)]
    pub image_pull_policy: PullPolicy,
    /// Command and arguments
    #[serde(default)]
    pub command: Vec<String>,
    /// Labels added to every execution unit
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Retries before the workload is marked failed
    #[serde(default)]
    pub backoff_limit: u32,
}

/// Process-wide defaults for run workloads without a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadDefaults {
    /// Default image
    pub image: String,
    /// Pull policy matching the default image
    pub image_pull_policy: PullPolicy,
}

impl Default for WorkloadDefaults {
    fn default() -> Self {
        Self {
            image: "trial-run:latest".to_string(),
            // ":latest" would otherwise imply Always, and the default image is never published
            image_pull_policy: PullPolicy::IfNotPresent,
        }
    }
}

/// Build the run workload for a trial.
///
/// The workload shares the trial's name and namespace, is owner-linked to it,
/// and selects its units by the trial label rather than anything from the
/// template.
#[must_use]
pub fn new_run_workload(trial: &Trial, defaults: &WorkloadDefaults) -> Workload {
    let mut template = trial.spec.template.clone().unwrap_or_default();
    if template.image.is_empty() {
        template.image.clone_from(&defaults.image);
        template.image_pull_policy = defaults.image_pull_policy;
    }

    let mut labels = BTreeMap::new();
    if let Some(experiment) = trial.experiment_name() {
        labels.insert(LABEL_EXPERIMENT.to_string(), experiment);
    }
    labels.insert(LABEL_TRIAL.to_string(), trial.metadata.name.clone());
    labels.insert(LABEL_TRIAL_ROLE.to_string(), ROLE_TRIAL_RUN.to_string());

    template.labels.extend(labels.clone());

    let mut metadata = ObjectMeta::new(trial.metadata.namespace.clone(), trial.metadata.name.clone());
    metadata.labels = labels;
    metadata
        .owner_references
        .push(OwnerReference::controller("Trial", trial.metadata.name.clone()));

    Workload {
        metadata,
        spec: WorkloadSpec {
            selector: LabelSelector::default().with_label(LABEL_TRIAL, trial.metadata.name.clone()),
            template,
        },
        status: WorkloadStatus::default(),
    }
}
