//! Object identity and metadata shared by trials, experiments and workloads
//!
//! ## Label Contract
//!
//! Every run and setup workload carries three labels:
//!
//! ```text
//! experiments.dev/experiment = <experiment name>
//! experiments.dev/trial      = <trial name>
//! experiments.dev/trial-role = trialRun | trialSetup
//! ```
//!
//! Run workload discovery excludes `trialSetup` by inspecting the label value
//! on listed objects, never through a user-supplied selector.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Label naming the parent experiment.
pub const LABEL_EXPERIMENT: &str = "experiments.dev/experiment";

/// Label naming the owning trial.
pub const LABEL_TRIAL: &str = "experiments.dev/trial";

/// Label carrying the workload role.
pub const LABEL_TRIAL_ROLE: &str = "experiments.dev/trial-role";

/// Role of auxiliary setup workloads; the only role excluded from discovery.
pub const ROLE_TRIAL_SETUP: &str = "trialSetup";

/// Role of the run workload created by the reconciler.
pub const ROLE_TRIAL_RUN: &str = "trialRun";

/// Namespace-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name within the namespace
    pub name: String,
}

impl ObjectKey {
    /// Create a new key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(Error::Other(format!(
                "invalid object key {s:?}, expected <namespace>/<name>"
            ))),
        }
    }
}

/// Reference from an owned object to its owner (same namespace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Owner kind, e.g. "Trial"
    pub kind: String,
    /// Owner name
    pub name: String,
    /// Whether the owner manages this object's lifecycle
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    /// Controller reference to an owner of the given kind.
    #[must_use]
    pub fn controller(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            controller: true,
        }
    }
}

/// Reference to a patched cluster object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    /// Object kind, e.g. "Deployment"
    pub kind: String,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl TargetRef {
    /// Create a new target reference.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Metadata common to every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Owner references
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// Version token compared at commit time; assigned by the store
    #[serde(default)]
    pub resource_version: u64,
    /// Set once deletion has been requested
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a new object.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Namespace-qualified name.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Get a label value.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Whether deletion has been requested.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// The controlling owner of the given kind, if any.
    #[must_use]
    pub fn controller_owner(&self, kind: &str) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|o| o.controller && o.kind == kind)
    }
}
