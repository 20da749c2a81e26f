//! Metric target resolution
//!
//! The target of a metric is decided by its kind alone through a closed
//! lookup table, see [`target_strategy`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::ObjectKey;
use crate::store::ClusterStore;
use crate::trial::{Metric, MetricKind};
use crate::workload::ExecutionUnit;
use crate::Result;

/// A network-reachable service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Service name
    pub name: String,
    /// Service namespace
    pub namespace: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Cluster-internal address (host name or IP)
    pub address: String,
    /// Named ports
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
}

impl ServiceEndpoint {
    /// Create a service endpoint without labels or ports.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            address: address.into(),
            ports: BTreeMap::new(),
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Namespace-qualified name.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Resolved target of one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricTarget {
    /// The metric needs no target.
    None,
    /// Execution units in the trial's target namespace.
    Units(Vec<ExecutionUnit>),
    /// Service endpoints from any namespace.
    Services(Vec<ServiceEndpoint>),
}

/// How a metric kind is resolved to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStrategy {
    /// No lookup.
    None,
    /// List execution units by selector within the target namespace.
    NamespacedUnits,
    /// List services by selector across all namespaces, so cluster-wide
    /// collectors stay reachable.
    ClusterServices,
}

const STRATEGIES: &[(MetricKind, TargetStrategy)] = &[
    (MetricKind::Local, TargetStrategy::None),
    (MetricKind::Pods, TargetStrategy::NamespacedUnits),
    (MetricKind::Prometheus, TargetStrategy::ClusterServices),
    (MetricKind::JsonPath, TargetStrategy::ClusterServices),
];

/// Look up the target strategy for a metric kind.
#[must_use]
pub fn target_strategy(kind: MetricKind) -> TargetStrategy {
    STRATEGIES
        .iter()
        .find(|(k, _)| *k == kind)
        .map_or(TargetStrategy::None, |(_, s)| *s)
}

/// Resolve a metric's target.
///
/// `namespace` is the trial's target namespace; only unit-scoped metrics use it.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidSelector`] for a malformed metric selector
/// or any store listing failure.
pub async fn resolve_target<S: ClusterStore>(
    store: &S,
    namespace: &str,
    metric: &Metric,
) -> Result<MetricTarget> {
    match target_strategy(metric.kind) {
        TargetStrategy::None => Ok(MetricTarget::None),
        TargetStrategy::NamespacedUnits => store
            .list_units(Some(namespace), &metric.selector)
            .await
            .map(MetricTarget::Units),
        TargetStrategy::ClusterServices => store
            .list_services(None, &metric.selector)
            .await
            .map(MetricTarget::Services),
    }
}
