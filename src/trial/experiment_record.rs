//! Experiment Record - parent definition declaring the metrics of its trials

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;
use crate::selector::LabelSelector;

/// How a metric is collected, which also decides what it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Computed from the trial itself; no target.
    Local,
    /// Scoped to execution units in the trial's target namespace.
    Pods,
    /// Queried from a Prometheus service anywhere in the cluster.
    Prometheus,
    /// Read from a JSON endpoint exposed by a service.
    JsonPath,
}

/// A metric declared by an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name, unique within the experiment
    pub name: String,
    /// Collection kind
    pub kind: MetricKind,
    /// Kind-specific query text
    #[serde(default)]
    pub query: String,
    /// Error query text (standard deviation), if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_query: Option<String>,
    /// Target selector for unit- and service-scoped kinds
    #[serde(default)]
    pub selector: LabelSelector,
    /// Port name or number for service-scoped kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Whether lower values are better
    #[serde(default)]
    pub minimize: bool,
}

impl Metric {
    /// Create a metric with an empty query and selector.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            query: String::new(),
            error_query: None,
            selector: LabelSelector::default(),
            port: None,
            minimize: false,
        }
    }

    /// Set the query text.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Set the target selector.
    #[must_use]
    pub fn selector(mut self, selector: LabelSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the service port.
    #[must_use]
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }
}

/// Experiment spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Metrics collected for every trial
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

/// Experiment object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: ExperimentSpec,
}

impl Experiment {
    /// Create an experiment with no metrics.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ExperimentSpec::default(),
        }
    }

    /// Create a builder for constructing an experiment with metrics.
    #[must_use]
    pub fn builder(namespace: impl Into<String>, name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(namespace, name)
    }

    /// Declared metrics.
    #[must_use]
    pub fn metrics(&self) -> &[Metric] {
        &self.spec.metrics
    }
}

/// Builder for `Experiment`.
#[derive(Debug)]
pub struct ExperimentBuilder {
    experiment: Experiment,
}

impl ExperimentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment: Experiment::new(namespace, name),
        }
    }

    /// Declare a metric.
    #[must_use]
    pub fn metric(mut self, metric: Metric) -> Self {
        self.experiment.spec.metrics.push(metric);
        self
    }

    /// Build the `Experiment`.
    #[must_use]
    pub fn build(self) -> Experiment {
        self.experiment
    }
}
