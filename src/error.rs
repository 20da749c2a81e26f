//! Error types for the trial reconciler
//!
//! Only infrastructure failures travel through [`Error`]. Outcomes reported by
//! the stability prober and the metric capture client have their own types
//! (`StabilityError`, `CaptureError`) because they drive trial conditions
//! instead of being propagated to the controller runtime.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trial reconciler error types
#[derive(Error, Debug)]
pub enum Error {
    /// Object does not exist in the store
    #[error("{kind} {key} not found")]
    NotFound {
        /// Object kind (e.g. "Trial")
        kind: &'static str,
        /// Namespace-qualified name
        key: String,
    },

    /// Optimistic concurrency check failed at commit time
    #[error("conflict updating {kind} {key}: the object has been modified\nRe-read the object and recompute the change")]
    Conflict {
        /// Object kind
        kind: &'static str,
        /// Namespace-qualified name
        key: String,
    },

    /// Create was called for an identity that already exists
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Object kind
        kind: &'static str,
        /// Namespace-qualified name
        key: String,
    },

    /// A label selector could not be constructed
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    /// The parent experiment of a trial could not be determined
    #[error("cannot determine experiment for trial {0}")]
    MissingExperiment(String),

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Logging subscriber could not be installed
    #[error("logging initialization failed: {0}")]
    Logging(String),

    /// Failure reported by an external collaborator implementation
    #[error("client error: {0}")]
    Client(#[from] anyhow::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns `true` for optimistic concurrency conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` when the object was not found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
