//! Stability Prober
//!
//! Decides whether a pending patch operation has taken observable effect.
//! The reconciler only distinguishes three outcomes: settled, not yet (retry
//! after a delay), and fatal.

mod rollout;

pub use rollout::{RolloutProber, RolloutStatus, TargetReader, DEFAULT_RETRY_AFTER};

use std::future::Future;
use std::time::Duration;

use crate::trial::PatchOperation;

/// Stability probe failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StabilityError {
    /// The target has not settled yet.
    #[error("{message}")]
    NotReady {
        /// What is still pending
        message: String,
        /// Check again no sooner than this
        retry_after: Duration,
    },

    /// Stability cannot be reached.
    #[error("{message}")]
    Failed {
        /// Why the wait failed
        message: String,
    },
}

impl StabilityError {
    /// Retry delay, if this failure is retryable.
    ///
    /// A `NotReady` with a zero delay counts as fatal.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::NotReady { retry_after, .. } if !retry_after.is_zero() => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<crate::Error> for StabilityError {
    fn from(err: crate::Error) -> Self {
        Self::Failed {
            message: err.to_string(),
        }
    }
}

/// Checks whether a patch has settled.
pub trait StabilityProber: Send + Sync {
    /// Probe one patch operation.
    fn probe(
        &self,
        op: &PatchOperation,
    ) -> impl Future<Output = Result<(), StabilityError>> + Send;
}
