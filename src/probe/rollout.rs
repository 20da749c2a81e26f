//! Rollout-based stability probing
//!
//! Patch targets that roll out replicas (deployments, stateful sets) are
//! stable once the controller has observed the latest generation and every
//! replica is updated and available. Targets without rollout status are
//! considered stable as soon as the patch is applied.
//!
//! The reader is deliberately separate from [`crate::store::ClusterStore`]:
//! the probe may only hold `get` permission on patched objects, so it must
//! not go through a reader that needs list/watch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{StabilityError, StabilityProber};
use crate::meta::TargetRef;
use crate::trial::PatchOperation;
use crate::Result;

/// Delay before re-checking a rollout that is still in progress.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Observed rollout state of a patched object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutStatus {
    /// Desired generation
    pub generation: u64,
    /// Generation last acted on by the object's controller
    pub observed_generation: u64,
    /// Desired replicas
    pub replicas: u32,
    /// Replicas running the latest template
    pub updated_replicas: u32,
    /// Replicas available to serve
    pub available_replicas: u32,
    /// Replicas of any template still present
    pub total_replicas: u32,
    /// The rollout gave up
    pub progress_deadline_exceeded: bool,
}

impl RolloutStatus {
    /// Reason the rollout is still in progress, `None` once complete.
    #[must_use]
    pub fn pending(&self) -> Option<String> {
        if self.observed_generation < self.generation {
            return Some("waiting for rollout to be observed".to_string());
        }
        if self.updated_replicas < self.replicas {
            return Some(format!(
                "{} of {} replicas have been updated",
                self.updated_replicas, self.replicas
            ));
        }
        if self.total_replicas > self.updated_replicas {
            return Some(format!(
                "{} old replicas are pending termination",
                self.total_replicas - self.updated_replicas
            ));
        }
        if self.available_replicas < self.updated_replicas {
            return Some(format!(
                "{} of {} updated replicas are available",
                self.available_replicas, self.updated_replicas
            ));
        }
        None
    }
}

/// Non-caching, get-only reader for patch targets.
pub trait TargetReader: Send + Sync {
    /// Read the rollout status of a target; `None` if it has none.
    fn get_rollout(
        &self,
        target: &TargetRef,
    ) -> impl Future<Output = Result<Option<RolloutStatus>>> + Send;
}

/// Stability prober backed by rollout status.
pub struct RolloutProber<R> {
    reader: Arc<R>,
    retry_after: Duration,
}

impl<R: TargetReader> RolloutProber<R> {
    /// Create a prober re-checking pending rollouts every [`DEFAULT_RETRY_AFTER`].
    #[must_use]
    pub const fn new(reader: Arc<R>) -> Self {
        Self {
            reader,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Override the re-check delay.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl<R: TargetReader> StabilityProber for RolloutProber<R> {
    async fn probe(&self, op: &PatchOperation) -> std::result::Result<(), StabilityError> {
        let Some(status) = self.reader.get_rollout(&op.target).await? else {
            return Ok(());
        };

        if status.progress_deadline_exceeded {
            return Err(StabilityError::Failed {
                message: format!("{} exceeded its progress deadline", op.target),
            });
        }

        match status.pending() {
            Some(message) => {
                debug!(patch_target = %op.target, %message, "Rollout in progress");
                Err(StabilityError::NotReady {
                    message: format!("{}: {message}", op.target),
                    retry_after: self.retry_after,
                })
            }
            None => Ok(()),
        }
    }
}
