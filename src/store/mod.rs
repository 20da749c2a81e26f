//! Cluster object store
//!
//! The reconciler reaches the orchestration platform only through
//! [`ClusterStore`]: trial/experiment reads and writes, run workload creation
//! and listing, execution unit and service listing for metric targets, and a
//! change notification feed that drives the controller runtime.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trial_reconciler::store::{ClusterStore, MemoryClusterStore};
//! use trial_reconciler::trial::Trial;
//!
//! # async fn example() -> trial_reconciler::Result<()> {
//! let store = Arc::new(MemoryClusterStore::new());
//! store.create_trial(Trial::builder("default", "t1").experiment("exp").build())?;
//!
//! let mut trial = store.get_trial(&"default/t1".parse()?).await?;
//! trial.spec.target_namespace = Some("app".to_string());
//! store.update_trial(&trial).await?;
//!
//! // The version read first is now stale
//! assert!(store.update_trial(&trial).await.unwrap_err().is_conflict());
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryClusterStore;

use std::future::Future;

use tokio::sync::broadcast;

use crate::meta::ObjectKey;
use crate::metric::ServiceEndpoint;
use crate::selector::LabelSelector;
use crate::trial::{Experiment, Trial};
use crate::workload::{ExecutionUnit, Workload};
use crate::Result;

/// Change notification emitted by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A trial was created or updated.
    Trial(ObjectKey),
    /// A workload was created or its status changed.
    Workload(Box<Workload>),
}

/// Object store for trials, experiments and run workloads.
///
/// Updates carry the `resource_version` read earlier; a mismatch must fail
/// with [`crate::Error::Conflict`] so the caller can discard its decision.
pub trait ClusterStore: Send + Sync {
    /// Get a trial by identity.
    fn get_trial(&self, key: &ObjectKey) -> impl Future<Output = Result<Trial>> + Send;

    /// List every trial (startup resync).
    fn list_trials(&self) -> impl Future<Output = Result<Vec<Trial>>> + Send;

    /// Replace a trial (spec and status).
    ///
    /// Returns the stored trial with its new version.
    fn update_trial(&self, trial: &Trial) -> impl Future<Output = Result<Trial>> + Send;

    /// Replace only the status of a trial.
    fn update_trial_status(&self, trial: &Trial) -> impl Future<Output = Result<Trial>> + Send;

    /// Get an experiment by identity.
    fn get_experiment(&self, key: &ObjectKey) -> impl Future<Output = Result<Experiment>> + Send;

    /// List workloads in a namespace matching a selector.
    fn list_workloads(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> impl Future<Output = Result<Vec<Workload>>> + Send;

    /// Create a workload.
    fn create_workload(&self, workload: Workload) -> impl Future<Output = Result<Workload>> + Send;

    /// List execution units matching a selector, optionally within one namespace.
    fn list_units(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> impl Future<Output = Result<Vec<ExecutionUnit>>> + Send;

    /// List service endpoints matching a selector, optionally within one namespace.
    fn list_services(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> impl Future<Output = Result<Vec<ServiceEndpoint>>> + Send;

    /// Subscribe to change notifications.
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;
}
