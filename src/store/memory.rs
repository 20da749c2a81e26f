//! In-memory cluster store implementation using `DashMap`.
//!
//! Every write bumps a store-wide version counter, giving each object a fresh
//! `resource_version`; updates carrying an older version are rejected with
//! [`Error::Conflict`]. Trial and workload writes are broadcast as
//! [`ChangeEvent`]s. Execution unit changes are not broadcast: observers
//! watch workloads, not units, and must poll units when the two disagree.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use super::{ChangeEvent, ClusterStore};
use crate::meta::{ObjectKey, TargetRef};
use crate::metric::ServiceEndpoint;
use crate::probe::{RolloutStatus, TargetReader};
use crate::selector::LabelSelector;
use crate::trial::{Experiment, Trial};
use crate::workload::{ExecutionUnit, Workload, WorkloadStatus};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 1024;

/// In-memory cluster store.
///
/// Thread-safe; backs tests, demos and single-process deployments.
pub struct MemoryClusterStore {
    trials: DashMap<ObjectKey, Trial>,
    experiments: DashMap<ObjectKey, Experiment>,
    workloads: DashMap<ObjectKey, Workload>,
    units: DashMap<ObjectKey, ExecutionUnit>,
    services: DashMap<ObjectKey, ServiceEndpoint>,
    rollouts: DashMap<TargetRef, RolloutStatus>,
    version: AtomicU64,
    trial_commits: AtomicUsize,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryClusterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            trials: DashMap::new(),
            experiments: DashMap::new(),
            workloads: DashMap::new(),
            units: DashMap::new(),
            services: DashMap::new(),
            rollouts: DashMap::new(),
            version: AtomicU64::new(0),
            trial_commits: AtomicUsize::new(0),
            events,
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Insert a new trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the identity is taken.
    pub fn create_trial(&self, mut trial: Trial) -> Result<Trial> {
        let key = trial.key();
        if self.trials.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "Trial",
                key: key.to_string(),
            });
        }
        trial.metadata.resource_version = self.next_version();
        self.trials.insert(key.clone(), trial.clone());
        self.notify(ChangeEvent::Trial(key));
        Ok(trial)
    }

    /// Request deletion of a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the trial does not exist.
    pub fn mark_trial_deleted(&self, key: &ObjectKey, at: DateTime<Utc>) -> Result<()> {
        let mut entry = self.trials.get_mut(key).ok_or_else(|| not_found("Trial", key))?;
        entry.metadata.deletion_timestamp = Some(at);
        entry.metadata.resource_version = self.next_version();
        drop(entry);
        self.notify(ChangeEvent::Trial(key.clone()));
        Ok(())
    }

    /// Insert or replace an experiment.
    pub fn put_experiment(&self, mut experiment: Experiment) {
        experiment.metadata.resource_version = self.next_version();
        self.experiments
            .insert(experiment.metadata.key(), experiment);
    }

    /// Insert or replace a workload without the create semantics (e.g. setup
    /// workloads created by other collaborators).
    pub fn put_workload(&self, mut workload: Workload) {
        workload.metadata.resource_version = self.next_version();
        self.workloads
            .insert(workload.metadata.key(), workload.clone());
        self.notify(ChangeEvent::Workload(Box::new(workload)));
    }

    /// Mutate a workload's status as the orchestrator would.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the workload does not exist.
    pub fn update_workload_status(
        &self,
        key: &ObjectKey,
        f: impl FnOnce(&mut WorkloadStatus),
    ) -> Result<()> {
        let mut entry = self
            .workloads
            .get_mut(key)
            .ok_or_else(|| not_found("Workload", key))?;
        f(&mut entry.status);
        entry.metadata.resource_version = self.next_version();
        let snapshot = entry.value().clone();
        drop(entry);
        self.notify(ChangeEvent::Workload(Box::new(snapshot)));
        Ok(())
    }

    /// Insert or replace an execution unit.
    pub fn put_unit(&self, mut unit: ExecutionUnit) {
        unit.metadata.resource_version = self.next_version();
        self.units.insert(unit.metadata.key(), unit);
    }

    /// Insert or replace a service endpoint.
    pub fn put_service(&self, service: ServiceEndpoint) {
        self.services.insert(service.key(), service);
    }

    /// Set the rollout status of a patch target.
    pub fn set_rollout(&self, target: TargetRef, status: RolloutStatus) {
        self.rollouts.insert(target, status);
    }

    /// Get a workload by identity.
    #[must_use]
    pub fn workload(&self, key: &ObjectKey) -> Option<Workload> {
        self.workloads.get(key).map(|w| w.value().clone())
    }

    /// Number of workloads in the store.
    #[must_use]
    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    /// Number of trial updates that changed the stored trial.
    #[must_use]
    pub fn trial_commits(&self) -> usize {
        self.trial_commits.load(Ordering::SeqCst)
    }

    fn replace_trial(&self, trial: &Trial, status_only: bool) -> Result<Trial> {
        let key = trial.key();
        let mut entry = self.trials.get_mut(&key).ok_or_else(|| not_found("Trial", &key))?;
        if entry.metadata.resource_version != trial.metadata.resource_version {
            trace!(trial = %key, stored = entry.metadata.resource_version, "Rejecting stale update");
            return Err(Error::Conflict {
                kind: "Trial",
                key: key.to_string(),
            });
        }

        let unchanged = entry.status == trial.status
            && (status_only
                || (entry.spec == trial.spec && entry.metadata.labels == trial.metadata.labels));
        if unchanged {
            // No-op writes keep the version and are not broadcast
            return Ok(entry.value().clone());
        }

        if status_only {
            entry.status = trial.status.clone();
        } else {
            entry.spec = trial.spec.clone();
            entry.status = trial.status.clone();
            entry.metadata.labels = trial.metadata.labels.clone();
        }
        entry.metadata.resource_version = self.next_version();
        let stored = entry.value().clone();
        drop(entry);

        self.trial_commits.fetch_add(1, Ordering::SeqCst);
        self.notify(ChangeEvent::Trial(key));
        Ok(stored)
    }
}

impl Default for MemoryClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &'static str, key: &ObjectKey) -> Error {
    Error::NotFound {
        kind,
        key: key.to_string(),
    }
}

fn in_namespace(namespace: Option<&str>, key: &ObjectKey) -> bool {
    namespace.map_or(true, |ns| ns == key.namespace)
}

impl ClusterStore for MemoryClusterStore {
    async fn get_trial(&self, key: &ObjectKey) -> Result<Trial> {
        self.trials
            .get(key)
            .map(|t| t.value().clone())
            .ok_or_else(|| not_found("Trial", key))
    }

    async fn list_trials(&self) -> Result<Vec<Trial>> {
        Ok(self.trials.iter().map(|t| t.value().clone()).collect())
    }

    async fn update_trial(&self, trial: &Trial) -> Result<Trial> {
        self.replace_trial(trial, false)
    }

    async fn update_trial_status(&self, trial: &Trial) -> Result<Trial> {
        self.replace_trial(trial, true)
    }

    async fn get_experiment(&self, key: &ObjectKey) -> Result<Experiment> {
        self.experiments
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| not_found("Experiment", key))
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Workload>> {
        selector.validate()?;
        let mut found: Vec<Workload> = self
            .workloads
            .iter()
            .filter(|w| w.key().namespace == namespace && selector.matches(&w.metadata.labels))
            .map(|w| w.value().clone())
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    async fn create_workload(&self, mut workload: Workload) -> Result<Workload> {
        let key = workload.metadata.key();
        if self.workloads.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "Workload",
                key: key.to_string(),
            });
        }
        workload.metadata.resource_version = self.next_version();
        self.workloads.insert(key, workload.clone());
        self.notify(ChangeEvent::Workload(Box::new(workload.clone())));
        Ok(workload)
    }

    async fn list_units(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ExecutionUnit>> {
        selector.validate()?;
        let mut found: Vec<ExecutionUnit> = self
            .units
            .iter()
            .filter(|u| in_namespace(namespace, u.key()) && selector.matches(&u.metadata.labels))
            .map(|u| u.value().clone())
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    async fn list_services(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ServiceEndpoint>> {
        selector.validate()?;
        let mut found: Vec<ServiceEndpoint> = self
            .services
            .iter()
            .filter(|s| in_namespace(namespace, s.key()) && selector.matches(&s.labels))
            .map(|s| s.value().clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

impl TargetReader for MemoryClusterStore {
    async fn get_rollout(&self, target: &TargetRef) -> Result<Option<RolloutStatus>> {
        Ok(self.rollouts.get(target).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ObjectMeta, LABEL_TRIAL};

    fn trial() -> Trial {
        Trial::builder("ns", "t1").experiment("exp").build()
    }

    #[tokio::test]
    async fn test_create_and_get_trial() {
        let store = MemoryClusterStore::new();
        let created = store.create_trial(trial()).unwrap();
        assert!(created.metadata.resource_version > 0);

        let fetched = store.get_trial(&created.key()).await.unwrap();
        assert_eq!(fetched, created);
        assert!(matches!(
            store.create_trial(trial()),
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_missing_trial_is_not_found() {
        let store = MemoryClusterStore::new();
        let err = store.get_trial(&ObjectKey::new("ns", "nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryClusterStore::new();
        let original = store.create_trial(trial()).unwrap();

        let mut first = original.clone();
        first.spec.target_namespace = Some("a".to_string());
        let stored = store.update_trial(&first).await.unwrap();
        assert!(stored.metadata.resource_version > original.metadata.resource_version);

        let mut second = original;
        second.spec.target_namespace = Some("b".to_string());
        let err = store.update_trial(&second).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.trial_commits(), 1);

        let current = store.get_trial(&stored.key()).await.unwrap();
        assert_eq!(current.spec.target_namespace.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_status_update_leaves_spec() {
        let store = MemoryClusterStore::new();
        let original = store.create_trial(trial()).unwrap();

        let mut changed = original.clone();
        changed.spec.target_namespace = Some("ignored".to_string());
        changed.status.phase = "Running".to_string();
        store.update_trial_status(&changed).await.unwrap();

        let current = store.get_trial(&original.key()).await.unwrap();
        assert_eq!(current.status.phase, "Running");
        assert_eq!(current.spec.target_namespace, None);
    }

    #[tokio::test]
    async fn test_noop_update_keeps_version() {
        let store = MemoryClusterStore::new();
        let original = store.create_trial(trial()).unwrap();
        let mut events = store.watch();

        let stored = store.update_trial_status(&original).await.unwrap();
        assert_eq!(stored.metadata.resource_version, original.metadata.resource_version);
        assert_eq!(store.trial_commits(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_reports_trial_and_workload_changes() {
        let store = MemoryClusterStore::new();
        let mut events = store.watch();

        let t = store.create_trial(trial()).unwrap();
        assert_eq!(events.recv().await.unwrap(), ChangeEvent::Trial(t.key()));

        let w = crate::workload::new_run_workload(&t, &crate::workload::WorkloadDefaults::default());
        store.create_workload(w).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), ChangeEvent::Workload(_)));
    }

    #[tokio::test]
    async fn test_list_units_filters_by_namespace_and_selector() {
        let store = MemoryClusterStore::new();
        for (ns, name, trial_name) in [("ns", "a", "t1"), ("ns", "b", "t2"), ("other", "c", "t1")] {
            let mut meta = ObjectMeta::new(ns, name);
            meta.labels.insert(LABEL_TRIAL.to_string(), trial_name.to_string());
            store.put_unit(ExecutionUnit::new(meta));
        }
        let selector = LabelSelector::default().with_label(LABEL_TRIAL, "t1");

        let scoped = store.list_units(Some("ns"), &selector).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].metadata.name, "a");

        let all = store.list_units(None, &selector).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_selector_is_rejected() {
        let store = MemoryClusterStore::new();
        let bad = LabelSelector::default().with_label("", "x");
        let err = store.list_workloads("ns", &bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSelector(_)));
    }
}
