//! Trial Reconciler
//!
//! One pass reads the trial, advances at most one transition, commits it and
//! returns an [`Action`] telling the runtime when to look again. Passes never
//! hold state between invocations; a conflicting commit is dropped and the
//! next pass recomputes from a fresh read.
//!
//! Order of checks in a pass:
//!
//! 1. finished or deleted trials are left alone
//! 2. pending patches are probed, one settled patch per pass
//! 3. `Stable` is promoted once nothing waits
//! 4. a pass right after a `Stable` transition only requeues
//! 5. run workloads are discovered (setup workloads excluded) and
//! 6. created when missing
//! 7. workload state is folded into the trial's time bracket and failures
//! 8. `Observed=Unknown` marks the start of metric collection
//! 9. the first uncollected metric is captured
//! 10. the trial is marked `Complete` once every metric is resolved

mod trigger;

pub use trigger::{event_trigger, trial_trigger, workload_trigger};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::meta::{ObjectKey, LABEL_TRIAL};
use crate::metric::{resolve_target, CaptureError, MetricCapture};
use crate::probe::StabilityProber;
use crate::selector::LabelSelector;
use crate::store::ClusterStore;
use crate::trial::{ConditionKind, ConditionStatus, Experiment, Trial, TrialSpec};
use crate::workload::{aggregate, merge_times, new_run_workload, Workload};
use crate::Result;

/// What the runtime should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Wait for the next change notification.
    Done,
    /// Run another pass as soon as possible.
    Requeue,
    /// Run another pass no sooner than the delay.
    RequeueAfter(Duration),
}

/// Outcome of the patch stabilization scan.
enum Stabilization {
    /// Nothing was waiting.
    Idle,
    /// A patch settled or failed; commit.
    Changed,
    /// Every pending patch asked to retry; commit, then wait this long.
    Waiting(Duration),
}

/// Per-trial state machine.
pub struct TrialReconciler<S, P, C> {
    store: Arc<S>,
    prober: P,
    capture: C,
    config: Arc<ControllerConfig>,
}

impl<S, P, C> TrialReconciler<S, P, C>
where
    S: ClusterStore,
    P: StabilityProber,
    C: MetricCapture,
{
    /// Create a reconciler.
    pub fn new(store: Arc<S>, prober: P, capture: C, config: Arc<ControllerConfig>) -> Self {
        Self {
            store,
            prober,
            capture,
            config,
        }
    }

    /// The store this reconciler reads and commits to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one pass for a trial.
    ///
    /// # Errors
    ///
    /// Infrastructure failures (store reads, workload creation, unit
    /// listing) are returned for the runtime to back off on. They are never
    /// recorded on the trial.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        self.reconcile_at(key, Utc::now()).await
    }

    /// Run one pass with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`TrialReconciler::reconcile`].
    #[instrument(skip_all, fields(trial = %key))]
    pub async fn reconcile_at(&self, key: &ObjectKey, now: DateTime<Utc>) -> Result<Action> {
        let mut trial = match self.store.get_trial(key).await {
            Ok(trial) => trial,
            Err(e) if e.is_not_found() => return Ok(Action::Done),
            Err(e) => return Err(e),
        };
        if trial.is_finished() || trial.metadata.is_deleted() {
            return Ok(Action::Done);
        }
        let read_spec = trial.spec.clone();

        match self.stabilize(&mut trial, now).await {
            Stabilization::Changed => return self.commit(trial, &read_spec, Action::Done).await,
            Stabilization::Waiting(delay) => {
                return self
                    .commit(trial, &read_spec, Action::RequeueAfter(delay))
                    .await;
            }
            Stabilization::Idle => {}
        }

        let conditions = &mut trial.status.conditions;
        if conditions.check(ConditionKind::Stable, ConditionStatus::True) == Some(false) {
            conditions.apply(ConditionKind::Stable, ConditionStatus::True, "", "", now);
            return self.commit(trial, &read_spec, Action::Done).await;
        }

        if let Some(stable) = conditions.get(ConditionKind::Stable) {
            // A window end past the representable range never elapses
            let window_end = chrono::Duration::from_std(self.config.stable_grace)
                .ok()
                .and_then(|grace| stable.last_transition_time.checked_add_signed(grace));
            if window_end.map_or(true, |end| end > now) {
                debug!("Stable condition just transitioned, waiting out grace window");
                return Ok(Action::RequeueAfter(self.config.stable_grace));
            }
        }

        // Patches not yet evaluated by the patch logic
        if conditions.check(ConditionKind::Patched, ConditionStatus::Unknown) == Some(true) {
            return Ok(Action::Done);
        }

        let workloads = self.run_workloads(&trial).await?;
        if workloads.is_empty() {
            return self.create_run_workload(&trial).await;
        }

        for workload in &workloads {
            let units = self
                .store
                .list_units(Some(&workload.metadata.namespace), &workload.spec.selector)
                .await?;
            let agg = aggregate(workload, &units);
            if agg.inconsistent {
                // Workloads are watched, units are not; poll until they agree
                debug!(workload = %workload.metadata.key(), "Unit state lags workload state");
                return Ok(Action::Requeue);
            }

            let mut dirty = false;
            if let Some(failure) = agg.failures.first() {
                dirty |= trial.status.conditions.apply(
                    ConditionKind::Failed,
                    ConditionStatus::True,
                    &failure.reason,
                    &failure.message,
                    now,
                );
            }
            dirty |= merge_times(&mut trial.status, &agg, trial.spec.start_time_offset);
            if dirty {
                return self.commit(trial, &read_spec, Action::Done).await;
            }
        }

        if trial.status.completion_time.is_none() {
            return Ok(Action::Done);
        }

        let experiment = self.store.get_experiment(&trial.experiment_key()?).await?;
        self.observe(trial, &read_spec, &experiment, now).await
    }

    async fn stabilize(&self, trial: &mut Trial, now: DateTime<Utc>) -> Stabilization {
        let conditions = &mut trial.status.conditions;
        let mut wait_for: Option<Duration> = None;

        for op in trial.spec.patch_operations.iter_mut().filter(|op| op.wait) {
            match self.prober.probe(op).await {
                Ok(()) => {
                    debug!(patch_target = %op.target, "Patch settled");
                    op.wait = false;
                    conditions.apply(ConditionKind::Stable, ConditionStatus::False, "", "", now);
                    return Stabilization::Changed;
                }
                Err(err) => match err.retry_after() {
                    Some(delay) => {
                        if wait_for.map_or(true, |w| delay > w) {
                            conditions.apply(
                                ConditionKind::Stable,
                                ConditionStatus::False,
                                "Waiting",
                                &err.to_string(),
                                now,
                            );
                            wait_for = Some(delay);
                        }
                    }
                    None => {
                        warn!(patch_target = %op.target, error = %err, "Stability wait failed");
                        conditions.apply(
                            ConditionKind::Failed,
                            ConditionStatus::True,
                            "WaitFailed",
                            &err.to_string(),
                            now,
                        );
                        return Stabilization::Changed;
                    }
                },
            }
        }

        wait_for.map_or(Stabilization::Idle, Stabilization::Waiting)
    }

    /// Run workloads owned by the trial, excluding setup workloads.
    ///
    /// The role is checked on the listed objects rather than in the selector
    /// so that user-modified labels cannot hide a run workload.
    async fn run_workloads(&self, trial: &Trial) -> Result<Vec<Workload>> {
        let selector = LabelSelector::default().with_label(LABEL_TRIAL, trial.metadata.name.clone());
        let workloads = self
            .store
            .list_workloads(&trial.metadata.namespace, &selector)
            .await?;
        Ok(workloads.into_iter().filter(|w| !w.is_setup()).collect())
    }

    async fn create_run_workload(&self, trial: &Trial) -> Result<Action> {
        let workload = new_run_workload(trial, &self.config.workload);
        match self.store.create_workload(workload).await {
            Ok(created) => {
                info!(workload = %created.metadata.key(), image = %created.spec.template.image, "Created run workload");
                Ok(Action::Done)
            }
            // Listed before another pass's create became visible
            Err(crate::Error::AlreadyExists { .. }) => Ok(Action::Requeue),
            Err(e) => Err(e),
        }
    }

    async fn observe(
        &self,
        mut trial: Trial,
        read_spec: &TrialSpec,
        experiment: &Experiment,
        now: DateTime<Utc>,
    ) -> Result<Action> {
        let metrics = experiment.metrics();

        // Fills the gap until the first capture finishes
        if !metrics.is_empty() && trial.status.conditions.get(ConditionKind::Observed).is_none() {
            trial
                .status
                .conditions
                .apply(ConditionKind::Observed, ConditionStatus::Unknown, "", "", now);
            return self.commit(trial, read_spec, Action::Done).await;
        }

        let namespace = trial.target_namespace().to_string();
        for metric in metrics {
            if trial.find_or_create_value(&metric.name).is_resolved() {
                continue;
            }

            let outcome = match resolve_target(self.store.as_ref(), &namespace, metric).await {
                Ok(target) => self
                    .capture
                    .capture(metric, &trial, &target)
                    .await
                    .and_then(|captured| captured.finite(&metric.name)),
                Err(e) => Err(CaptureError::from(e)),
            };

            match outcome {
                Ok(captured) => {
                    debug!(metric = %metric.name, value = captured.value, "Captured metric");
                    trial
                        .find_or_create_value(&metric.name)
                        .record_success(captured.value, captured.stddev);
                    trial
                        .status
                        .conditions
                        .apply(ConditionKind::Observed, ConditionStatus::False, "", "", now);
                }
                Err(err) => {
                    if let Some(delay) = err.retry_after() {
                        debug!(metric = %metric.name, ?delay, error = %err, "Metric not ready");
                        return Ok(Action::RequeueAfter(delay));
                    }
                    if trial.find_or_create_value(&metric.name).record_failure() {
                        error!(
                            metric = %metric.name,
                            address = err.address.as_deref().unwrap_or_default(),
                            query = err.query.as_deref().unwrap_or_default(),
                            completion_time = ?err.completion_time,
                            error = %err,
                            "Metric collection failed"
                        );
                        trial.status.conditions.apply(
                            ConditionKind::Failed,
                            ConditionStatus::True,
                            "MetricFailed",
                            &err.message,
                            now,
                        );
                    } else {
                        warn!(metric = %metric.name, error = %err, "Metric capture attempt failed");
                        trial
                            .status
                            .conditions
                            .apply(ConditionKind::Observed, ConditionStatus::False, "", "", now);
                    }
                }
            }
            return self.commit(trial, read_spec, Action::Done).await;
        }

        let conditions = &mut trial.status.conditions;
        if conditions.check(ConditionKind::Observed, ConditionStatus::True) == Some(false) {
            conditions.apply(ConditionKind::Observed, ConditionStatus::True, "", "", now);
        }
        conditions.apply(ConditionKind::Complete, ConditionStatus::True, "", "", now);
        info!("Trial complete");
        self.commit(trial, read_spec, Action::Done).await
    }

    /// Persist the trial and return `action`, or request a fresh pass on conflict.
    async fn commit(&self, mut trial: Trial, read_spec: &TrialSpec, action: Action) -> Result<Action> {
        trial.sync_phase();
        let result = if trial.spec == *read_spec {
            self.store.update_trial_status(&trial).await
        } else {
            self.store.update_trial(&trial).await
        };
        match result {
            Ok(stored) => {
                debug!(phase = %stored.status.phase, "Committed trial");
                Ok(action)
            }
            Err(e) if e.is_conflict() => {
                debug!("Trial changed since it was read, discarding pass");
                Ok(Action::Requeue)
            }
            Err(e) => Err(e),
        }
    }
}
