//! Controller runtime tests: change notifications drive trials to completion

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use trial_reconciler::config::ControllerConfig;
use trial_reconciler::controller::Controller;
use trial_reconciler::meta::{ObjectKey, ObjectMeta, TargetRef};
use trial_reconciler::metric::LocalCapture;
use trial_reconciler::probe::{RolloutProber, RolloutStatus, StabilityError, StabilityProber};
use trial_reconciler::reconcile::TrialReconciler;
use trial_reconciler::store::{ClusterStore, MemoryClusterStore};
use trial_reconciler::trial::{
    ConditionKind, ConditionStatus, Experiment, Metric, MetricKind, PatchOperation, Trial,
};
use trial_reconciler::workload::{ContainerState, ExecutionUnit, UnitPhase};

fn config() -> Arc<ControllerConfig> {
    Arc::new(
        ControllerConfig::builder()
            .stable_grace(Duration::from_millis(20))
            .error_backoff(Duration::from_millis(10), Duration::from_millis(100))
            .max_concurrent_reconciles(2)
            .build()
            .unwrap(),
    )
}

/// Poll until `check` passes or two seconds elapse.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn start_controller(
    store: &Arc<MemoryClusterStore>,
) -> (oneshot::Sender<()>, tokio::task::JoinHandle<trial_reconciler::Result<()>>) {
    let reconciler = TrialReconciler::new(
        Arc::clone(store),
        RolloutProber::new(Arc::clone(store)).with_retry_after(Duration::from_millis(20)),
        LocalCapture,
        config(),
    );
    let controller = Controller::new(reconciler);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(controller.run(async {
        let _ = stop_rx.await;
    }));
    (stop_tx, handle)
}

fn finish_run(store: &MemoryClusterStore, key: &ObjectKey, run_secs: i64) {
    let workload = store.workload(key).unwrap();
    let started = Utc::now() - chrono::Duration::seconds(run_secs);
    let finished = Utc::now();

    let mut meta = ObjectMeta::new(key.namespace.clone(), format!("{}-0", key.name));
    meta.labels = workload.spec.template.labels.clone();
    let mut unit = ExecutionUnit::new(meta);
    unit.phase = UnitPhase::Succeeded;
    unit.containers.push(ContainerState::Terminated {
        started_at: started,
        finished_at: finished,
        exit_code: 0,
        reason: "Completed".to_string(),
    });
    store.put_unit(unit);
    store
        .update_workload_status(key, |s| {
            s.start_time = Some(started);
            s.completion_time = Some(finished);
        })
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trial_runs_to_completion() {
    let store = Arc::new(MemoryClusterStore::new());
    store.put_experiment(
        Experiment::builder("ns", "exp")
            .metric(Metric::new("duration", MetricKind::Local))
            .build(),
    );
    let (stop, handle) = start_controller(&store);

    let key = store
        .create_trial(Trial::builder("ns", "t1").experiment("exp").build())
        .unwrap()
        .key();

    let s = Arc::clone(&store);
    let k = key.clone();
    assert!(eventually(|| {
        let s = Arc::clone(&s);
        let k = k.clone();
        async move { s.workload(&k).is_some() }
    })
    .await);

    finish_run(&store, &key, 42);

    let s = Arc::clone(&store);
    let k = key.clone();
    assert!(eventually(|| {
        let s = Arc::clone(&s);
        let k = k.clone();
        async move { s.get_trial(&k).await.map(|t| t.is_finished()).unwrap_or(false) }
    })
    .await);

    let trial = store.get_trial(&key).await.unwrap();
    assert!(trial.status.conditions.is(ConditionKind::Complete, ConditionStatus::True));
    assert!(trial.status.conditions.is(ConditionKind::Observed, ConditionStatus::True));
    let duration: f64 = trial.value("duration").unwrap().value.parse().unwrap();
    assert!((duration - 42.0).abs() < 1.0);
    assert_eq!(store.workload_count(), 1);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pending_rollout_is_rechecked() {
    let store = Arc::new(MemoryClusterStore::new());
    store.put_experiment(Experiment::new("ns", "exp"));
    let target = TargetRef::new("Deployment", "ns", "web");
    let lagging = RolloutStatus {
        generation: 2,
        observed_generation: 2,
        replicas: 2,
        updated_replicas: 2,
        available_replicas: 1,
        total_replicas: 2,
        progress_deadline_exceeded: false,
    };
    store.set_rollout(target.clone(), lagging.clone());
    let (stop, handle) = start_controller(&store);

    let key = store
        .create_trial(
            Trial::builder("ns", "t1")
                .experiment("exp")
                .patch(PatchOperation::waiting(target.clone()))
                .build(),
        )
        .unwrap()
        .key();

    let s = Arc::clone(&store);
    let k = key.clone();
    assert!(eventually(|| {
        let s = Arc::clone(&s);
        let k = k.clone();
        async move {
            s.get_trial(&k)
                .await
                .ok()
                .and_then(|t| t.status.conditions.get(ConditionKind::Stable).cloned())
                .is_some_and(|c| c.reason == "Waiting")
        }
    })
    .await);
    assert_eq!(store.workload_count(), 0);

    // Rollout completes; the delayed requeue picks it up without a trial event
    store.set_rollout(
        target,
        RolloutStatus {
            available_replicas: 2,
            ..lagging
        },
    );

    let s = Arc::clone(&store);
    let k = key.clone();
    assert!(eventually(|| {
        let s = Arc::clone(&s);
        let k = k.clone();
        async move { s.workload(&k).is_some() }
    })
    .await);
    let trial = store.get_trial(&key).await.unwrap();
    assert!(!trial.has_pending_patches());
    assert!(trial.status.conditions.is(ConditionKind::Stable, ConditionStatus::True));

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_startup_resync_picks_up_existing_trials() {
    let store = Arc::new(MemoryClusterStore::new());
    store.put_experiment(Experiment::new("ns", "exp"));
    for name in ["a", "b", "c"] {
        store
            .create_trial(Trial::builder("ns", name).experiment("exp").build())
            .unwrap();
    }

    let (stop, handle) = start_controller(&store);

    let s = Arc::clone(&store);
    assert!(eventually(|| {
        let s = Arc::clone(&s);
        async move { s.workload_count() == 3 }
    })
    .await);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handle_counts_passes() {
    let store = Arc::new(MemoryClusterStore::new());
    let reconciler = TrialReconciler::new(
        Arc::clone(&store),
        RolloutProber::new(Arc::clone(&store)),
        LocalCapture,
        config(),
    );
    let controller = Controller::new(reconciler);
    let handle = controller.handle();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(controller.run(async {
        let _ = stop_rx.await;
    }));

    // Unknown trials finish immediately
    handle.enqueue(ObjectKey::new("ns", "ghost"));
    let h = handle.clone();
    assert!(eventually(|| {
        let h = h.clone();
        async move { h.passes() >= 1 }
    })
    .await);

    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}

/// Panics on its first probe, settles every patch afterwards.
#[derive(Default)]
struct PanicOnceProber {
    panicked: AtomicBool,
}

impl StabilityProber for PanicOnceProber {
    async fn probe(&self, _op: &PatchOperation) -> Result<(), StabilityError> {
        assert!(
            self.panicked.swap(true, Ordering::SeqCst),
            "prober crashed on first call"
        );
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_pass_is_retried() {
    let store = Arc::new(MemoryClusterStore::new());
    store.put_experiment(Experiment::new("ns", "exp"));
    let reconciler = TrialReconciler::new(
        Arc::clone(&store),
        PanicOnceProber::default(),
        LocalCapture,
        config(),
    );
    let controller = Controller::new(reconciler);
    let handle = controller.handle();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(controller.run(async {
        let _ = stop_rx.await;
    }));

    let key = store
        .create_trial(
            Trial::builder("ns", "t1")
                .experiment("exp")
                .patch(PatchOperation::waiting(TargetRef::new("Deployment", "ns", "web")))
                .build(),
        )
        .unwrap()
        .key();

    let s = Arc::clone(&store);
    let k = key.clone();
    assert!(eventually(|| {
        let s = Arc::clone(&s);
        let k = k.clone();
        async move { s.get_trial(&k).await.is_ok_and(|t| !t.has_pending_patches()) }
    })
    .await);
    assert!(handle.passes() >= 2);

    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}
