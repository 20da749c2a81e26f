//! Controller runtime
//!
//! Drives [`TrialReconciler`] passes from store change notifications:
//!
//! - keys are deduplicated while queued
//! - at most one pass per trial is in flight; a notification arriving during
//!   a pass reruns it afterwards
//! - concurrency across trials is bounded by a semaphore
//! - `RequeueAfter` delays are honored, infrastructure errors back off
//!   exponentially per key
//! - every trial is resynced at startup and after the notification feed lags

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::meta::ObjectKey;
use crate::metric::MetricCapture;
use crate::probe::StabilityProber;
use crate::reconcile::{event_trigger, trial_trigger, Action, TrialReconciler};
use crate::store::ClusterStore;
use crate::{Error, Result};

/// Scheduling state of one key; absent keys are idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    /// Sent to the run loop, not yet dispatched.
    Queued,
    /// A pass is in flight; `dirty` reruns it once it finishes.
    Running { dirty: bool },
}

/// Work queue shared by the run loop, pass tasks and delayed requeues.
///
/// Every state change of a key happens under that key's `DashMap` entry, so a
/// notification arriving while a pass finishes is never lost.
struct WorkQueue {
    tx: mpsc::UnboundedSender<ObjectKey>,
    states: DashMap<ObjectKey, KeyState>,
    failures: DashMap<ObjectKey, u32>,
    passes: AtomicUsize,
    config: Arc<ControllerConfig>,
}

impl WorkQueue {
    fn new(config: Arc<ControllerConfig>) -> (Arc<Self>, mpsc::UnboundedReceiver<ObjectKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            tx,
            states: DashMap::new(),
            failures: DashMap::new(),
            passes: AtomicUsize::new(0),
            config,
        });
        (queue, rx)
    }

    fn enqueue(&self, key: ObjectKey) {
        match self.states.entry(key) {
            Entry::Occupied(mut entry) => {
                if let KeyState::Running { dirty } = entry.get_mut() {
                    *dirty = true;
                }
            }
            Entry::Vacant(entry) => {
                // Receiver lives as long as the run loop
                let _ = self.tx.send(entry.key().clone());
                entry.insert(KeyState::Queued);
            }
        }
    }

    fn enqueue_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        // A guard dropped while the runtime shuts down has nowhere to schedule
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let queue = Arc::clone(self);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Mark a dequeued key as running. Returns `false` if a pass is already
    /// in flight, in which case the key is flagged to rerun instead.
    fn start(&self, key: &ObjectKey) -> bool {
        let mut state = self.states.entry(key.clone()).or_insert(KeyState::Queued);
        let current = *state;
        match current {
            KeyState::Queued => {
                *state = KeyState::Running { dirty: false };
                true
            }
            KeyState::Running { .. } => {
                *state = KeyState::Running { dirty: true };
                false
            }
        }
    }

    fn finish(self: &Arc<Self>, key: ObjectKey, result: Result<Action>) {
        self.passes.fetch_add(1, Ordering::SeqCst);

        // Failed passes wait out their backoff even when notified meanwhile
        let (rerun, honor_dirty, delay) = match result {
            Ok(action) => {
                self.failures.remove(&key);
                match action {
                    Action::Done => (false, true, None),
                    Action::Requeue => (true, true, None),
                    Action::RequeueAfter(delay) => (false, true, Some(delay)),
                }
            }
            Err(e) => {
                let failures = {
                    let mut entry = self.failures.entry(key.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                let delay = self.config.error_backoff(failures);
                warn!(trial = %key, error = %e, failures, ?delay, "Reconcile failed");
                (false, false, Some(delay))
            }
        };

        if let Entry::Occupied(mut entry) = self.states.entry(key.clone()) {
            let dirty = honor_dirty && matches!(entry.get(), KeyState::Running { dirty: true });
            if rerun || dirty {
                let _ = self.tx.send(key.clone());
                entry.insert(KeyState::Queued);
            } else {
                entry.remove();
            }
        }
        if let Some(delay) = delay {
            self.enqueue_after(key, delay);
        }
    }
}

/// Finishes a pass when dropped, so a panicking pass still releases its key.
struct PassGuard {
    queue: Arc<WorkQueue>,
    key: Option<ObjectKey>,
}

impl PassGuard {
    fn finish(mut self, result: Result<Action>) {
        if let Some(key) = self.key.take() {
            self.queue.finish(key, result);
        }
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.queue
                .finish(key, Err(Error::Other("reconcile pass did not complete".to_string())));
        }
    }
}

/// Handle for feeding keys to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    queue: Arc<WorkQueue>,
}

impl ControllerHandle {
    /// Request a pass for a trial.
    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.enqueue(key);
    }

    /// Number of finished passes.
    #[must_use]
    pub fn passes(&self) -> usize {
        self.queue.passes.load(Ordering::SeqCst)
    }
}

/// Controller running reconcile passes for every trial in a store.
pub struct Controller<S, P, C> {
    reconciler: Arc<TrialReconciler<S, P, C>>,
    queue: Arc<WorkQueue>,
    rx: mpsc::UnboundedReceiver<ObjectKey>,
}

impl<S, P, C> Controller<S, P, C>
where
    S: ClusterStore + 'static,
    P: StabilityProber + 'static,
    C: MetricCapture + 'static,
{
    /// Create a controller around a reconciler.
    pub fn new(reconciler: TrialReconciler<S, P, C>) -> Self {
        let (queue, rx) = WorkQueue::new(Arc::new(reconciler.config().clone()));
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            rx,
        }
    }

    /// Handle for enqueueing keys and reading counters.
    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Run until `shutdown` resolves, then wait for in-flight passes.
    ///
    /// # Errors
    ///
    /// Returns an error if the startup resync cannot list trials.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let store = Arc::clone(self.reconciler.store());
        let mut events = Some(store.watch());
        self.resync().await?;

        let config = self.reconciler.config();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_reconciles));
        info!(
            concurrency = config.max_concurrent_reconciles,
            "Trial controller started"
        );

        let mut passes = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(key) = self.rx.recv() => {
                    self.dispatch(key, &semaphore, &mut passes);
                }
                event = recv_event(&mut events) => match event {
                    Ok(event) => {
                        if let Some(key) = event_trigger(&event) {
                            self.queue.enqueue(key);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change notifications dropped, resyncing");
                        if let Err(e) = self.resync().await {
                            warn!(error = %e, "Resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Change notification feed closed");
                        events = None;
                    }
                },
                Some(joined) = passes.join_next(), if !passes.is_empty() => log_join(joined),
            }
        }

        info!(in_flight = passes.len(), "Trial controller stopping");
        while let Some(joined) = passes.join_next().await {
            log_join(joined);
        }
        Ok(())
    }

    async fn resync(&self) -> Result<()> {
        let trials = self.reconciler.store().list_trials().await?;
        debug!(count = trials.len(), "Resyncing trials");
        for trial in &trials {
            if let Some(key) = trial_trigger(trial) {
                self.queue.enqueue(key);
            }
        }
        Ok(())
    }

    fn dispatch(&self, key: ObjectKey, semaphore: &Arc<Semaphore>, passes: &mut JoinSet<()>) {
        if !self.queue.start(&key) {
            return;
        }

        let reconciler = Arc::clone(&self.reconciler);
        let guard = PassGuard {
            queue: Arc::clone(&self.queue),
            key: Some(key.clone()),
        };
        let semaphore = Arc::clone(semaphore);
        passes.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => reconciler.reconcile(&key).await,
                Err(_) => Err(Error::Other("reconcile semaphore closed".to_string())),
            };
            guard.finish(result);
        });
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Reconcile pass panicked");
    }
}

async fn recv_event(
    events: &mut Option<broadcast::Receiver<crate::store::ChangeEvent>>,
) -> std::result::Result<crate::store::ChangeEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
