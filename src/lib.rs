//! # Trial Reconciler: Experiment Trial Execution Controller
//!
//! Drives experiment trials to completion on a cluster orchestration
//! platform: waits for configuration patches to settle, launches the run
//! workload, folds its observed start/finish times into the trial, collects
//! metric values and records a terminal status.
//!
//! ## Design Principles
//!
//! - **One transition per pass**: every reconcile pass commits at most one
//!   change and returns, so the next pass always starts from a fresh read
//! - **Optimistic concurrency only**: a stale commit is rejected by the store
//!   and recomputed, never retried with old decisions
//! - **Typed outcomes**: collaborator failures carry retry delays and
//!   diagnostics as named fields ([`probe::StabilityError`],
//!   [`metric::CaptureError`])
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use trial_reconciler::config::ControllerConfig;
//! use trial_reconciler::metric::LocalCapture;
//! use trial_reconciler::probe::RolloutProber;
//! use trial_reconciler::reconcile::{Action, TrialReconciler};
//! use trial_reconciler::store::MemoryClusterStore;
//! use trial_reconciler::trial::Trial;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> trial_reconciler::Result<()> {
//! let store = Arc::new(MemoryClusterStore::new());
//! let trial = store.create_trial(Trial::builder("default", "t1").experiment("tune").build())?;
//!
//! let reconciler = TrialReconciler::new(
//!     Arc::clone(&store),
//!     RolloutProber::new(Arc::clone(&store)),
//!     LocalCapture,
//!     Arc::new(ControllerConfig::default()),
//! );
//!
//! // Nothing to wait for: the first pass marks the trial stable
//! assert_eq!(reconciler.reconcile(&trial.key()).await?, Action::Done);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod meta;
pub mod metric;
pub mod probe;
pub mod reconcile;
pub mod selector;
pub mod store;
pub mod trial;
pub mod workload;

pub use error::{Error, Result};
