//! Condition Ledger - typed status bookkeeping for a trial

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of trial condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    /// Patched objects have settled.
    Stable,
    /// Patches have been applied by the patch logic.
    Patched,
    /// Metrics have been collected.
    Observed,
    /// The trial failed (terminal when `True`).
    Failed,
    /// The trial finished (terminal when `True`).
    Complete,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Condition holds.
    True,
    /// Condition does not hold.
    False,
    /// Condition has not been determined.
    Unknown,
}

/// One entry in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialCondition {
    /// Condition kind
    pub kind: ConditionKind,
    /// Current status
    pub status: ConditionStatus,
    /// Machine-readable reason, possibly empty
    #[serde(default)]
    pub reason: String,
    /// Human-readable message, possibly empty
    #[serde(default)]
    pub message: String,
    /// Last time `(status, reason, message)` changed
    pub last_transition_time: DateTime<Utc>,
}

/// Ordered set of conditions, at most one per kind.
///
/// Mutations only touch the in-memory status; persisting the trial is the
/// caller's responsibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionLedger {
    conditions: Vec<TrialCondition>,
}

impl ConditionLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a condition.
    ///
    /// The transition time only moves when `(status, reason, message)`
    /// differs from the stored value. Returns `true` if anything changed.
    pub fn apply(
        &mut self,
        kind: ConditionKind,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(c) = self.conditions.iter_mut().find(|c| c.kind == kind) {
            if c.status == status && c.reason == reason && c.message == message {
                return false;
            }
            c.status = status;
            c.reason = reason.to_string();
            c.message = message.to_string();
            c.last_transition_time = now;
            return true;
        }

        self.conditions.push(TrialCondition {
            kind,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
        });
        true
    }

    /// Compare a condition against a status.
    ///
    /// Returns `None` if the kind has never been set, otherwise whether the
    /// current status equals `status`.
    #[must_use]
    pub fn check(&self, kind: ConditionKind, status: ConditionStatus) -> Option<bool> {
        self.get(kind).map(|c| c.status == status)
    }

    /// Whether the condition is set to `status`.
    #[must_use]
    pub fn is(&self, kind: ConditionKind, status: ConditionStatus) -> bool {
        self.check(kind, status).unwrap_or(false)
    }

    /// Look up a condition by kind.
    #[must_use]
    pub fn get(&self, kind: ConditionKind) -> Option<&TrialCondition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Iterate over all conditions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TrialCondition> {
        self.conditions.iter()
    }

    /// Number of recorded conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Whether no condition has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
