//! Shared, concurrency-safe state of one orchestration run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::domain::{AttemptOutcome, EntityKey, ErrorKind};

/// Why a run stopped accepting new rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every entity succeeded.
    AllSucceeded,
    /// `stop()` was called from outside.
    Stopped,
    /// The run's wall-time budget elapsed.
    BudgetExhausted,
    /// Every entity loop ended on its own (round caps, escalation, no route).
    LoopsFinished,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::AllSucceeded => write!(f, "all_succeeded"),
            StopReason::Stopped => write!(f, "stopped"),
            StopReason::BudgetExhausted => write!(f, "budget_exhausted"),
            StopReason::LoopsFinished => write!(f, "loops_finished"),
        }
    }
}

/// Last failure seen for an entity. Overwritten every round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub round: u32,
    pub error_kind: ErrorKind,
    pub detail: String,
    pub channel: Option<String>,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_outcome(round: u32, outcome: &AttemptOutcome) -> Self {
        Self {
            round,
            error_kind: outcome.error_kind,
            detail: outcome.detail.clone(),
            channel: outcome.channel_used.as_ref().map(|c| c.label()),
            at: Utc::now(),
        }
    }
}

/// Frozen copy of a [`RunState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub succeeded: BTreeSet<EntityKey>,
    pub failed: BTreeMap<EntityKey, FailureRecord>,
    pub rounds: BTreeMap<EntityKey, u32>,
    pub running: bool,
    pub stop_reason: Option<StopReason>,
}

/// Success and failure sets plus the run's cancellation scope.
///
/// Shared by reference (`Arc<RunState>`) between every entity loop of one
/// run. Mutexes are never held across an await point.
#[derive(Debug, Default)]
pub struct RunState {
    succeeded: Mutex<BTreeSet<EntityKey>>,
    failed: Mutex<HashMap<EntityKey, FailureRecord>>,
    rounds: Mutex<HashMap<EntityKey, u32>>,
    token: CancellationToken,
    stop_reason: OnceLock<StopReason>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` once the run has been stopped for any reason.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// A handle to the cancellation scope, for nested tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves when the run is stopped.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Stop the run on external request.
    pub fn stop(&self) -> bool {
        self.stop_with(StopReason::Stopped)
    }

    /// Stop the run, recording `reason` if it is the first stop.
    ///
    /// Returns whether this call set the reason.
    pub fn stop_with(&self, reason: StopReason) -> bool {
        let first = self.stop_reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason.get().copied()
    }

    /// Insert `key` into the success set.
    ///
    /// Returns `true` only for the first insert of a key; later inserts are
    /// no-ops. Clears any failure recorded for the key.
    pub fn record_success(&self, key: &EntityKey) -> bool {
        let inserted = lock(&self.succeeded).insert(key.clone());
        if inserted {
            lock(&self.failed).remove(key);
        }
        inserted
    }

    /// Overwrite the last failure for `key`. Ignored once `key` succeeded.
    pub fn record_failure(&self, key: &EntityKey, record: FailureRecord) {
        if self.is_succeeded(key) {
            return;
        }
        lock(&self.failed).insert(key.clone(), record);
    }

    /// Bump and return the round counter for `key` (first round is 1).
    pub fn begin_round(&self, key: &EntityKey) -> u32 {
        let mut rounds = lock(&self.rounds);
        let n = rounds.entry(key.clone()).or_insert(0);
        *n += 1;
        *n
    }

    pub fn rounds(&self, key: &EntityKey) -> u32 {
        lock(&self.rounds).get(key).copied().unwrap_or(0)
    }

    pub fn is_succeeded(&self, key: &EntityKey) -> bool {
        lock(&self.succeeded).contains(key)
    }

    pub fn succeeded_count(&self) -> usize {
        lock(&self.succeeded).len()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            succeeded: lock(&self.succeeded).clone(),
            failed: lock(&self.failed)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            rounds: lock(&self.rounds)
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            running: self.is_running(),
            stop_reason: self.stop_reason(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(s: &str) -> EntityKey {
        EntityKey::new(s)
    }

    #[test]
    fn test_record_success_is_idempotent() {
        let state = RunState::new();
        assert!(state.record_success(&key("a")));
        assert!(!state.record_success(&key("a")));
        assert_eq!(state.succeeded_count(), 1);
    }

    #[test]
    fn test_success_clears_failure_and_blocks_new_ones() {
        let state = RunState::new();
        let k = key("a");
        state.record_failure(
            &k,
            FailureRecord::from_outcome(1, &AttemptOutcome::business("quota exhausted")),
        );
        assert!(state.snapshot().failed.contains_key(&k));

        state.record_success(&k);
        state.record_failure(&k, FailureRecord::from_outcome(2, &AttemptOutcome::transient("late")));
        assert!(state.snapshot().failed.is_empty());
    }

    #[test]
    fn test_first_stop_reason_wins() {
        let state = RunState::new();
        assert!(state.is_running());
        assert!(state.stop_with(StopReason::BudgetExhausted));
        assert!(!state.stop());
        assert!(!state.is_running());
        assert_eq!(state.stop_reason(), Some(StopReason::BudgetExhausted));
    }

    #[test]
    fn test_round_counter() {
        let state = RunState::new();
        let k = key("a");
        assert_eq!(state.rounds(&k), 0);
        assert_eq!(state.begin_round(&k), 1);
        assert_eq!(state.begin_round(&k), 2);
        assert_eq!(state.snapshot().rounds.get(&k), Some(&2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_are_not_lost() {
        let state = Arc::new(RunState::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                let k = EntityKey::new(format!("e{}", i % 32));
                state.record_success(&k)
            }));
        }

        let mut firsts = 0;
        for h in handles {
            if h.await.unwrap() {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 32);
        assert_eq!(state.succeeded_count(), 32);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves_after_stop() {
        let state = Arc::new(RunState::new());
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.cancelled().await })
        };
        state.stop();
        waiter.await.unwrap();
    }
}
