//! Per-entity retry loop.
//!
//! One round is one race through the [`RaceDispatcher`] followed by a fixed
//! wait. The loop ends on the first success, when the run stops, or when a
//! configured round cap or escalation limit is hit. A stop never interrupts
//! an in-flight race; it only prevents the next one.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::sleep_unless_cancelled;
use crate::collaborators::Notifier;
use crate::config::{EscalationPolicy, LoopConfig};
use crate::dispatch::RaceDispatcher;
use crate::domain::{AttemptOutcome, ChannelAssignment, Entity, ErrorKind};
use crate::metrics::METRICS;
use crate::obs;
use crate::state::{FailureRecord, RunState};

/// How an entity's loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// The entity succeeded with this outcome.
    Succeeded(AttemptOutcome),
    /// The run stopped before the entity succeeded.
    Stopped,
    /// The per-entity round cap was used up.
    RoundsExhausted,
    /// Too many consecutive business rejections; carries the last one.
    Escalated(AttemptOutcome),
}

impl LoopExit {
    pub fn is_success(&self) -> bool {
        matches!(self, LoopExit::Succeeded(_))
    }
}

#[derive(Clone)]
pub struct EntityLoop {
    dispatcher: RaceDispatcher,
    notifier: Arc<dyn Notifier>,
    config: LoopConfig,
    max_rounds: Option<u32>,
    escalation: EscalationPolicy,
}

impl EntityLoop {
    pub fn new(dispatcher: RaceDispatcher, notifier: Arc<dyn Notifier>, config: LoopConfig) -> Self {
        Self {
            dispatcher,
            notifier,
            config,
            max_rounds: None,
            escalation: EscalationPolicy::default(),
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: Option<u32>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    /// Drive rounds for `entity` until it succeeds or the loop has to end.
    pub async fn run(
        &self,
        entity: &Entity,
        assignment: &ChannelAssignment,
        state: &RunState,
    ) -> LoopExit {
        let key = &entity.key;
        let token = state.token();
        let mut business_streak: u32 = 0;

        loop {
            if !state.is_running() {
                debug!(entity = %key, "run stopped, leaving loop");
                return LoopExit::Stopped;
            }

            let round = state.begin_round(key);
            let outcome = AssertUnwindSafe(self.dispatcher.dispatch(entity, assignment))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| AttemptOutcome::transient("dispatcher panicked"));

            if outcome.succeeded {
                if state.record_success(key) {
                    let channel = outcome
                        .channel_used
                        .as_ref()
                        .map(|c| c.label())
                        .unwrap_or_else(|| crate::dispatch::DIRECT_ROUTE.to_string());
                    obs::emit_entity_succeeded(key.as_str(), round, &channel);
                    self.notify(entity, &outcome).await;
                }
                return LoopExit::Succeeded(outcome);
            }

            debug!(
                entity = %key,
                round,
                kind = %outcome.error_kind,
                detail = %outcome.detail,
                "round failed"
            );
            state.record_failure(key, FailureRecord::from_outcome(round, &outcome));

            if outcome.error_kind == ErrorKind::Business {
                business_streak += 1;
            } else {
                business_streak = 0;
            }
            if let Some(limit) = self.escalation.max_consecutive_business {
                if business_streak >= limit {
                    let mut record = FailureRecord::from_outcome(round, &outcome);
                    record.error_kind = ErrorKind::Permanent;
                    state.record_failure(key, record);
                    obs::emit_entity_escalated(key.as_str(), business_streak, &outcome.detail);
                    return LoopExit::Escalated(outcome);
                }
            }

            if self.max_rounds.is_some_and(|max| round >= max) {
                debug!(entity = %key, round, "round cap reached");
                return LoopExit::RoundsExhausted;
            }

            if !sleep_unless_cancelled(self.config.interval(), &token).await {
                return LoopExit::Stopped;
            }
        }
    }

    /// Fire the notifier once. Errors are logged, never retried.
    async fn notify(&self, entity: &Entity, outcome: &AttemptOutcome) {
        match self.notifier.on_success(entity, outcome).await {
            Ok(()) => METRICS.inc_notifications_sent(),
            Err(e) => {
                METRICS.inc_notifications_failed();
                obs::emit_notify_failed(entity.key.as_str(), &e);
                warn!(entity = %entity.key, "success notification not delivered");
            }
        }
    }
}
