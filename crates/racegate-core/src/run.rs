//! Top-level orchestration of one acquisition run.
//!
//! Phases, in order:
//! 1. wait for the prepare instant (`target - lead`)
//! 2. prime channels for every entity (skipped in direct mode)
//! 3. wait for the target instant
//! 4. one [`EntityLoop`] per entity, all sharing one [`RunState`]
//!
//! Whatever ends the run, the [`RunSummary`] is built in one place by
//! diffing the entity set against the success set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::collaborators::{AttemptExecutor, ChannelSource, ChannelValidator, NoopNotifier, Notifier};
use crate::config::RunConfig;
use crate::dispatch::RaceDispatcher;
use crate::domain::{Channel, ChannelAssignment, Entity, EntityKey};
use crate::entity_loop::{EntityLoop, LoopExit};
use crate::gate::{GateOutcome, TimeGate};
use crate::metrics::METRICS;
use crate::obs;
use crate::pool::{pad_with_sentinels, ChannelPool};
use crate::state::{FailureRecord, RunState, StopReason};

/// Final report of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,

    /// Keys that reached success, in input order.
    pub succeeded: Vec<EntityKey>,

    /// Keys that never succeeded, in input order.
    pub unsucceeded: Vec<EntityKey>,

    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Rounds started per entity.
    pub rounds: BTreeMap<EntityKey, u32>,

    /// Last failure of every entity that did not succeed.
    pub last_failures: BTreeMap<EntityKey, FailureRecord>,

    pub stopped_by: StopReason,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.unsucceeded.len()
    }

    /// Fraction of entities that succeeded, `0.0` for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.succeeded.len() as f64 / self.total() as f64
    }

    pub fn all_succeeded(&self) -> bool {
        self.unsucceeded.is_empty()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Stops a run from another task (e.g. a Ctrl-C handler).
#[derive(Debug, Clone)]
pub struct StopHandle {
    state: Arc<RunState>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.state.stop() {
            info!("stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

/// Coordinator for one run. Single-shot: build a new one per run.
pub struct OrchestrationRun {
    run_id: String,
    config: RunConfig,
    pool: Option<ChannelPool>,
    dispatcher: RaceDispatcher,
    notifier: Arc<dyn Notifier>,
    gate: TimeGate,
    state: Arc<RunState>,
}

impl OrchestrationRun {
    pub fn new(executor: Arc<dyn AttemptExecutor>, config: RunConfig) -> Self {
        let dispatcher = RaceDispatcher::new(executor, config.dispatch.clone());
        Self {
            run_id: Uuid::new_v4().to_string(),
            config,
            pool: None,
            dispatcher,
            notifier: Arc::new(NoopNotifier),
            gate: TimeGate::default(),
            state: Arc::new(RunState::new()),
        }
    }

    /// Attach a channel source and validator for pooled mode.
    pub fn with_pool(
        mut self,
        source: Arc<dyn ChannelSource>,
        validator: Arc<dyn ChannelValidator>,
    ) -> Self {
        self.pool = Some(ChannelPool::new(source, validator, self.config.pool.clone()));
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_gate(mut self, gate: TimeGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Stop the run: live loops finish their current race and start no other.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Execute with the configured lead and channel count.
    pub async fn execute_at(&self, entities: &[Entity], target: DateTime<Utc>) -> RunSummary {
        self.execute(
            entities,
            target,
            self.config.lead(),
            self.config.channels_per_entity,
        )
        .await
    }

    /// Run all phases and summarise. Never returns an error: collaborator
    /// failures only shape the summary.
    pub async fn execute(
        &self,
        entities: &[Entity],
        target: DateTime<Utc>,
        lead: Duration,
        channels_per_entity: usize,
    ) -> RunSummary {
        let span = obs::run_span(&self.run_id);
        self.execute_inner(entities, target, lead, channels_per_entity)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        entities: &[Entity],
        target: DateTime<Utc>,
        lead: Duration,
        channels_per_entity: usize,
    ) -> RunSummary {
        let started = Instant::now();
        let started_at = Utc::now();
        let entities = dedupe(entities);
        obs::emit_run_started(&self.run_id, entities.len(), channels_per_entity);

        let prepare_at = match chrono::Duration::from_std(lead)
            .ok()
            .and_then(|lead| target.checked_sub_signed(lead))
        {
            Some(at) => at,
            None => {
                warn!(
                    lead_ms = lead.as_millis() as u64,
                    "lead reaches past the supported time range, preparing immediately"
                );
                self.gate.now()
            }
        };
        if !self.pass_gate(prepare_at, "prepare").await {
            return self.finish(&entities, started, started_at);
        }

        let assignments = self.assign(&entities, channels_per_entity).await;

        if !self.pass_gate(target, "target").await {
            return self.finish(&entities, started, started_at);
        }

        if let Some(limit) = self.config.budget.max_duration() {
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                tokio::select! {
                    _ = state.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        if state.stop_with(StopReason::BudgetExhausted) {
                            info!(limit_ms = limit.as_millis() as u64, "run budget exhausted");
                        }
                    }
                }
            });
        }

        let entity_loop = EntityLoop::new(
            self.dispatcher.clone(),
            Arc::clone(&self.notifier),
            self.config.entity_loop.clone(),
        )
        .with_max_rounds(self.config.budget.max_rounds)
        .with_escalation(self.config.escalation.clone());

        let mut join_set = JoinSet::new();
        for entity in entities.iter().cloned() {
            let entity_loop = entity_loop.clone();
            let state = Arc::clone(&self.state);
            let assignment = assignments.get(&entity.key).cloned().unwrap_or_else(|| {
                ChannelAssignment::Pooled(pad_with_sentinels(Vec::new(), channels_per_entity))
            });
            let span = obs::entity_span(entity.key.as_str());
            join_set.spawn(
                async move {
                    let exit = entity_loop.run(&entity, &assignment, &state).await;
                    (entity.key, exit)
                }
                .instrument(span),
            );
        }

        let total = entities.len();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, exit)) if !exit.is_success() => {
                    info!(entity = %key, exit = exit_name(&exit), "entity loop ended without success");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "entity loop task failed"),
            }
            if self.state.succeeded_count() >= total {
                self.state.stop_with(StopReason::AllSucceeded);
            }
        }

        self.finish(&entities, started, started_at)
    }

    /// Returns `false` when the run was stopped while waiting.
    async fn pass_gate(&self, at: DateTime<Utc>, label: &str) -> bool {
        let token = self.state.token();
        match self.gate.await_instant(at, label, &token).await {
            GateOutcome::Reached => {
                let late_ms = (self.gate.now() - at).num_milliseconds();
                obs::emit_gate_reached(&self.run_id, label, late_ms);
                true
            }
            GateOutcome::Cancelled => {
                obs::emit_gate_cancelled(&self.run_id, label);
                false
            }
        }
    }

    async fn assign(
        &self,
        entities: &[Entity],
        channels_per_entity: usize,
    ) -> HashMap<EntityKey, ChannelAssignment> {
        if channels_per_entity == 0 {
            return entities
                .iter()
                .map(|e| (e.key.clone(), ChannelAssignment::Direct))
                .collect();
        }

        let primed = Instant::now();
        let lists = match &self.pool {
            Some(pool) => pool.prime(entities, channels_per_entity, &self.state.token()).await,
            None => {
                warn!(
                    channels_per_entity,
                    "no channel source configured, every entity gets sentinels"
                );
                entities
                    .iter()
                    .map(|e| (e.key.clone(), pad_with_sentinels(Vec::new(), channels_per_entity)))
                    .collect()
            }
        };

        let assignments: HashMap<EntityKey, ChannelAssignment> = lists
            .into_iter()
            .map(|(key, channels): (EntityKey, Vec<Channel>)| (key, ChannelAssignment::Pooled(channels)))
            .collect();

        let valid: usize = assignments.values().map(|a| a.usable().len()).sum();
        let sentinels: usize = assignments.values().map(ChannelAssignment::sentinel_count).sum();
        obs::emit_pool_primed(
            &self.run_id,
            assignments.len(),
            valid,
            sentinels,
            primed.elapsed().as_millis() as u64,
        );
        assignments
    }

    fn finish(&self, entities: &[Entity], started: Instant, started_at: DateTime<Utc>) -> RunSummary {
        let all = self.state.succeeded_count() >= entities.len();
        self.state.stop_with(if all {
            StopReason::AllSucceeded
        } else {
            StopReason::LoopsFinished
        });
        let snapshot = self.state.snapshot();
        let stopped_by = snapshot.stop_reason.unwrap_or(StopReason::LoopsFinished);

        let (succeeded, unsucceeded): (Vec<EntityKey>, Vec<EntityKey>) = entities
            .iter()
            .map(|e| e.key.clone())
            .partition(|k| snapshot.succeeded.contains(k));

        let last_failures = snapshot
            .failed
            .into_iter()
            .filter(|(k, _)| unsucceeded.contains(k))
            .collect();

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            succeeded,
            unsucceeded,
            elapsed: started.elapsed(),
            started_at,
            finished_at: Utc::now(),
            rounds: snapshot.rounds,
            last_failures,
            stopped_by,
        };

        obs::emit_run_finished(
            &self.run_id,
            summary.elapsed_ms(),
            summary.succeeded.len(),
            summary.unsucceeded.len(),
            &summary.stopped_by.to_string(),
        );
        METRICS.flush();
        summary
    }
}

fn exit_name(exit: &LoopExit) -> &'static str {
    match exit {
        LoopExit::Succeeded(_) => "succeeded",
        LoopExit::Stopped => "stopped",
        LoopExit::RoundsExhausted => "rounds_exhausted",
        LoopExit::Escalated(_) => "escalated",
    }
}

/// Keep the first entity per key.
fn dedupe(entities: &[Entity]) -> Vec<Entity> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(entities.len());
    for entity in entities {
        if seen.insert(entity.key.clone()) {
            unique.push(entity.clone());
        } else {
            warn!(entity = %entity.key, "duplicate entity key ignored");
        }
    }
    unique
}
