//! End-to-end tests for OrchestrationRun with in-memory collaborators.

use racegate_core::fakes::{
    Behaviour, FakeSource, FakeValidator, RecordingCountdown, RecordingNotifier, ScriptedExecutor,
};
use racegate_core::{
    AnchoredClock, Clock, Entity, EntityKey, ErrorKind, OrchestrationRun, RunBudget, RunConfig,
    RunMode, StopReason, TimeGate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn keys(names: &[&str]) -> Vec<EntityKey> {
    names.iter().map(|n| EntityKey::new(*n)).collect()
}

fn entities(names: &[&str]) -> Vec<Entity> {
    names.iter().map(|n| Entity::new(*n)).collect()
}

fn config(interval_ms: u64) -> RunConfig {
    let mut config = RunConfig::default();
    config.entity_loop.interval_ms = interval_ms;
    config
}

fn test_gate() -> (TimeGate, Arc<AnchoredClock>, Arc<RecordingCountdown>) {
    let clock = Arc::new(AnchoredClock::starting_now());
    let countdown = Arc::new(RecordingCountdown::new());
    (TimeGate::new(clock.clone(), countdown.clone()), clock, countdown)
}

/// Test: three direct-mode entities all succeed on the first attempt
#[tokio::test(start_paused = true)]
async fn test_direct_mode_all_succeed() {
    let exec = Arc::new(ScriptedExecutor::succeeding());
    let notifier = Arc::new(RecordingNotifier::new());
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), config(100))
        .with_notifier(notifier.clone())
        .with_gate(gate);

    let summary = run
        .execute(&entities(&["a", "b", "c"]), clock.now(), Duration::from_secs(180), 0)
        .await;

    assert_eq!(summary.succeeded, keys(&["a", "b", "c"]));
    assert!(summary.unsucceeded.is_empty());
    assert_eq!(summary.stopped_by, StopReason::AllSucceeded);
    assert_eq!(summary.run_id, run.run_id());
    assert!((summary.success_rate() - 1.0).abs() < f64::EPSILON);
    assert_eq!(exec.call_count(), 3);
    assert_eq!(notifier.count(), 3);
}

/// Test: an all-sentinel entity never calls the executor and ends unsucceeded
#[tokio::test(start_paused = true)]
async fn test_sentinel_entity_exhausts_round_budget() {
    let exec = Arc::new(ScriptedExecutor::succeeding());
    let mut cfg = config(100);
    cfg.budget = RunBudget::rounds(5);
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), cfg)
        .with_pool(
            Arc::new(FakeSource::generating()),
            Arc::new(FakeValidator::rejecting_all()),
        )
        .with_gate(gate);

    let summary = run
        .execute(&entities(&["solo"]), clock.now(), Duration::ZERO, 3)
        .await;

    assert!(summary.succeeded.is_empty());
    assert_eq!(summary.unsucceeded, keys(&["solo"]));
    assert_eq!(summary.stopped_by, StopReason::LoopsFinished);
    assert_eq!(summary.rounds[&EntityKey::new("solo")], 5);
    let failure = &summary.last_failures[&EntityKey::new("solo")];
    assert_eq!(failure.error_kind, ErrorKind::Permanent);
    assert_eq!(failure.detail, "no usable channel");
    assert_eq!(exec.call_count(), 0);
}

/// Test: pooled mode races primed channels and succeeds for every entity
#[tokio::test(start_paused = true)]
async fn test_pooled_mode_succeeds() {
    let exec = Arc::new(ScriptedExecutor::new(Behaviour::SucceedAfter(1)));
    let notifier = Arc::new(RecordingNotifier::new());
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), RunMode::Pooled.config())
        .with_pool(
            Arc::new(FakeSource::generating()),
            Arc::new(FakeValidator::accepting()),
        )
        .with_notifier(notifier.clone())
        .with_gate(gate);

    let summary = run.execute_at(&entities(&["a", "b"]), clock.now()).await;

    assert!(summary.all_succeeded());
    assert_eq!(notifier.count(), 2);
    assert!(exec.calls().iter().all(|c| c.route != racegate_core::DIRECT_ROUTE));
    // Every channel fails once, so each entity needs a second round.
    assert_eq!(summary.rounds[&EntityKey::new("a")], 2);
}

/// Test: channels requested without a pool leave every entity sentinel-only
#[tokio::test(start_paused = true)]
async fn test_missing_pool_degrades_to_sentinels() {
    let exec = Arc::new(ScriptedExecutor::succeeding());
    let mut cfg = config(50);
    cfg.budget = RunBudget::rounds(2);
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), cfg).with_gate(gate);

    let summary = run
        .execute(&entities(&["a"]), clock.now(), Duration::ZERO, 2)
        .await;

    assert_eq!(summary.unsucceeded, keys(&["a"]));
    assert_eq!(exec.call_count(), 0);
}

/// Test: mixed outcomes split the entity set
#[tokio::test(start_paused = true)]
async fn test_mixed_outcomes() {
    let exec = Arc::new(ScriptedExecutor::succeeding().entity("bad", Behaviour::Fail(ErrorKind::Business)));
    let mut cfg = config(100);
    cfg.budget = RunBudget::rounds(3);
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), cfg).with_gate(gate);

    let summary = run
        .execute(&entities(&["a", "bad", "b"]), clock.now(), Duration::ZERO, 0)
        .await;

    assert_eq!(summary.succeeded, keys(&["a", "b"]));
    assert_eq!(summary.unsucceeded, keys(&["bad"]));
    assert_eq!(summary.last_failures.len(), 1);
    assert_eq!(
        summary.last_failures[&EntityKey::new("bad")].error_kind,
        ErrorKind::Business
    );
    assert_eq!(exec.calls_for(&EntityKey::new("bad")).len(), 3);
}

/// Test: external stop ends an unbounded run
#[tokio::test(start_paused = true)]
async fn test_stop_handle_ends_unbounded_run() {
    let exec = Arc::new(ScriptedExecutor::failing(ErrorKind::Transient));
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), RunMode::Direct.config()).with_gate(gate);

    let handle = run.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
    });

    let started = Instant::now();
    let summary = run.execute_at(&entities(&["a", "b"]), clock.now()).await;

    assert_eq!(summary.stopped_by, StopReason::Stopped);
    assert_eq!(summary.unsucceeded, keys(&["a", "b"]));
    assert!(started.elapsed() < Duration::from_millis(1_300));
    assert!(!run.stop_handle().is_running());
}

/// Test: the wall-time budget force-stops the run
#[tokio::test(start_paused = true)]
async fn test_duration_budget() {
    let exec = Arc::new(ScriptedExecutor::failing(ErrorKind::Transient));
    let mut cfg = config(100);
    cfg.budget.max_duration_ms = Some(2_000);
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), cfg).with_gate(gate);

    let started = Instant::now();
    let summary = run
        .execute(&entities(&["a"]), clock.now(), Duration::ZERO, 0)
        .await;

    assert_eq!(summary.stopped_by, StopReason::BudgetExhausted);
    assert_eq!(summary.unsucceeded, keys(&["a"]));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_millis(2_200));
}

/// Test: priming waits for the prepare gate and attempts wait for the target
#[tokio::test(start_paused = true)]
async fn test_gates_sequence_the_phases() {
    let exec = Arc::new(ScriptedExecutor::succeeding());
    let source = Arc::new(FakeSource::generating());
    let (gate, clock, countdown) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), config(100))
        .with_pool(source.clone(), Arc::new(FakeValidator::accepting()))
        .with_gate(gate);

    let started = Instant::now();
    let target = clock.now() + chrono::Duration::seconds(10);
    let summary = run
        .execute(&entities(&["a"]), target, Duration::from_secs(3), 1)
        .await;

    assert!(summary.all_succeeded());
    let prepare_ticks = countdown.ticks_for("prepare");
    assert_eq!(prepare_ticks.first(), Some(&7));
    assert_eq!(countdown.reached(), vec!["prepare".to_string(), "target".to_string()]);
    assert_eq!(source.calls(), 1);
    let first_call = exec.calls()[0].at;
    assert!(first_call - started >= Duration::from_secs(10));
}

/// Test: stopping during the prepare gate skips every later phase
#[tokio::test(start_paused = true)]
async fn test_stop_during_gate() {
    let exec = Arc::new(ScriptedExecutor::succeeding());
    let source = Arc::new(FakeSource::generating());
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), config(100))
        .with_pool(source.clone(), Arc::new(FakeValidator::accepting()))
        .with_gate(gate);

    let handle = run.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
    });

    let target = clock.now() + chrono::Duration::seconds(60);
    let summary = run
        .execute(&entities(&["a", "b"]), target, Duration::from_secs(10), 3)
        .await;

    assert_eq!(summary.stopped_by, StopReason::Stopped);
    assert_eq!(summary.unsucceeded, keys(&["a", "b"]));
    assert_eq!(source.calls(), 0);
    assert_eq!(exec.call_count(), 0);
}

/// Test: duplicate keys collapse to one entity
#[tokio::test(start_paused = true)]
async fn test_duplicate_entities_deduplicated() {
    let exec = Arc::new(ScriptedExecutor::succeeding());
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec.clone(), config(100)).with_gate(gate);

    let summary = run
        .execute(&entities(&["a", "a", "b"]), clock.now(), Duration::ZERO, 0)
        .await;

    assert_eq!(summary.total(), 2);
    assert_eq!(exec.call_count(), 2);
}

/// Test: an empty entity set finishes immediately
#[tokio::test(start_paused = true)]
async fn test_empty_run() {
    let exec = Arc::new(ScriptedExecutor::succeeding());
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec, config(100)).with_gate(gate);

    let summary = run.execute(&[], clock.now(), Duration::ZERO, 0).await;

    assert_eq!(summary.total(), 0);
    assert_eq!(summary.stopped_by, StopReason::AllSucceeded);
}

/// Test: the summary serialises for reporting
#[tokio::test(start_paused = true)]
async fn test_summary_serialises() {
    let exec = Arc::new(ScriptedExecutor::failing(ErrorKind::Business));
    let mut cfg = config(100);
    cfg.budget = RunBudget::rounds(1);
    let (gate, clock, _) = test_gate();
    let run = OrchestrationRun::new(exec, cfg).with_gate(gate);

    let summary = run
        .execute(&entities(&["a"]), clock.now(), Duration::ZERO, 0)
        .await;

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["unsucceeded"], serde_json::json!(["a"]));
    assert_eq!(json["stopped_by"], "loops_finished");
    assert_eq!(json["last_failures"]["a"]["error_kind"], "business");
}

/// Test: a lead beyond the representable time range primes immediately
#[tokio::test(start_paused = true)]
async fn test_oversized_lead_prepares_immediately() {
    for lead in [Duration::from_millis(10_u64.pow(16)), Duration::from_secs(u64::MAX)] {
        let exec = Arc::new(ScriptedExecutor::succeeding());
        let source = Arc::new(FakeSource::generating());
        let (gate, clock, countdown) = test_gate();
        let run = OrchestrationRun::new(exec.clone(), config(100))
            .with_pool(source.clone(), Arc::new(FakeValidator::accepting()))
            .with_gate(gate);

        let summary = run.execute(&entities(&["a"]), clock.now(), lead, 1).await;

        assert_eq!(summary.succeeded, keys(&["a"]));
        assert!(countdown.ticks_for("prepare").is_empty());
        assert_eq!(countdown.reached(), vec!["prepare".to_string(), "target".to_string()]);
        assert_eq!(source.calls(), 1);
    }
}
