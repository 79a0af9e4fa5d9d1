//! Structured lifecycle events for racegate runs.
//!
//! Every event carries an `event` field (`run.started`, `pool.primed`, ...)
//! and the run id so a JSON log stream can be filtered per run.

use tracing::{info, warn};

/// Span tagged with the run id.
///
/// Attach it to async work with `tracing::Instrument::instrument` rather
/// than entering it, so the instrumented futures stay `Send`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("racegate.run", run_id = %run_id)
}

/// Span for one entity's retry loop.
pub fn entity_span(entity_key: &str) -> tracing::Span {
    tracing::info_span!("racegate.entity", entity = %entity_key)
}

pub fn emit_run_started(run_id: &str, entities: usize, channels_per_entity: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        entities = entities,
        channels_per_entity = channels_per_entity,
    );
}

/// Emit event: a time gate opened (`prepare` or `target`).
pub fn emit_gate_reached(run_id: &str, label: &str, late_ms: i64) {
    info!(event = "run.gate_reached", run_id = %run_id, gate = %label, late_ms = late_ms);
}

pub fn emit_gate_cancelled(run_id: &str, label: &str) {
    warn!(event = "run.gate_cancelled", run_id = %run_id, gate = %label);
}

/// Emit event: channel priming finished.
pub fn emit_pool_primed(run_id: &str, entities: usize, valid: usize, sentinels: usize, elapsed_ms: u64) {
    info!(
        event = "pool.primed",
        run_id = %run_id,
        entities = entities,
        valid_channels = valid,
        sentinels = sentinels,
        elapsed_ms = elapsed_ms,
    );
}

pub fn emit_entity_succeeded(entity_key: &str, round: u32, channel: &str) {
    info!(event = "entity.succeeded", entity = %entity_key, round = round, channel = %channel);
}

/// Emit event: an entity gave up after repeated business rejections.
pub fn emit_entity_escalated(entity_key: &str, consecutive: u32, detail: &str) {
    warn!(
        event = "entity.escalated",
        entity = %entity_key,
        consecutive_business = consecutive,
        detail = %detail,
    );
}

pub fn emit_notify_failed(entity_key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "entity.notify_failed", entity = %entity_key, error = %error);
}

/// Emit event: run finished with counts and the reason it stopped.
pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    succeeded: usize,
    unsucceeded: usize,
    stopped_by: &str,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        succeeded = succeeded,
        unsucceeded = unsucceeded,
        stopped_by = %stopped_by,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_create() {
        let span = run_span("run-1");
        let _entered = span.enter();
        let _inner = entity_span("k1").entered();
    }
}
