//! Race dispatcher: one logical attempt fanned out over several channels.
//!
//! Every route runs in its own spawned task. The dispatcher returns as soon
//! as one route succeeds; the remaining tasks are detached, not aborted, so
//! an in-flight request is never torn mid-way. Their results are dropped.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::collaborators::AttemptExecutor;
use crate::config::DispatchConfig;
use crate::domain::{AttemptOutcome, Channel, ChannelAssignment, Entity, ValidChannel};
use crate::metrics::METRICS;

/// Label used in failure details for default routing.
pub const DIRECT_ROUTE: &str = "direct";

#[derive(Clone)]
pub struct RaceDispatcher {
    executor: Arc<dyn AttemptExecutor>,
    config: DispatchConfig,
}

impl RaceDispatcher {
    pub fn new(executor: Arc<dyn AttemptExecutor>, config: DispatchConfig) -> Self {
        Self { executor, config }
    }

    /// Race one attempt for `entity` across its assignment.
    ///
    /// `Direct` makes a single attempt over default routing. `Pooled` drops
    /// sentinels and short-circuits to a permanent "no usable channel"
    /// failure, without calling the executor, when nothing is left.
    pub async fn dispatch(&self, entity: &Entity, assignment: &ChannelAssignment) -> AttemptOutcome {
        let routes: Vec<Option<ValidChannel>> = match assignment {
            ChannelAssignment::Direct => vec![None],
            ChannelAssignment::Pooled(_) => {
                if !assignment.has_route() {
                    return AttemptOutcome::no_usable_channel();
                }
                assignment
                    .usable()
                    .into_iter()
                    .take(self.config.max_fan_out)
                    .cloned()
                    .map(Some)
                    .collect()
            }
        };
        self.race(entity, routes).await
    }

    /// Convenience form taking a bare channel list.
    pub async fn dispatch_channels(&self, entity: &Entity, channels: &[Channel]) -> AttemptOutcome {
        self.dispatch(entity, &ChannelAssignment::Pooled(channels.to_vec()))
            .await
    }

    async fn race(&self, entity: &Entity, routes: Vec<Option<ValidChannel>>) -> AttemptOutcome {
        let started = Instant::now();
        METRICS.add_attempts(routes.len() as u64);

        let entity = Arc::new(entity.clone());
        let mut racing = FuturesUnordered::new();
        for route in routes {
            let executor = Arc::clone(&self.executor);
            let entity = Arc::clone(&entity);
            let label = route
                .as_ref()
                .map(ValidChannel::address)
                .unwrap_or_else(|| DIRECT_ROUTE.to_string());
            let channel = route.clone().map(Channel::Valid);

            let handle = tokio::spawn(async move {
                let t0 = Instant::now();
                let result = executor.attempt(&entity, route.as_ref()).await;
                (result, t0.elapsed())
            });
            racing.push(async move { (label, channel, handle.await) });
        }

        let mut failures: Vec<(String, AttemptOutcome)> = Vec::new();
        while let Some((label, channel, joined)) = racing.next().await {
            // channel_used is always the route the attempt was launched on.
            let outcome = match joined {
                Ok((Ok(outcome), elapsed)) => outcome
                    .normalized()
                    .with_channel(channel)
                    .with_elapsed(elapsed),
                Ok((Err(e), elapsed)) => AttemptOutcome::transient(e.to_string())
                    .with_channel(channel)
                    .with_elapsed(elapsed),
                Err(e) => AttemptOutcome::transient(format!("attempt task failed: {e}"))
                    .with_channel(channel)
                    .with_elapsed(started.elapsed()),
            };

            if outcome.succeeded {
                METRICS.inc_races_won();
                debug!(
                    entity = %entity.key,
                    channel = %label,
                    pending = racing.len(),
                    "race won"
                );
                return outcome;
            }
            failures.push((label, outcome));
        }

        METRICS.inc_races_lost();
        aggregate_failures(failures).with_elapsed(started.elapsed())
    }
}

/// First failure to arrive, with every failure's detail comma-joined.
fn aggregate_failures(failures: Vec<(String, AttemptOutcome)>) -> AttemptOutcome {
    let detail = failures
        .iter()
        .map(|(label, o)| format!("{label}: {}", o.detail))
        .collect::<Vec<_>>()
        .join(", ");

    match failures.into_iter().next() {
        Some((_, mut first)) => {
            first.detail = detail;
            first
        }
        None => AttemptOutcome::no_usable_channel(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    #[test]
    fn test_aggregate_keeps_first_kind_and_joins_details() {
        let failures = vec![
            ("10.0.0.1:80".to_string(), AttemptOutcome::business("sold out")),
            ("10.0.0.2:80".to_string(), AttemptOutcome::transient("timeout")),
        ];
        let o = aggregate_failures(failures);
        assert!(!o.succeeded);
        assert_eq!(o.error_kind, ErrorKind::Business);
        assert_eq!(o.detail, "10.0.0.1:80: sold out, 10.0.0.2:80: timeout");
    }

    #[test]
    fn test_aggregate_of_nothing_is_permanent() {
        let o = aggregate_failures(Vec::new());
        assert_eq!(o.error_kind, ErrorKind::Permanent);
    }
}
