//! Channel pool: acquire and validate channels for every entity up front.
//!
//! Each entity is primed in its own task. A round fetches the missing
//! number of candidates, validates them concurrently under a global permit
//! limit, and keeps the ones that pass. After `max_attempts` rounds the
//! entity's list is padded with [`Channel::Sentinel`] so every entity gets
//! exactly `per_entity` slots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::sleep_unless_cancelled;
use crate::collaborators::{ChannelSource, ChannelValidator};
use crate::config::PoolConfig;
use crate::domain::{Channel, ChannelCandidate, Entity, EntityKey, PoolAssignment, ValidChannel};
use crate::metrics::METRICS;

/// Primes per-entity channel lists from a source and a validator.
///
/// Cheap to clone; clones share the validation permit pool.
#[derive(Clone)]
pub struct ChannelPool {
    source: Arc<dyn ChannelSource>,
    validator: Arc<dyn ChannelValidator>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
}

impl ChannelPool {
    pub fn new(
        source: Arc<dyn ChannelSource>,
        validator: Arc<dyn ChannelValidator>,
        config: PoolConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            source,
            validator,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build `per_entity` channel slots for every entity, concurrently.
    ///
    /// Never fails: source and validator errors only cost retry rounds, and
    /// a panicked priming task leaves its entity with sentinels. Returns an
    /// empty map when `per_entity == 0`.
    pub async fn prime(
        &self,
        entities: &[Entity],
        per_entity: usize,
        cancel: &CancellationToken,
    ) -> PoolAssignment {
        if per_entity == 0 {
            return HashMap::new();
        }

        let keys: Vec<EntityKey> = entities.iter().map(|e| e.key.clone()).collect();
        let mut join_set = JoinSet::new();
        for (idx, key) in keys.iter().cloned().enumerate() {
            let pool = self.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let channels = pool.prime_entity(&key, per_entity, &cancel).await;
                (idx, channels)
            });
        }

        let mut slots: Vec<Option<Vec<Channel>>> = vec![None; keys.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, channels)) => slots[idx] = Some(channels),
                Err(e) => warn!(error = %e, "channel priming task failed"),
            }
        }

        keys.into_iter()
            .zip(slots)
            .map(|(key, slot)| {
                let channels = slot.unwrap_or_else(|| pad_with_sentinels(Vec::new(), per_entity));
                (key, channels)
            })
            .collect()
    }

    /// Prime one entity. Always returns exactly `per_entity` slots.
    pub async fn prime_entity(
        &self,
        key: &EntityKey,
        per_entity: usize,
        cancel: &CancellationToken,
    ) -> Vec<Channel> {
        let mut valid: Vec<ValidChannel> = Vec::with_capacity(per_entity);
        let mut round = 0;

        while valid.len() < per_entity && round < self.config.max_attempts {
            if cancel.is_cancelled() {
                debug!(entity = %key, round, "priming cancelled");
                break;
            }
            round += 1;
            let needed = per_entity - valid.len();

            let candidates = self.fetch_round(needed).await;
            if candidates.is_empty() {
                debug!(entity = %key, round, "no candidates, backing off");
                if !sleep_unless_cancelled(self.config.empty_backoff(), cancel).await {
                    break;
                }
                continue;
            }

            let mut fresh = self.validate_all(candidates).await;
            fresh.sort_by_key(|c| c.latency);
            fresh.truncate(needed);
            debug!(entity = %key, round, accepted = fresh.len(), needed, "validation round done");
            valid.extend(fresh);

            if valid.len() < per_entity
                && !sleep_unless_cancelled(self.config.settle_delay(), cancel).await
            {
                break;
            }
        }

        valid.sort_by_key(|c| c.latency);
        if valid.len() < per_entity {
            info!(
                entity = %key,
                valid = valid.len(),
                wanted = per_entity,
                rounds = round,
                "entity short of channels, padding with sentinels"
            );
        }
        pad_with_sentinels(valid, per_entity)
    }

    /// One bounded fetch. Errors and timeouts count as an empty round.
    async fn fetch_round(&self, needed: usize) -> Vec<ChannelCandidate> {
        let limit = self.config.request_timeout();
        match timeout(limit, self.source.fetch(needed)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!(error = %e, needed, "channel source failed");
                Vec::new()
            }
            Err(_) => {
                warn!(limit_ms = self.config.request_timeout_ms, "channel fetch timed out");
                Vec::new()
            }
        }
    }

    /// Validate every candidate concurrently, holding one global permit each.
    async fn validate_all(&self, candidates: Vec<ChannelCandidate>) -> Vec<ValidChannel> {
        let limit = self.config.request_timeout();
        let mut join_set = JoinSet::new();
        for candidate in candidates {
            let validator = Arc::clone(&self.validator);
            let permits = Arc::clone(&self.permits);
            join_set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let address = candidate.address();
                match timeout(limit, validator.validate(&candidate)).await {
                    Ok(Ok(validation)) => ValidChannel::from_validation(candidate, &validation),
                    Ok(Err(e)) => {
                        debug!(channel = %address, error = %e, "validation error");
                        None
                    }
                    Err(_) => {
                        debug!(channel = %address, "validation timed out");
                        None
                    }
                }
            });
        }

        let mut accepted = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(channel)) => {
                    METRICS.inc_channels_validated();
                    accepted.push(channel);
                }
                Ok(None) => METRICS.inc_channels_rejected(),
                Err(e) => {
                    METRICS.inc_channels_rejected();
                    warn!(error = %e, "validation task failed");
                }
            }
        }
        accepted
    }
}

/// Wrap `valid` and fill up to `per_entity` slots with sentinels.
pub fn pad_with_sentinels(valid: Vec<ValidChannel>, per_entity: usize) -> Vec<Channel> {
    let mut channels: Vec<Channel> = valid
        .into_iter()
        .take(per_entity)
        .map(Channel::Valid)
        .collect();
    let missing = per_entity - channels.len();
    if missing > 0 {
        METRICS.add_sentinels(missing as u64);
        channels.extend(std::iter::repeat(Channel::Sentinel).take(missing));
    }
    channels
}
