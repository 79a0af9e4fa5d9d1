//! Integration tests for ChannelPool priming with fake sources and validators.

use racegate_core::fakes::{FakeSource, FakeValidator, SourceStep};
use racegate_core::{Channel, ChannelCandidate, ChannelPool, Entity, EntityKey, PoolConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn entities(n: usize) -> Vec<Entity> {
    (0..n).map(|i| Entity::new(format!("e{i}"))).collect()
}

fn pool(source: &Arc<FakeSource>, validator: &Arc<FakeValidator>, config: PoolConfig) -> ChannelPool {
    ChannelPool::new(source.clone(), validator.clone(), config)
}

fn valid_count(channels: &[Channel]) -> usize {
    channels.iter().filter(|c| !c.is_sentinel()).count()
}

/// Test: every entity gets exactly `per_entity` validated channels
#[tokio::test(start_paused = true)]
async fn test_full_priming() {
    let source = Arc::new(FakeSource::generating());
    let validator = Arc::new(FakeValidator::accepting());
    let pool = pool(&source, &validator, PoolConfig::default());

    let assignment = pool.prime(&entities(4), 3, &CancellationToken::new()).await;

    assert_eq!(assignment.len(), 4);
    let mut hosts = HashSet::new();
    for channels in assignment.values() {
        assert_eq!(channels.len(), 3);
        assert_eq!(valid_count(channels), 3);
        for c in channels {
            hosts.insert(c.label());
        }
    }
    assert_eq!(hosts.len(), 12, "channels are never shared across entities");
}

/// Test: a validator that rejects everything yields all sentinels after max_attempts
#[tokio::test(start_paused = true)]
async fn test_exhausted_entity_is_all_sentinel() {
    let source = Arc::new(FakeSource::generating());
    let validator = Arc::new(FakeValidator::rejecting_all());
    let pool = pool(&source, &validator, PoolConfig::default());

    let assignment = pool.prime(&entities(1), 3, &CancellationToken::new()).await;

    let channels = &assignment[&EntityKey::new("e0")];
    assert_eq!(channels.len(), 3);
    assert!(channels.iter().all(Channel::is_sentinel));
    assert_eq!(source.calls(), 10);
    assert_eq!(validator.calls(), 30);
}

/// Test: a short entity keeps its valid channels, fastest first, then sentinels
#[tokio::test(start_paused = true)]
async fn test_partial_priming_pads_after_valid() {
    let batch = vec![
        ChannelCandidate::new("10.1.0.1", 3128),
        ChannelCandidate::new("10.1.0.2", 3128),
    ];
    let source = Arc::new(FakeSource::empty().then(SourceStep::Batch(batch)));
    let validator = Arc::new(
        FakeValidator::accepting()
            .with_latency("10.1.0.1", Duration::from_millis(900))
            .with_latency("10.1.0.2", Duration::from_millis(120)),
    );
    let pool = pool(&source, &validator, PoolConfig::default());

    let channels = pool
        .prime_entity(&EntityKey::new("e0"), 3, &CancellationToken::new())
        .await;

    assert_eq!(channels.len(), 3);
    assert_eq!(channels[0].label(), "10.1.0.2:3128");
    assert_eq!(channels[1].label(), "10.1.0.1:3128");
    assert!(channels[2].is_sentinel());
}

/// Test: each round asks only for the channels still missing
#[tokio::test(start_paused = true)]
async fn test_requests_only_missing_count() {
    let source = Arc::new(
        FakeSource::generating().then(SourceStep::Batch(vec![ChannelCandidate::new("10.2.0.1", 80)])),
    );
    let validator = Arc::new(FakeValidator::accepting());
    let pool = pool(&source, &validator, PoolConfig::default());

    let channels = pool
        .prime_entity(&EntityKey::new("e0"), 3, &CancellationToken::new())
        .await;

    assert_eq!(valid_count(&channels), 3);
    assert_eq!(source.requested(), vec![3, 2]);
}

/// Test: empty rounds back off before retrying
#[tokio::test(start_paused = true)]
async fn test_empty_rounds_back_off() {
    let source = Arc::new(FakeSource::empty());
    let validator = Arc::new(FakeValidator::accepting());
    let config = PoolConfig {
        max_attempts: 4,
        ..PoolConfig::default()
    };
    let pool = pool(&source, &validator, config);

    let started = Instant::now();
    let channels = pool
        .prime_entity(&EntityKey::new("e0"), 2, &CancellationToken::new())
        .await;

    assert!(channels.iter().all(Channel::is_sentinel));
    assert_eq!(source.calls(), 4);
    assert!(started.elapsed() >= Duration::from_millis(4 * 500));
    assert_eq!(validator.calls(), 0);
}

/// Test: source errors and validator errors only cost retries
#[tokio::test(start_paused = true)]
async fn test_collaborator_errors_are_swallowed() {
    let source = Arc::new(
        FakeSource::generating()
            .then(SourceStep::Fail)
            .then(SourceStep::Batch(vec![ChannelCandidate::new("10.9.9.9", 80)])),
    );
    let validator = Arc::new(FakeValidator::accepting().error_on("10.9.9.9"));
    let pool = pool(&source, &validator, PoolConfig::default());

    let assignment = pool.prime(&entities(1), 2, &CancellationToken::new()).await;

    let channels = &assignment[&EntityKey::new("e0")];
    assert_eq!(valid_count(channels), 2);
    assert!(channels.iter().all(|c| c.label() != "10.9.9.9:80"));
}

/// Test: a hanging source is cut off by the request timeout
#[tokio::test(start_paused = true)]
async fn test_hanging_fetch_times_out() {
    let source = Arc::new(FakeSource::generating().then(SourceStep::Hang));
    let validator = Arc::new(FakeValidator::accepting());
    let config = PoolConfig {
        request_timeout_ms: 1_000,
        ..PoolConfig::default()
    };
    let pool = pool(&source, &validator, config);

    let started = Instant::now();
    let channels = pool
        .prime_entity(&EntityKey::new("e0"), 3, &CancellationToken::new())
        .await;

    assert_eq!(valid_count(&channels), 3);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(source.calls(), 2);
}

/// Test: validation concurrency never exceeds the global permit count
#[tokio::test(start_paused = true)]
async fn test_validation_concurrency_is_bounded() {
    let source = Arc::new(FakeSource::generating());
    let validator = Arc::new(FakeValidator::accepting().with_delay(Duration::from_millis(100)));
    let config = PoolConfig {
        max_in_flight: 4,
        ..PoolConfig::default()
    };
    let pool = pool(&source, &validator, config);

    let assignment = pool.prime(&entities(6), 3, &CancellationToken::new()).await;

    assert!(assignment.values().all(|c| valid_count(c) == 3));
    assert_eq!(validator.calls(), 18);
    assert!(validator.max_in_flight() <= 4);
    assert!(validator.max_in_flight() >= 2);
}

/// Test: one entity's slow priming does not hold up another
#[tokio::test(start_paused = true)]
async fn test_entities_primed_concurrently() {
    let source = Arc::new(FakeSource::generating());
    let validator = Arc::new(FakeValidator::accepting().with_delay(Duration::from_millis(400)));
    let pool = pool(&source, &validator, PoolConfig::default());

    let started = Instant::now();
    pool.prime(&entities(5), 3, &CancellationToken::new()).await;

    // Sequential priming would take at least 5 * 400ms.
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

/// Test: zero channels per entity skips the source entirely
#[tokio::test]
async fn test_zero_per_entity_skips_priming() {
    let source = Arc::new(FakeSource::generating());
    let validator = Arc::new(FakeValidator::accepting());
    let pool = pool(&source, &validator, PoolConfig::default());

    let assignment = pool.prime(&entities(3), 0, &CancellationToken::new()).await;

    assert!(assignment.is_empty());
    assert_eq!(source.calls(), 0);
}

/// Test: a cancelled run primes nothing and still pads every entity
#[tokio::test]
async fn test_cancelled_priming_pads_everything() {
    let source = Arc::new(FakeSource::generating());
    let validator = Arc::new(FakeValidator::accepting());
    let pool = pool(&source, &validator, PoolConfig::default());
    let token = CancellationToken::new();
    token.cancel();

    let assignment = pool.prime(&entities(2), 3, &token).await;

    assert_eq!(assignment.len(), 2);
    for channels in assignment.values() {
        assert_eq!(channels.len(), 3);
        assert!(channels.iter().all(Channel::is_sentinel));
    }
    assert_eq!(source.calls(), 0);
}
