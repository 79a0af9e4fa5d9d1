//! Injectable collaborators consumed by the orchestration core.
//!
//! Implement these traits to plug in real proxy providers, HTTP executors
//! and push services, or the scripted fakes in [`crate::fakes`] for tests.

use async_trait::async_trait;

use crate::domain::{AttemptOutcome, ChannelCandidate, Entity, ValidChannel, Validation};
use crate::error::Result;

/// Supplies raw candidate channels.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// Fetch up to `count` candidates.
    ///
    /// Returning fewer (including none) is normal. An `Err` means a hard I/O
    /// failure; the pool treats it as a zero-candidate round.
    async fn fetch(&self, count: usize) -> Result<Vec<ChannelCandidate>>;
}

/// Tests a candidate channel for liveness and latency.
#[async_trait]
pub trait ChannelValidator: Send + Sync {
    async fn validate(&self, candidate: &ChannelCandidate) -> Result<Validation>;
}

/// Performs one acquisition attempt for one entity.
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    /// `channel == None` means default (local) routing.
    ///
    /// Business rejections are reported as `Ok` outcomes; `Err` is reserved
    /// for failures the executor could not classify and is treated as
    /// transient.
    async fn attempt(&self, entity: &Entity, channel: Option<&ValidChannel>)
        -> Result<AttemptOutcome>;
}

/// Told once per entity when it succeeds.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Bounding this call is the implementation's job; the core never
    /// retries or re-fires it.
    async fn on_success(&self, entity: &Entity, outcome: &AttemptOutcome) -> Result<()>;
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn on_success(&self, _entity: &Entity, _outcome: &AttemptOutcome) -> Result<()> {
        Ok(())
    }
}
