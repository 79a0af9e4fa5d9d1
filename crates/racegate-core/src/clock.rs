//! Wall-clock sources and cancellable sleeps.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Source of the current wall-clock instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that advances with tokio's clock from a fixed anchor.
///
/// Under `tokio::time::pause()` this clock only moves when the runtime's
/// virtual time does, which makes time-gate tests deterministic.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }

    /// Anchor at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        let delta = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor + delta
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
///
/// Returns `true` if the full duration elapsed, `false` on cancellation.
pub async fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;

        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Signed time from `now` until `target` (negative when `target` is past).
pub fn until(clock: &dyn Clock, target: DateTime<Utc>) -> chrono::Duration {
    target - clock.now()
}
