//! Time gates: hold the pipeline until a wall-clock instant.
//!
//! The gate sleeps in ticks of at most one second and recomputes the
//! remaining time from the clock on every tick, so oversleeping one tick
//! never accumulates into drift.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clock::{sleep_unless_cancelled, until, Clock, SystemClock};

/// Receives countdown ticks from a [`TimeGate`].
pub trait CountdownObserver: Send + Sync {
    /// Called once per tick with whole seconds remaining (rounded up).
    fn on_tick(&self, label: &str, remaining_secs: u64);

    fn on_reached(&self, _label: &str) {}
}

/// Countdown rendered through `tracing`.
///
/// Logs at `info` on minute boundaries and during the final ten seconds,
/// `debug` otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCountdown;

impl CountdownObserver for LogCountdown {
    fn on_tick(&self, label: &str, remaining_secs: u64) {
        if remaining_secs <= 10 || remaining_secs % 60 == 0 {
            tracing::info!(gate = %label, remaining_secs, "{}", format_countdown(remaining_secs));
        } else {
            tracing::debug!(gate = %label, remaining_secs, "countdown");
        }
    }

    fn on_reached(&self, label: &str) {
        tracing::info!(gate = %label, "gate reached");
    }
}

/// `HH:MM:SS` rendering of a countdown.
pub fn format_countdown(remaining_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        remaining_secs / 3600,
        (remaining_secs % 3600) / 60,
        remaining_secs % 60
    )
}

/// How an [`TimeGate::await_instant`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Reached,
    Cancelled,
}

/// Blocks until a target instant, reporting a live countdown.
#[derive(Clone)]
pub struct TimeGate {
    clock: Arc<dyn Clock>,
    observer: Arc<dyn CountdownObserver>,
    tick: Duration,
}

impl Default for TimeGate {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(LogCountdown))
    }
}

impl TimeGate {
    pub fn new(clock: Arc<dyn Clock>, observer: Arc<dyn CountdownObserver>) -> Self {
        Self {
            clock,
            observer,
            tick: Duration::from_secs(1),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Wait until `now >= target` or `cancel` fires.
    ///
    /// A target already in the past returns [`GateOutcome::Reached`] at once.
    pub async fn await_instant(
        &self,
        target: DateTime<Utc>,
        label: &str,
        cancel: &CancellationToken,
    ) -> GateOutcome {
        loop {
            if cancel.is_cancelled() {
                return GateOutcome::Cancelled;
            }

            let remaining = match until(self.clock.as_ref(), target).to_std() {
                Ok(d) if !d.is_zero() => d,
                _ => {
                    self.observer.on_reached(label);
                    return GateOutcome::Reached;
                }
            };

            self.observer.on_tick(label, ceil_secs(remaining));

            if !sleep_unless_cancelled(remaining.min(self.tick), cancel).await {
                return GateOutcome::Cancelled;
            }
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(0), "00:00:00");
        assert_eq!(format_countdown(61), "00:01:01");
        assert_eq!(format_countdown(3 * 3600 + 5), "03:00:05");
    }

    #[test]
    fn test_ceil_secs_rounds_up_fractions() {
        assert_eq!(ceil_secs(Duration::from_millis(4001)), 5);
        assert_eq!(ceil_secs(Duration::from_secs(4)), 4);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
    }
}
