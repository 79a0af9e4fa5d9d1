//! Global atomic counters for racegate runs.
//!
//! Counters are bumped silently at the call site. Call [`Metrics::flush`]
//! once at the end of a run to emit them as a single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    attempts_dispatched: AtomicU64,
    races_won: AtomicU64,
    races_lost: AtomicU64,
    channels_validated: AtomicU64,
    channels_rejected: AtomicU64,
    sentinels_padded: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub attempts_dispatched: u64,
    pub races_won: u64,
    pub races_lost: u64,
    pub channels_validated: u64,
    pub channels_rejected: u64,
    pub sentinels_padded: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            attempts_dispatched: AtomicU64::new(0),
            races_won: AtomicU64::new(0),
            races_lost: AtomicU64::new(0),
            channels_validated: AtomicU64::new(0),
            channels_rejected: AtomicU64::new(0),
            sentinels_padded: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
        }
    }

    /// Count `n` executor calls launched by one race.
    pub fn add_attempts(&self, n: u64) {
        self.attempts_dispatched.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "attempts_dispatched", n, "counter incremented");
    }

    pub fn inc_races_won(&self) {
        self.races_won.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "races_won", "counter incremented");
    }

    pub fn inc_races_lost(&self) {
        self.races_lost.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "races_lost", "counter incremented");
    }

    pub fn inc_channels_validated(&self) {
        self.channels_validated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "channels_validated", "counter incremented");
    }

    pub fn inc_channels_rejected(&self) {
        self.channels_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "channels_rejected", "counter incremented");
    }

    pub fn add_sentinels(&self, n: u64) {
        self.sentinels_padded.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "sentinels_padded", n, "counter incremented");
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_sent", "counter incremented");
    }

    pub fn inc_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_failed", "counter incremented");
    }

    /// Read every counter at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts_dispatched: self.attempts_dispatched.load(Ordering::Relaxed),
            races_won: self.races_won.load(Ordering::Relaxed),
            races_lost: self.races_lost.load(Ordering::Relaxed),
            channels_validated: self.channels_validated.load(Ordering::Relaxed),
            channels_rejected: self.channels_rejected.load(Ordering::Relaxed),
            sentinels_padded: self.sentinels_padded.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            attempts_dispatched = s.attempts_dispatched,
            races_won = s.races_won,
            races_lost = s.races_lost,
            channels_validated = s.channels_validated,
            channels_rejected = s.channels_rejected,
            sentinels_padded = s.sentinels_padded,
            notifications_sent = s.notifications_sent,
            notifications_failed = s.notifications_failed,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.attempts_dispatched.store(0, Ordering::Relaxed);
        self.races_won.store(0, Ordering::Relaxed);
        self.races_lost.store(0, Ordering::Relaxed);
        self.channels_validated.store(0, Ordering::Relaxed);
        self.channels_rejected.store(0, Ordering::Relaxed);
        self.sentinels_padded.store(0, Ordering::Relaxed);
        self.notifications_sent.store(0, Ordering::Relaxed);
        self.notifications_failed.store(0, Ordering::Relaxed);
    }
}
