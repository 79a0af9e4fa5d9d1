//! Run configuration.
//!
//! Durations are carried as `*_ms` integers so config files stay plain JSON;
//! each struct exposes `Duration` accessors for the code that uses them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RaceError, Result};

/// Channel pool priming limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Fetch/validate rounds per entity before padding with sentinels.
    pub max_attempts: u32,
    /// Global cap on validation calls in flight across all entities.
    pub max_in_flight: usize,
    /// Wait after a round that produced no candidates (milliseconds).
    pub empty_backoff_ms: u64,
    /// Wait after a round that left the entity short (milliseconds).
    pub settle_delay_ms: u64,
    /// Limit for a single fetch or validation call (milliseconds).
    pub request_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_in_flight: 20,
            empty_backoff_ms: 500,
            settle_delay_ms: 300,
            request_timeout_ms: 8_000,
        }
    }
}

impl PoolConfig {
    pub fn empty_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_backoff_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Race dispatcher limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Most channels raced per attempt.
    pub max_fan_out: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_fan_out: 3 }
    }
}

/// Per-entity retry loop timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Fixed wait between rounds (milliseconds). No backoff.
    pub interval_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

impl LoopConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Hard limits for bounded runs. All `None` means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunBudget {
    /// Rounds each entity loop may run.
    pub max_rounds: Option<u32>,
    /// Wall time after the target instant before the run force-stops.
    pub max_duration_ms: Option<u64>,
}

impl RunBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn rounds(max_rounds: u32) -> Self {
        Self {
            max_rounds: Some(max_rounds),
            max_duration_ms: None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_rounds.is_some() || self.max_duration_ms.is_some()
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }
}

/// Whether repeated business rejections eventually end an entity's loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Consecutive `Business` failures after which the entity gives up.
    /// `None` keeps retrying for as long as the run lasts.
    pub max_consecutive_business: Option<u32>,
}

/// Operating presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// No channel pool, unbounded rounds: best-effort "keep trying".
    Direct,
    /// Three raced channels per entity, bounded to 50 rounds.
    Pooled,
}

impl RunMode {
    pub fn config(self) -> RunConfig {
        match self {
            RunMode::Direct => RunConfig {
                channels_per_entity: 0,
                entity_loop: LoopConfig { interval_ms: 200 },
                budget: RunBudget::unbounded(),
                ..RunConfig::default()
            },
            RunMode::Pooled => RunConfig {
                channels_per_entity: 3,
                entity_loop: LoopConfig { interval_ms: 200 },
                budget: RunBudget::rounds(50),
                ..RunConfig::default()
            },
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Direct => write!(f, "direct"),
            RunMode::Pooled => write!(f, "pooled"),
        }
    }
}

/// Everything an [`crate::OrchestrationRun`] needs besides its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
    #[serde(rename = "loop")]
    pub entity_loop: LoopConfig,
    pub budget: RunBudget,
    pub escalation: EscalationPolicy,
    /// How long before the target instant channel priming starts (milliseconds).
    pub lead_ms: u64,
    /// Channels primed per entity; 0 selects direct routing.
    pub channels_per_entity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            dispatch: DispatchConfig::default(),
            entity_loop: LoopConfig::default(),
            budget: RunBudget::default(),
            escalation: EscalationPolicy::default(),
            lead_ms: 180_000,
            channels_per_entity: 3,
        }
    }
}

impl RunConfig {
    pub fn lead(&self) -> Duration {
        Duration::from_millis(self.lead_ms)
    }

    /// Reject settings that would stall or hot-spin a run.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_attempts == 0 {
            return Err(RaceError::InvalidConfig(
                "pool.max_attempts must be at least 1".into(),
            ));
        }
        if self.pool.max_in_flight == 0 {
            return Err(RaceError::InvalidConfig(
                "pool.max_in_flight must be at least 1".into(),
            ));
        }
        if self.dispatch.max_fan_out == 0 {
            return Err(RaceError::InvalidConfig(
                "dispatch.max_fan_out must be at least 1".into(),
            ));
        }
        if self.entity_loop.interval_ms == 0 {
            return Err(RaceError::InvalidConfig(
                "loop.interval_ms must be positive".into(),
            ));
        }
        if self.budget.max_rounds == Some(0) {
            return Err(RaceError::InvalidConfig(
                "budget.max_rounds must be at least 1 when set".into(),
            ));
        }
        if self.escalation.max_consecutive_business == Some(0) {
            return Err(RaceError::InvalidConfig(
                "escalation.max_consecutive_business must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RunConfig::default().validate().is_ok());
        assert!(RunMode::Direct.config().validate().is_ok());
        assert!(RunMode::Pooled.config().validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let direct = RunMode::Direct.config();
        assert_eq!(direct.channels_per_entity, 0);
        assert!(!direct.budget.is_bounded());

        let pooled = RunMode::Pooled.config();
        assert_eq!(pooled.channels_per_entity, 3);
        assert_eq!(pooled.budget.max_rounds, Some(50));
        assert_eq!(pooled.entity_loop.interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_zero_fan_out_rejected() {
        let mut cfg = RunConfig::default();
        cfg.dispatch.max_fan_out = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_fan_out"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = RunConfig::default();
        cfg.entity_loop.interval_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{ "loop": { "interval_ms": 50 }, "channels_per_entity": 0 }"#)
                .unwrap();
        assert_eq!(cfg.entity_loop.interval_ms, 50);
        assert_eq!(cfg.channels_per_entity, 0);
        assert_eq!(cfg.pool.max_attempts, 10);
        assert_eq!(cfg.lead(), Duration::from_secs(180));
    }
}
