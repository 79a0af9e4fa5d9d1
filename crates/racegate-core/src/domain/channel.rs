//! Channels: alternate egress paths an attempt can be routed through.
//!
//! A [`ChannelCandidate`] comes from a [`crate::ChannelSource`], is checked by
//! a [`crate::ChannelValidator`], and becomes either a [`Channel::Valid`] or,
//! when the pool could not fill a slot, a [`Channel::Sentinel`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::entity::EntityKey;

/// Raw, unvalidated channel as supplied by a channel source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelCandidate {
    pub host: String,
    pub port: u16,

    /// Where the candidate came from (provider name, file, ...).
    #[serde(default)]
    pub source: String,
}

impl ChannelCandidate {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            source: String::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Result of validating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub latency: Duration,

    /// Address the target observed when routed through the channel.
    #[serde(default)]
    pub egress_ip: Option<String>,
}

impl Validation {
    pub fn passed(latency: Duration) -> Self {
        Self {
            valid: true,
            latency,
            egress_ip: None,
        }
    }

    pub fn rejected(latency: Duration) -> Self {
        Self {
            valid: false,
            latency,
            egress_ip: None,
        }
    }

    pub fn with_egress_ip(mut self, ip: impl Into<String>) -> Self {
        self.egress_ip = Some(ip.into());
        self
    }
}

/// Coarse latency classification of a validated channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyGrade {
    /// Under 1s.
    Excellent,
    /// Under 2s.
    Good,
    /// Under 3s.
    Acceptable,
    Slow,
}

impl LatencyGrade {
    pub fn from_latency(latency: Duration) -> Self {
        match latency.as_millis() {
            0..=999 => LatencyGrade::Excellent,
            1000..=1999 => LatencyGrade::Good,
            2000..=2999 => LatencyGrade::Acceptable,
            _ => LatencyGrade::Slow,
        }
    }
}

impl fmt::Display for LatencyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyGrade::Excellent => write!(f, "excellent"),
            LatencyGrade::Good => write!(f, "good"),
            LatencyGrade::Acceptable => write!(f, "acceptable"),
            LatencyGrade::Slow => write!(f, "slow"),
        }
    }
}

/// A channel that passed validation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidChannel {
    pub host: String,
    pub port: u16,
    pub source: String,
    pub latency: Duration,
    pub egress_ip: Option<String>,
    pub grade: LatencyGrade,
}

impl ValidChannel {
    /// Build from a candidate and its validation; `None` if it did not pass.
    pub fn from_validation(candidate: ChannelCandidate, validation: &Validation) -> Option<Self> {
        if !validation.valid {
            return None;
        }
        Some(Self {
            host: candidate.host,
            port: candidate.port,
            source: candidate.source,
            latency: validation.latency,
            egress_ip: validation.egress_ip.clone(),
            grade: LatencyGrade::from_latency(validation.latency),
        })
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A slot in an entity's channel list.
///
/// `Sentinel` stands for "no usable channel obtained" and is never dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    Valid(ValidChannel),
    Sentinel,
}

impl Channel {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Channel::Sentinel)
    }

    pub fn as_valid(&self) -> Option<&ValidChannel> {
        match self {
            Channel::Valid(c) => Some(c),
            Channel::Sentinel => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Channel::Valid(c) => c.address(),
            Channel::Sentinel => "sentinel".to_string(),
        }
    }
}

/// How an entity's attempts are routed for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "channels", rename_all = "snake_case")]
pub enum ChannelAssignment {
    /// No channel pool: one attempt per round over default routing.
    Direct,

    /// Channels primed for this entity, sentinels included.
    Pooled(Vec<Channel>),
}

impl ChannelAssignment {
    /// Validated channels in priority order.
    pub fn usable(&self) -> Vec<&ValidChannel> {
        match self {
            ChannelAssignment::Direct => Vec::new(),
            ChannelAssignment::Pooled(channels) => {
                channels.iter().filter_map(Channel::as_valid).collect()
            }
        }
    }

    /// Whether at least one attempt route exists.
    pub fn has_route(&self) -> bool {
        match self {
            ChannelAssignment::Direct => true,
            ChannelAssignment::Pooled(channels) => channels.iter().any(|c| !c.is_sentinel()),
        }
    }

    pub fn sentinel_count(&self) -> usize {
        match self {
            ChannelAssignment::Direct => 0,
            ChannelAssignment::Pooled(channels) => {
                channels.iter().filter(|c| c.is_sentinel()).count()
            }
        }
    }
}

/// Channel lists per entity, built once during priming.
pub type PoolAssignment = HashMap<EntityKey, Vec<Channel>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(host: &str, ms: u64) -> Channel {
        let candidate = ChannelCandidate::new(host, 8080);
        let v = Validation::passed(Duration::from_millis(ms));
        Channel::Valid(ValidChannel::from_validation(candidate, &v).unwrap())
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(
            LatencyGrade::from_latency(Duration::from_millis(999)),
            LatencyGrade::Excellent
        );
        assert_eq!(
            LatencyGrade::from_latency(Duration::from_millis(1000)),
            LatencyGrade::Good
        );
        assert_eq!(
            LatencyGrade::from_latency(Duration::from_millis(2500)),
            LatencyGrade::Acceptable
        );
        assert_eq!(
            LatencyGrade::from_latency(Duration::from_secs(7)),
            LatencyGrade::Slow
        );
    }

    #[test]
    fn test_rejected_validation_builds_nothing() {
        let candidate = ChannelCandidate::new("10.0.0.1", 3128);
        let v = Validation::rejected(Duration::from_millis(40));
        assert!(ValidChannel::from_validation(candidate, &v).is_none());
    }

    #[test]
    fn test_all_sentinel_assignment_has_no_route() {
        let a = ChannelAssignment::Pooled(vec![Channel::Sentinel, Channel::Sentinel]);
        assert!(!a.has_route());
        assert!(a.usable().is_empty());
        assert_eq!(a.sentinel_count(), 2);
    }

    #[test]
    fn test_mixed_assignment_filters_sentinels() {
        let a = ChannelAssignment::Pooled(vec![valid("10.0.0.1", 100), Channel::Sentinel]);
        assert!(a.has_route());
        let usable = a.usable();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].address(), "10.0.0.1:8080");
    }

    #[test]
    fn test_direct_assignment_always_routes() {
        assert!(ChannelAssignment::Direct.has_route());
        assert_eq!(ChannelAssignment::Direct.sentinel_count(), 0);
    }
}
