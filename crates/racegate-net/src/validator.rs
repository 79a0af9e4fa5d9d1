//! Channel validator that probes IP-echo services through the candidate.

use async_trait::async_trait;
use racegate_core::{ChannelCandidate, ChannelValidator, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{NetError, NetResult};

/// How many probe URLs a validation tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// First probe URL only.
    Fast,
    /// All probe URLs at once; the fastest success wins.
    Comprehensive,
    /// Fast, then comprehensive over the rest if the first probe fails.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    pub mode: ProbeMode,
    pub probe_urls: Vec<String>,
    /// Limit for one probe request (milliseconds).
    pub probe_timeout_ms: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            mode: ProbeMode::Auto,
            probe_urls: vec![
                "https://api.ipify.org?format=json".to_string(),
                "https://httpbin.org/ip".to_string(),
                "https://ipinfo.io/json".to_string(),
                "https://api.myip.com".to_string(),
            ],
            probe_timeout_ms: 4_000,
        }
    }
}

/// Result of one successful probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub url: String,
    pub latency: Duration,
    pub egress_ip: Option<String>,
}

/// Validates HTTP proxies by fetching IP-echo pages through them.
pub struct HttpProbeValidator {
    config: ValidatorConfig,
}

impl HttpProbeValidator {
    pub fn new(config: ValidatorConfig) -> NetResult<Self> {
        if config.probe_urls.is_empty() {
            return Err(NetError::Config(
                "validator.probe_urls must not be empty".into(),
            ));
        }
        Ok(Self { config })
    }

    fn client_for(&self, candidate: &ChannelCandidate) -> NetResult<reqwest::Client> {
        let proxy = reqwest::Proxy::all(format!("http://{}", candidate.address()))
            .map_err(|e| NetError::InvalidProxy(format!("{}: {e}", candidate.address())))?;
        Ok(reqwest::Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_millis(self.config.probe_timeout_ms))
            .build()?)
    }

    /// Run the configured probes; `Err` carries the last probe failure.
    pub async fn probe(&self, candidate: &ChannelCandidate) -> NetResult<Probe> {
        let client = self.client_for(candidate)?;
        let urls = &self.config.probe_urls;
        match self.config.mode {
            ProbeMode::Fast => probe_one(client, urls[0].clone()).await,
            ProbeMode::Comprehensive => probe_all(client, urls).await,
            ProbeMode::Auto => match probe_one(client.clone(), urls[0].clone()).await {
                Ok(probe) => Ok(probe),
                Err(e) if urls.len() == 1 => Err(e),
                Err(e) => {
                    debug!(channel = %candidate.address(), error = %e, "fast probe failed, trying the rest");
                    probe_all(client, &urls[1..]).await
                }
            },
        }
    }
}

#[async_trait]
impl ChannelValidator for HttpProbeValidator {
    async fn validate(&self, candidate: &ChannelCandidate) -> racegate_core::Result<Validation> {
        let started = Instant::now();
        match self.probe(candidate).await {
            Ok(probe) => {
                let validation = Validation::passed(probe.latency);
                Ok(match probe.egress_ip {
                    Some(ip) => validation.with_egress_ip(ip),
                    None => validation,
                })
            }
            Err(NetError::InvalidProxy(reason)) => Err(racegate_core::RaceError::Validation {
                channel: candidate.address(),
                reason,
            }),
            Err(e) => {
                debug!(channel = %candidate.address(), error = %e, "channel rejected");
                Ok(Validation::rejected(started.elapsed()))
            }
        }
    }
}

async fn probe_one(client: reqwest::Client, url: String) -> NetResult<Probe> {
    let started = Instant::now();
    let response = client.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(NetError::Status {
            status: status.as_u16(),
            url,
        });
    }
    let body = response.text().await?;
    Ok(Probe {
        latency: started.elapsed(),
        egress_ip: extract_egress_ip(&body),
        url,
    })
}

async fn probe_all(client: reqwest::Client, urls: &[String]) -> NetResult<Probe> {
    let mut join_set = JoinSet::new();
    for url in urls.iter().cloned() {
        join_set.spawn(probe_one(client.clone(), url));
    }

    let mut last_error = NetError::Http("no probe ran".into());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(probe)) => {
                join_set.abort_all();
                return Ok(probe);
            }
            Ok(Err(e)) => last_error = e,
            Err(e) => last_error = NetError::Http(format!("probe task failed: {e}")),
        }
    }
    Err(last_error)
}

/// Pull the caller's address out of an IP-echo response.
///
/// Understands `{"ip": ...}`, `{"origin": ...}` and bare-text bodies.
pub fn extract_egress_ip(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return ["ip", "origin"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string());
    }
    if !trimmed.is_empty() && trimmed.len() <= 64 && !trimmed.contains(char::is_whitespace) {
        return Some(trimmed.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ip_field() {
        assert_eq!(
            extract_egress_ip(r#"{"ip":"203.0.113.9"}"#).as_deref(),
            Some("203.0.113.9")
        );
    }

    #[test]
    fn test_extract_origin_field() {
        assert_eq!(
            extract_egress_ip("{\n  \"origin\": \"198.51.100.4\"\n}\n").as_deref(),
            Some("198.51.100.4")
        );
    }

    #[test]
    fn test_extract_plain_text() {
        assert_eq!(extract_egress_ip("192.0.2.1\n").as_deref(), Some("192.0.2.1"));
        assert_eq!(extract_egress_ip("<html>blocked page</html>"), None);
    }

    #[test]
    fn test_json_without_ip_is_none() {
        assert_eq!(extract_egress_ip(r#"{"country":"CN"}"#), None);
    }

    #[test]
    fn test_empty_probe_list_rejected() {
        let config = ValidatorConfig {
            probe_urls: Vec::new(),
            ..ValidatorConfig::default()
        };
        assert!(HttpProbeValidator::new(config).is_err());
    }

    #[test]
    fn test_mode_deserialises() {
        let config: ValidatorConfig =
            serde_json::from_str(r#"{"mode":"comprehensive"}"#).unwrap();
        assert_eq!(config.mode, ProbeMode::Comprehensive);
        assert_eq!(config.probe_urls.len(), 4);
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_rejected_not_error() {
        let validator = HttpProbeValidator::new(ValidatorConfig {
            mode: ProbeMode::Fast,
            probe_urls: vec!["http://127.0.0.1:9/ip".into()],
            probe_timeout_ms: 500,
        })
        .unwrap();
        let candidate = ChannelCandidate::new("127.0.0.1", 9);
        let v = validator.validate(&candidate).await.unwrap();
        assert!(!v.valid);
    }
}
