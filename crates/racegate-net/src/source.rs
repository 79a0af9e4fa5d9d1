//! Channel source backed by an HTTP proxy provider.

use async_trait::async_trait;
use racegate_core::{ChannelCandidate, ChannelSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{NetError, NetResult};

/// Provider endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Provider URL; `{count}` is replaced with the requested count.
    pub url: String,
    /// Name stamped on every candidate.
    pub name: String,
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: "provider".to_string(),
            timeout_ms: 8_000,
        }
    }
}

/// Fetches candidates from a provider that lists proxies over HTTP.
pub struct HttpChannelSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl HttpChannelSource {
    pub fn new(config: SourceConfig) -> NetResult<Self> {
        if config.url.is_empty() {
            return Err(NetError::Config("source.url is required".into()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("racegate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn url_for(&self, count: usize) -> String {
        self.config.url.replace("{count}", &count.to_string())
    }

    async fn fetch_body(&self, count: usize) -> NetResult<String> {
        let url = self.url_for(count);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ChannelSource for HttpChannelSource {
    async fn fetch(&self, count: usize) -> racegate_core::Result<Vec<ChannelCandidate>> {
        let body = self
            .fetch_body(count)
            .await
            .map_err(NetError::into_source_error)?;
        let candidates =
            parse_candidates(&body, &self.config.name).map_err(NetError::into_source_error)?;
        debug!(requested = count, received = candidates.len(), "provider answered");
        Ok(candidates)
    }
}

/// Parse a provider response.
///
/// Accepts `host:port` lines, a JSON array, or a JSON object whose `data`
/// or `list` field is an array. Array items may be `"host:port"` strings or
/// objects with `host`/`server`/`ip` and `port`. Malformed items are skipped.
pub fn parse_candidates(body: &str, source: &str) -> NetResult<Vec<ChannelCandidate>> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)?;
        let items = match &value {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("data").or_else(|| map.get("list")) {
                Some(Value::Array(items)) => items,
                _ => return Err(NetError::Parse("no `data` or `list` array".into())),
            },
            _ => return Err(NetError::Parse("expected array or object".into())),
        };
        return Ok(items
            .iter()
            .filter_map(candidate_from_value)
            .map(|c| c.with_source(source))
            .collect());
    }

    Ok(trimmed
        .lines()
        .filter_map(parse_host_port)
        .map(|c| c.with_source(source))
        .collect())
}

fn candidate_from_value(item: &Value) -> Option<ChannelCandidate> {
    match item {
        Value::String(s) => parse_host_port(s),
        Value::Object(map) => {
            let host = ["host", "server", "ip"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))?;
            let port = match map.get("port")? {
                Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            Some(ChannelCandidate::new(host.trim(), port))
        }
        _ => None,
    }
}

fn parse_host_port(line: &str) -> Option<ChannelCandidate> {
    let line = line.trim();
    let (host, port) = line.rsplit_once(':')?;
    let port: u16 = port.trim().parse().ok()?;
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    Some(ChannelCandidate::new(host, port))
}
