//! Attempt executor sending a configured HTTP request per entity.
//!
//! The request shape comes from configuration plus each entity's `params`
//! (`url`, `headers`, `body`); the verdict comes from a JSON pointer into
//! the response body.

use async_trait::async_trait;
use racegate_core::{AttemptExecutor, AttemptOutcome, Entity, ValidChannel, DIRECT_ROUTE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{NetError, NetResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Target endpoint; an entity's `params.url` overrides it.
    pub url: String,
    pub method: String,
    pub timeout_ms: u64,
    /// Headers sent with every request, before entity headers.
    pub headers: BTreeMap<String, String>,
    /// JSON pointer to the field that decides success.
    pub success_pointer: String,
    /// Value the success field must equal.
    pub success_value: Value,
    /// JSON pointer to the rejection text; `/message` is the fallback.
    pub reason_pointer: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_string(),
            timeout_ms: 5_000,
            headers: BTreeMap::new(),
            success_pointer: "/data/tips".to_string(),
            success_value: Value::String(String::new()),
            reason_pointer: Some("/data/tips".to_string()),
        }
    }
}

/// Sends one request per attempt, through the channel's proxy when given.
pub struct HttpAttemptExecutor {
    config: ExecutorConfig,
    method: reqwest::Method,
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpAttemptExecutor {
    pub fn new(config: ExecutorConfig) -> NetResult<Self> {
        let method = reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| NetError::Config(format!("unknown HTTP method {}", config.method)))?;
        let direct = Self::builder(&config).build()?;
        Ok(Self {
            config,
            method,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn builder(config: &ExecutorConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(concat!("racegate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
    }

    /// One client per route, built on first use.
    fn client_for(&self, channel: Option<&ValidChannel>) -> NetResult<reqwest::Client> {
        let Some(channel) = channel else {
            return Ok(self.direct.clone());
        };
        let address = channel.address();
        let mut cache = self
            .proxied
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = cache.get(&address) {
            return Ok(client.clone());
        }
        let proxy = reqwest::Proxy::all(format!("http://{address}"))
            .map_err(|e| NetError::InvalidProxy(format!("{address}: {e}")))?;
        let client = Self::builder(&self.config).proxy(proxy).build()?;
        cache.insert(address, client.clone());
        Ok(client)
    }

    fn request(&self, client: &reqwest::Client, entity: &Entity) -> NetResult<reqwest::RequestBuilder> {
        let url = entity
            .params
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(self.config.url.as_str());
        if url.is_empty() {
            return Err(NetError::Config(format!(
                "no target url for entity {}",
                entity.key
            )));
        }

        let mut request = client.request(self.method.clone(), url);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(Value::Object(headers)) = entity.params.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        if let Some(body) = entity.params.get("body") {
            request = request.json(body);
        }
        Ok(request)
    }
}

#[async_trait]
impl AttemptExecutor for HttpAttemptExecutor {
    async fn attempt(
        &self,
        entity: &Entity,
        channel: Option<&ValidChannel>,
    ) -> racegate_core::Result<AttemptOutcome> {
        let route = channel
            .map(ValidChannel::address)
            .unwrap_or_else(|| DIRECT_ROUTE.to_string());

        let request = match self
            .client_for(channel)
            .and_then(|client| self.request(&client, entity))
        {
            Ok(request) => request,
            Err(e) => return Ok(AttemptOutcome::permanent(e.to_string())),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(entity = %entity.key, route = %route, error = %e, "request failed");
                return Ok(AttemptOutcome::transient(transport_detail(&e)));
            }
        };

        let status = response.status().as_u16();
        if let Some(outcome) = classify_status(status) {
            return Ok(outcome);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(AttemptOutcome::transient(transport_detail(&e))),
        };
        trace!(entity = %entity.key, route = %route, body = %body, "response body");

        Ok(match serde_json::from_str::<Value>(&body) {
            Ok(json) => classify_body(json, &self.config),
            Err(_) => AttemptOutcome::business("response is not JSON"),
        })
    }
}

fn transport_detail(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connect failed: {e}")
    } else {
        e.to_string()
    }
}

/// Verdict from the status line alone; `None` for 2xx.
///
/// 429 and 5xx are transient; any other non-2xx is a business rejection.
pub fn classify_status(status: u16) -> Option<AttemptOutcome> {
    match status {
        200..=299 => None,
        429 => Some(AttemptOutcome::transient("HTTP 429 rate limited")),
        500..=599 => Some(AttemptOutcome::transient(format!("HTTP {status}"))),
        _ => Some(AttemptOutcome::business(format!("HTTP {status}"))),
    }
}

/// Verdict from a 2xx JSON body.
pub fn classify_body(json: Value, config: &ExecutorConfig) -> AttemptOutcome {
    if json.pointer(&config.success_pointer) == Some(&config.success_value) {
        return AttemptOutcome::success("acquired").with_response(json);
    }

    let reason = config
        .reason_pointer
        .as_deref()
        .and_then(|p| json.pointer(p))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| json.pointer("/message").and_then(Value::as_str))
        .unwrap_or("rejected")
        .to_string();
    AttemptOutcome::business(reason).with_response(json)
}
