//! Success notifications posted to a webhook.

use async_trait::async_trait;
use racegate_core::{AttemptOutcome, Entity, Notifier, RaceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NetError, NetResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifierConfig {
    pub url: String,
    /// Bound on the whole webhook call (milliseconds).
    pub timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_ms: 10_000,
        }
    }
}

/// Webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn for_success(entity: &Entity, outcome: &AttemptOutcome) -> Self {
        let route = outcome
            .channel_used
            .as_ref()
            .map(|c| c.label())
            .unwrap_or_else(|| racegate_core::DIRECT_ROUTE.to_string());

        let mut body = format!(
            "entity: {}\nroute: {}\nelapsed: {}ms\ndetail: {}\ntime: {}",
            entity.display_name(),
            route,
            outcome.elapsed.as_millis(),
            outcome.detail,
            chrono::Utc::now().to_rfc3339(),
        );
        if let Some(response) = &outcome.response {
            body.push_str("\nresponse: ");
            body.push_str(&response.to_string());
        }

        Self {
            title: format!("{} acquired", entity.display_name()),
            body,
        }
    }
}

pub struct WebhookNotifier {
    config: NotifierConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: NotifierConfig) -> NetResult<Self> {
        if config.url.is_empty() {
            return Err(NetError::Config("notifier.url is required".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    pub async fn send(&self, notification: &Notification) -> NetResult<()> {
        let response = self
            .client
            .post(&self.config.url)
            .json(notification)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::Status {
                status: status.as_u16(),
                url: self.config.url.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn on_success(&self, entity: &Entity, outcome: &AttemptOutcome) -> racegate_core::Result<()> {
        self.send(&Notification::for_success(entity, outcome))
            .await
            .map_err(|e| RaceError::Notify(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_contents() {
        let entity = Entity::new("13800000000").with_label("alice");
        let outcome = AttemptOutcome::success("acquired").with_response(json!({"code": 0}));
        let n = Notification::for_success(&entity, &outcome);
        assert_eq!(n.title, "alice acquired");
        assert!(n.body.contains("route: direct"));
        assert!(n.body.contains(r#"response: {"code":0}"#));
    }

    #[test]
    fn test_missing_url_rejected() {
        assert!(WebhookNotifier::new(NotifierConfig::default()).is_err());
    }
}
