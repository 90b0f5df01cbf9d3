use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::NotificationsConfig;
use crate::models::AlertEvent;
use crate::plugins::traits::{NotificationResult, Notifier};
use crate::utils::error::AppError;

/// Posts a plain-text message plus the structured alert to a chat webhook.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    username: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>, username: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            username: username.into(),
        })
    }

    /// `None` when no webhook is configured.
    pub fn from_config(config: &NotificationsConfig) -> Result<Option<Self>, AppError> {
        config
            .webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.username.clone(), Duration::from_secs(config.timeout_secs)))
            .transpose()
    }

    fn create_payload(&self, alert: &AlertEvent) -> serde_json::Value {
        json!({
            "content": format!("🍵 {}", alert.summary()),
            "username": self.username,
            "alert": alert,
        })
    }

    fn error(&self, message: impl Into<String>) -> AppError {
        AppError::Notifier {
            notifier: self.name().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<NotificationResult, AppError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.create_payload(alert))
            .send()
            .await
            .map_err(|e| self.error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("webhook returned {}: {}", status, body.trim())));
        }

        tracing::info!(vendor = %alert.vendor_key, product = %alert.product_name, "Restock alert delivered via webhook");
        Ok(NotificationResult::delivered(Some(format!(
            "webhook-{}",
            alert.timestamp.timestamp_millis()
        ))))
    }
}
