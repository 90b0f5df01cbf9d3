use async_trait::async_trait;
use std::sync::Arc;

use super::notifiers::{LogNotifier, WebhookNotifier};
use super::traits::{NotificationResult, Notifier};
use crate::config::NotificationsConfig;
use crate::models::AlertEvent;
use crate::utils::error::AppError;

/// Fans each alert out to every registered notifier.
#[derive(Clone, Default)]
pub struct NotifierManager {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log notifier always; webhook when one is configured.
    pub fn from_config(config: &NotificationsConfig) -> Result<Self, AppError> {
        let mut manager = Self::new();
        manager.register(Arc::new(LogNotifier::new()));
        if let Some(webhook) = WebhookNotifier::from_config(config)? {
            manager.register(Arc::new(webhook));
        }
        Ok(manager)
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        tracing::debug!(notifier = notifier.name(), "Registered notifier");
        self.notifiers.push(notifier);
    }

    pub fn names(&self) -> Vec<String> {
        self.notifiers.iter().map(|n| n.name().to_string()).collect()
    }
}

#[async_trait]
impl Notifier for NotifierManager {
    fn name(&self) -> &str {
        "all"
    }

    /// Succeeds if at least one notifier delivered; every failure is logged.
    async fn deliver(&self, alert: &AlertEvent) -> Result<NotificationResult, AppError> {
        let mut delivered = None;
        let mut errors = Vec::new();

        for notifier in &self.notifiers {
            match notifier.deliver(alert).await {
                Ok(result) if result.success => {
                    delivered.get_or_insert(result);
                }
                Ok(result) => {
                    let message = result.error.unwrap_or_else(|| "delivery failed".to_string());
                    tracing::warn!(notifier = notifier.name(), error = %message, "Notifier reported failure");
                    errors.push(format!("{}: {}", notifier.name(), message));
                }
                Err(e) => {
                    tracing::warn!(notifier = notifier.name(), error = %e, "Notifier failed");
                    errors.push(e.to_string());
                }
            }
        }

        match delivered {
            Some(result) => Ok(result),
            None if self.notifiers.is_empty() => Err(AppError::Notifier {
                notifier: self.name().to_string(),
                message: "no notifiers registered".to_string(),
            }),
            None => Err(AppError::Notifier {
                notifier: self.name().to_string(),
                message: errors.join("; "),
            }),
        }
    }
}
