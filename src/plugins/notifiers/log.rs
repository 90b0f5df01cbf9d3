use async_trait::async_trait;

use crate::models::AlertEvent;
use crate::plugins::traits::{NotificationResult, Notifier};
use crate::utils::error::AppError;

/// Writes alerts to the log. Always registered, so a restock is never silent.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<NotificationResult, AppError> {
        tracing::info!(
            vendor = %alert.vendor_key,
            product = %alert.product_name,
            supplier = %alert.supplier_name,
            price = alert.price.as_deref().unwrap_or("Not found"),
            url = %alert.url,
            "RESTOCK: {}",
            alert.summary()
        );
        Ok(NotificationResult::delivered(None))
    }
}
