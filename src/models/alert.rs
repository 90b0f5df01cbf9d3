use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::Leaf;

/// A restock, handed to the notifier exactly once per upward transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub vendor_key: String,
    pub vendor_display_name: String,
    pub product_name: String,
    pub supplier_name: String,
    pub price: Option<String>,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn for_leaf(leaf: &Leaf, price: Option<String>) -> Self {
        Self {
            vendor_key: leaf.vendor_key.clone(),
            vendor_display_name: leaf.vendor_name.clone(),
            product_name: leaf.product.clone(),
            supplier_name: leaf.supplier.clone(),
            price,
            url: leaf.url.clone(),
            timestamp: Utc::now(),
        }
    }

    /// One-line plain-text rendering used by the webhook and log notifiers.
    pub fn summary(&self) -> String {
        format!(
            "{} is back in stock at {} ({}) - price: {} - {}",
            self.product_name,
            self.supplier_name,
            self.vendor_display_name,
            self.price.as_deref().unwrap_or("Not found"),
            self.url
        )
    }
}
