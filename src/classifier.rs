//! Turns scraped page signals into a stock status and a price.
//!
//! Pure: the same [`FetchResult`] always classifies the same way.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{ClassificationResult, FetchResult, StockStatus};

/// Any of these means unavailable, even when an in-stock phrase is also present.
pub const OUT_OF_STOCK_PHRASES: &[&str] = &[
    "sold out",
    "out of stock",
    "unavailable",
    "notify when available",
    "back order",
    "pre-order",
    "完売",
    "品切れ",
    "在庫切れ",
];

pub const IN_STOCK_PHRASES: &[&str] = &[
    "add to cart",
    "add to bag",
    "buy now",
    "in stock",
    "available",
    "purchase",
];

static PRICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\$£€¥](?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{2})?").expect("valid price regex")
});

pub fn classify(result: &FetchResult) -> ClassificationResult {
    ClassificationResult {
        stock_status: infer_stock_status(&result.candidate_action_labels, &result.candidate_stock_labels),
        price: extract_price(&result.candidate_price_labels),
    }
}

pub fn infer_stock_status(action_labels: &[String], stock_labels: &[String]) -> StockStatus {
    let blob = action_labels
        .iter()
        .chain(stock_labels)
        .map(|label| label.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    if OUT_OF_STOCK_PHRASES.iter().any(|phrase| blob.contains(phrase)) {
        StockStatus::OutOfStock
    } else if IN_STOCK_PHRASES.iter().any(|phrase| blob.contains(phrase)) {
        StockStatus::InStock
    } else {
        StockStatus::Unknown
    }
}

/// First currency amount found in the labels; otherwise the first raw label.
pub fn extract_price(price_labels: &[String]) -> Option<String> {
    price_labels
        .iter()
        .find_map(|label| PRICE_PATTERN.find(label).map(|m| m.as_str().to_string()))
        .or_else(|| price_labels.first().cloned())
}
