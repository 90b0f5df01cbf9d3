use serde::{Deserialize, Serialize};

pub mod alert;
pub mod catalog;
pub mod fetch;

// Re-exports for convenience
pub use alert::*;
pub use catalog::*;
pub use fetch::*;

/// Tri-state outcome of classifying one page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    Unknown,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status of a leaf. `Unset` is never written to disk; it is the
/// absence of a key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockRecord {
    True,
    False,
    #[default]
    Unset,
}

impl StockRecord {
    pub fn from_persisted(value: Option<bool>) -> Self {
        match value {
            Some(true) => StockRecord::True,
            Some(false) => StockRecord::False,
            None => StockRecord::Unset,
        }
    }

    pub fn as_persisted(&self) -> Option<bool> {
        match self {
            StockRecord::True => Some(true),
            StockRecord::False => Some(false),
            StockRecord::Unset => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationResult {
    pub stock_status: StockStatus,
    pub price: Option<String>,
}

impl ClassificationResult {
    pub fn unknown() -> Self {
        Self {
            stock_status: StockStatus::Unknown,
            price: None,
        }
    }
}
