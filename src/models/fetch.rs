use serde::{Deserialize, Serialize};

use crate::utils::error::{FetchError, FetchErrorKind};

/// Which acquisition strategy produced a [`FetchResult`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    /// Plain HTTP GET that found enough signal on its own.
    Lightweight,
    /// Page rendered inside the pooled browser.
    Rendered,
    /// Plain HTTP GET retried after the browser failed.
    LightweightFallback,
    /// Every strategy failed.
    None,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Lightweight => "lightweight",
            FetchMethod::Rendered => "rendered",
            FetchMethod::LightweightFallback => "lightweight_fallback",
            FetchMethod::None => "none",
        }
    }
}

/// Raw labels scraped from one page, before classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageSignals {
    pub action_labels: Vec<String>,
    pub stock_labels: Vec<String>,
    pub price_labels: Vec<String>,
    pub page_title: String,
    pub final_url: String,
}

impl PageSignals {
    pub fn is_empty(&self) -> bool {
        self.action_labels.is_empty() && self.stock_labels.is_empty() && self.price_labels.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl From<&FetchError> for FetchFailure {
    fn from(err: &FetchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchResult {
    pub method_used: FetchMethod,
    pub candidate_action_labels: Vec<String>,
    pub candidate_stock_labels: Vec<String>,
    pub candidate_price_labels: Vec<String>,
    pub page_title: String,
    pub fetched_url: String,
    pub error: Option<FetchFailure>,
}

impl FetchResult {
    pub fn from_signals(method: FetchMethod, signals: PageSignals, requested_url: &str) -> Self {
        let fetched_url = if signals.final_url.is_empty() {
            requested_url.to_string()
        } else {
            signals.final_url
        };

        Self {
            method_used: method,
            candidate_action_labels: signals.action_labels,
            candidate_stock_labels: signals.stock_labels,
            candidate_price_labels: signals.price_labels,
            page_title: signals.page_title,
            fetched_url,
            error: None,
        }
    }

    /// Empty result carrying the last failure; classifies as `Unknown`.
    pub fn failed(requested_url: &str, error: &FetchError) -> Self {
        Self {
            method_used: FetchMethod::None,
            candidate_action_labels: Vec::new(),
            candidate_stock_labels: Vec::new(),
            candidate_price_labels: Vec::new(),
            page_title: String::new(),
            fetched_url: requested_url.to_string(),
            error: Some(FetchFailure::from(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
