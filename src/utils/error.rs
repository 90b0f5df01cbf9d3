use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Notifier error: {notifier}: {message}")]
    Notifier { notifier: String, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Catalog(err.to_string())
    }
}

/// Why a single acquisition attempt failed.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("blocked by {url} (HTTP {status})")]
    Blocked { url: String, status: u16 },

    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("rendering backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    Network,
    Blocked,
    RateLimited,
    HttpStatus,
    Browser,
    BackendUnavailable,
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout { .. } => FetchErrorKind::Timeout,
            FetchError::Network(_) => FetchErrorKind::Network,
            FetchError::Blocked { .. } => FetchErrorKind::Blocked,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::HttpStatus { .. } => FetchErrorKind::HttpStatus,
            FetchError::Browser(_) => FetchErrorKind::Browser,
            FetchError::BackendUnavailable(_) => FetchErrorKind::BackendUnavailable,
            FetchError::Cancelled => FetchErrorKind::Cancelled,
        }
    }

    /// Timeouts, connection failures, 5xx and browser hiccups are worth another try.
    /// 429 has its own budget in the retry loop.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network(_) | FetchError::Browser(_) => true,
            FetchError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
