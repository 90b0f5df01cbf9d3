use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub browser: BrowserConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
}

/// Lightweight HTTP strategy and escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_retries: u32,
    pub http_backoff_ms: u64,
    pub fallback_timeout_secs: u64,
    pub rate_limit_retries: u32,
    pub rate_limit_backoff_ms: u64,
    pub rate_limit_max_backoff_secs: u64,
    pub max_redirects: usize,
    /// Lightweight results with at least this many action labels skip the browser.
    pub sufficient_action_labels: usize,
    /// ...or at least this many stock labels.
    pub sufficient_stock_labels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub navigation_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub extraction_timeout_secs: u64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub leaf_delay_ms: u64,
    pub vendor_delay_ms: u64,
    pub run_on_start: bool,
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_path: PathBuf,
    pub catalog_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
    pub username: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            http_timeout_secs: 8,
            http_retries: 2,
            http_backoff_ms: 1000,
            fallback_timeout_secs: 15,
            rate_limit_retries: 5,
            rate_limit_backoff_ms: 2000,
            rate_limit_max_backoff_secs: 120,
            max_redirects: 3,
            sufficient_action_labels: 1,
            sufficient_stock_labels: 3,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chrome_path: None,
            headless: true,
            navigation_timeout_secs: 25,
            settle_delay_ms: 1500,
            extraction_timeout_secs: 10,
            retries: 1,
            backoff_ms: 2000,
            idle_timeout_secs: 900,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            leaf_delay_ms: 2000,
            vendor_delay_ms: 5000,
            run_on_start: true,
            heartbeat_interval_secs: 300,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("data/stock_data.json"),
            catalog_path: PathBuf::from("config/catalog.toml"),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: "Restock Bell".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "restock-bell.log".to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl AppConfig {
    /// Layered load: compiled defaults, `config/default`, `config/{RUN_MODE}`,
    /// `config/local`, an optional explicit file, then `RESTOCK__*` variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let s = builder
            .add_source(Environment::with_prefix("RESTOCK").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.browser.chrome_path.is_none() {
            config.browser.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scraper.user_agent.trim().is_empty() {
            return Err(ConfigError::Message("Scraper user_agent must not be empty".into()));
        }

        if self.scraper.http_timeout_secs == 0 || self.scraper.fallback_timeout_secs == 0 {
            return Err(ConfigError::Message("Scraper timeouts must be greater than 0".into()));
        }

        if self.scraper.sufficient_action_labels == 0 && self.scraper.sufficient_stock_labels == 0 {
            return Err(ConfigError::Message(
                "At least one sufficient-data threshold must be greater than 0".into(),
            ));
        }

        if self.browser.enabled
            && (self.browser.navigation_timeout_secs == 0 || self.browser.extraction_timeout_secs == 0)
        {
            return Err(ConfigError::Message("Browser timeouts must be greater than 0".into()));
        }

        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::Message("Scheduler poll_interval_secs must be greater than 0".into()));
        }

        if self.scheduler.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Scheduler heartbeat_interval_secs must be greater than 0".into(),
            ));
        }

        if let Some(webhook) = &self.notifications.webhook_url {
            match Url::parse(webhook) {
                Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
                _ => return Err(ConfigError::Message("Invalid webhook URL format".into())),
            }
        }

        if self.storage.state_path.as_os_str().is_empty() {
            return Err(ConfigError::Message("Storage state_path must not be empty".into()));
        }

        Ok(())
    }
}
