//! Page acquisition: a cheap HTTP strategy escalating to a pooled browser.

pub mod browser;
pub mod http;
pub mod retry;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::config::AppConfig;
use crate::element_finder::{SelectorSet, SelectorTable};
use crate::models::{parse_page_url, FetchMethod, FetchResult, PageSignals};
use crate::utils::error::{AppError, FetchError};
use crate::utils::shutdown::ShutdownSignal;

pub use browser::RenderedStrategy;
pub use http::HttpStrategy;
pub use retry::RetryPolicy;

/// Everything one acquisition attempt needs.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub url: &'a Url,
    pub vendor: &'a str,
    pub selectors: &'a SelectorSet,
    pub timeout: Duration,
    /// Every network or browser wait inside `acquire` races this signal.
    pub shutdown: &'a ShutdownSignal,
}

#[async_trait]
pub trait PageStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// One attempt at loading the page and extracting its signals.
    async fn acquire(&self, request: PageRequest<'_>) -> Result<PageSignals, FetchError>;

    /// Releases pooled resources. Called once at process teardown.
    async fn shutdown(&self) {}
}

/// Timeout plus retry budget for one strategy.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub lightweight: StrategySettings,
    pub rendered: StrategySettings,
    pub fallback_timeout: Duration,
    pub sufficient_action_labels: usize,
    pub sufficient_stock_labels: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let scraper = &config.scraper;
        let rate_limit = |retries: u32, backoff: Duration| RetryPolicy {
            retries,
            backoff_base: backoff,
            rate_limit_retries: scraper.rate_limit_retries,
            rate_limit_backoff_base: Duration::from_millis(scraper.rate_limit_backoff_ms),
            rate_limit_max_backoff: Duration::from_secs(scraper.rate_limit_max_backoff_secs),
        };

        Self {
            lightweight: StrategySettings {
                timeout: scraper.http_timeout(),
                retry: rate_limit(scraper.http_retries, Duration::from_millis(scraper.http_backoff_ms)),
            },
            rendered: StrategySettings {
                // Navigation, settle and extraction are each bounded inside the strategy.
                timeout: config.browser.navigation_timeout(),
                retry: rate_limit(config.browser.retries, Duration::from_millis(config.browser.backoff_ms)),
            },
            fallback_timeout: scraper.fallback_timeout(),
            sufficient_action_labels: scraper.sufficient_action_labels,
            sufficient_stock_labels: scraper.sufficient_stock_labels,
        }
    }

    /// At least one non-zero threshold must be met for the cheap result to stand.
    pub fn is_sufficient(&self, signals: &PageSignals) -> bool {
        let enough = |found: usize, threshold: usize| threshold > 0 && found >= threshold;
        enough(signals.action_labels.len(), self.sufficient_action_labels)
            || enough(signals.stock_labels.len(), self.sufficient_stock_labels)
    }
}

/// Lightweight first, Rendered when the cheap result is thin, Lightweight again
/// as a last resort. Ordinary failures come back as a [`FetchResult`] with
/// `error` set; only an invalid URL or a dead rendering backend is an `Err`.
pub struct FetchPipeline {
    lightweight: Arc<dyn PageStrategy>,
    rendered: Option<Arc<dyn PageStrategy>>,
    selectors: SelectorTable,
    settings: PipelineSettings,
    shutdown: ShutdownSignal,
    cooldown_until: Mutex<Option<Instant>>,
}

impl FetchPipeline {
    pub fn new(
        lightweight: Arc<dyn PageStrategy>,
        rendered: Option<Arc<dyn PageStrategy>>,
        selectors: SelectorTable,
        settings: PipelineSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            lightweight,
            rendered,
            selectors,
            settings,
            shutdown,
            cooldown_until: Mutex::new(None),
        }
    }

    /// Real strategies wired from configuration. The browser itself is launched
    /// lazily on the first rendered fetch.
    pub fn from_config(config: &AppConfig, selectors: SelectorTable, shutdown: ShutdownSignal) -> Result<Self, AppError> {
        let lightweight: Arc<dyn PageStrategy> = Arc::new(HttpStrategy::new(&config.scraper)?);
        let rendered: Option<Arc<dyn PageStrategy>> = if config.browser.enabled {
            Some(Arc::new(RenderedStrategy::new(config.browser.clone(), config.scraper.user_agent.clone())))
        } else {
            tracing::info!("Browser strategy disabled; lightweight results are final");
            None
        };

        Ok(Self::new(
            lightweight,
            rendered,
            selectors,
            PipelineSettings::from_config(config),
            shutdown,
        ))
    }

    /// Time left on the global cooldown set by the most recent 429.
    pub fn cooldown_remaining(&self) -> Duration {
        let guard = match self.cooldown_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    fn note_rate_limit(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut guard = match self.cooldown_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none_or(|current| current < until) {
            *guard = Some(until);
        }
        metrics::counter!("restock_rate_limited_total").increment(1);
    }

    pub async fn fetch(&self, url: &str, vendor: &str) -> Result<FetchResult, AppError> {
        let parsed = parse_page_url(url)?;
        let selectors = self.selectors.for_vendor(vendor);

        let result = self.escalate(url, &parsed, vendor, selectors).await;
        if let Ok(result) = &result {
            metrics::counter!("restock_fetch_total", "method" => result.method_used.as_str()).increment(1);
            tracing::debug!(
                url,
                vendor,
                method = result.method_used.as_str(),
                actions = result.candidate_action_labels.len(),
                stock = result.candidate_stock_labels.len(),
                prices = result.candidate_price_labels.len(),
                error = result.error.as_ref().map(|e| e.message.as_str()),
                "Fetch finished"
            );
        }
        result
    }

    async fn escalate(
        &self,
        url: &str,
        parsed: &Url,
        vendor: &str,
        selectors: &SelectorSet,
    ) -> Result<FetchResult, AppError> {
        let request = |timeout| PageRequest {
            url: parsed,
            vendor,
            selectors,
            timeout,
            shutdown: &self.shutdown,
        };
        let lightweight_settings = &self.settings.lightweight;
        let first = self
            .attempt(&*self.lightweight, request(lightweight_settings.timeout), &lightweight_settings.retry)
            .await;

        let Some(rendered) = &self.rendered else {
            return Ok(match first {
                Ok(signals) => FetchResult::from_signals(FetchMethod::Lightweight, signals, url),
                Err(err) => FetchResult::failed(url, &err),
            });
        };

        let partial = match first {
            Ok(signals) if self.settings.is_sufficient(&signals) => {
                return Ok(FetchResult::from_signals(FetchMethod::Lightweight, signals, url));
            }
            Ok(signals) => {
                tracing::debug!(url, "Lightweight result insufficient, escalating to browser");
                Some(signals)
            }
            Err(err @ (FetchError::Cancelled | FetchError::RateLimited { .. })) => {
                return Ok(FetchResult::failed(url, &err));
            }
            Err(err) => {
                tracing::debug!(url, error = %err, "Lightweight fetch failed, escalating to browser");
                None
            }
        };

        let rendered_settings = &self.settings.rendered;
        match self
            .attempt(&**rendered, request(rendered_settings.timeout), &rendered_settings.retry)
            .await
        {
            Ok(signals) => return Ok(FetchResult::from_signals(FetchMethod::Rendered, signals, url)),
            Err(FetchError::BackendUnavailable(reason)) => return Err(AppError::BrowserLaunch(reason)),
            Err(err @ (FetchError::Cancelled | FetchError::RateLimited { .. })) => {
                return Ok(FetchResult::failed(url, &err));
            }
            Err(err) => tracing::warn!(url, error = %err, "Browser fetch failed, falling back to HTTP"),
        }

        match self
            .attempt(&*self.lightweight, request(self.settings.fallback_timeout), &RetryPolicy::once())
            .await
        {
            Ok(signals) => Ok(FetchResult::from_signals(FetchMethod::LightweightFallback, signals, url)),
            Err(err) => Ok(match partial {
                Some(signals) if !signals.is_empty() => {
                    FetchResult::from_signals(FetchMethod::Lightweight, signals, url)
                }
                _ => FetchResult::failed(url, &err),
            }),
        }
    }

    async fn attempt(
        &self,
        strategy: &dyn PageStrategy,
        request: PageRequest<'_>,
        policy: &RetryPolicy,
    ) -> Result<PageSignals, FetchError> {
        retry::retry_with_backoff(
            policy,
            &self.shutdown,
            strategy.name(),
            |delay| self.note_rate_limit(delay),
            || strategy.acquire(request),
        )
        .await
    }

    /// Closes browser contexts, then the browser.
    pub async fn shutdown(&self) {
        if let Some(rendered) = &self.rendered {
            rendered.shutdown().await;
        }
        self.lightweight.shutdown().await;
    }
}
