use async_trait::async_trait;
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision};
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::FailRequest;
use headless_chrome::protocol::cdp::Network::{ErrorReason, ResourceType};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{PageRequest, PageStrategy};
use crate::config::BrowserConfig;
use crate::element_finder::extract_signals;
use crate::models::PageSignals;
use crate::utils::error::FetchError;

/// Extra time granted to the blocking navigation call beyond its own CDP timeout.
const NAVIGATION_GRACE: Duration = Duration::from_secs(2);

/// A vendor's tab; `in_use` serialises fetches that share it.
struct VendorContext {
    tab: Arc<Tab>,
    in_use: Mutex<()>,
}

fn browser_error(context: &str, err: impl Display) -> FetchError {
    FetchError::Browser(format!("{}: {}", context, err))
}

/// Subresources that never carry stock or price text.
pub fn is_blocked_resource(resource: &ResourceType) -> bool {
    matches!(
        resource,
        ResourceType::Image | ResourceType::Stylesheet | ResourceType::Font | ResourceType::Media
    )
}

/// One lazily launched browser plus one tab per vendor.
///
/// The `browser` mutex doubles as the launch guard: a caller arriving while a
/// launch is in flight waits for it instead of starting a second process.
pub struct BrowserPool {
    config: BrowserConfig,
    user_agent: String,
    browser: Mutex<Option<Arc<Browser>>>,
    contexts: Mutex<HashMap<String, Arc<VendorContext>>>,
    closed: AtomicBool,
}

impl BrowserPool {
    pub fn new(config: BrowserConfig, user_agent: String) -> Self {
        Self {
            config,
            user_agent,
            browser: Mutex::new(None),
            contexts: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn launch_options(&self) -> Result<LaunchOptions<'static>, FetchError> {
        let mut options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(false)
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-backgrounding-occluded-windows"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| FetchError::BackendUnavailable(format!("invalid launch options: {}", e)))?;

        options.idle_browser_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        if let Some(chrome_path) = &self.config.chrome_path {
            options.path = Some(PathBuf::from(chrome_path));
        }
        Ok(options)
    }

    async fn browser(&self) -> Result<Arc<Browser>, FetchError> {
        let mut slot = self.browser.lock().await;
        if self.is_closed() {
            return Err(FetchError::Cancelled);
        }
        if let Some(browser) = slot.as_ref() {
            return Ok(Arc::clone(browser));
        }

        let options = self.launch_options()?;
        tracing::info!(headless = self.config.headless, "Launching browser");
        let browser = tokio::task::spawn_blocking(move || Browser::new(options))
            .await
            .map_err(|e| FetchError::BackendUnavailable(e.to_string()))?
            .map_err(|e| FetchError::BackendUnavailable(e.to_string()))?;

        let browser = Arc::new(browser);
        *slot = Some(Arc::clone(&browser));
        Ok(browser)
    }

    /// The vendor's tab, opening and configuring it on first use.
    async fn context(&self, vendor: &str) -> Result<Arc<VendorContext>, FetchError> {
        let mut contexts = self.contexts.lock().await;
        if let Some(context) = contexts.get(vendor) {
            return Ok(Arc::clone(context));
        }

        let browser = self.browser().await?;
        let user_agent = self.user_agent.clone();
        let timeout = self.config.navigation_timeout();
        let opened = tokio::task::spawn_blocking(move || open_tab(&browser, &user_agent, timeout))
            .await
            .map_err(|e| browser_error("tab task", e))?;

        let tab = match opened {
            Ok(tab) => tab,
            Err(err) => {
                // A browser that cannot open tabs is most likely gone.
                drop(contexts);
                self.reset().await;
                return Err(err);
            }
        };

        tracing::debug!(vendor, "Opened browser context");
        let context = Arc::new(VendorContext {
            tab,
            in_use: Mutex::new(()),
        });
        contexts.insert(vendor.to_string(), Arc::clone(&context));
        Ok(context)
    }

    async fn discard(&self, vendor: &str) {
        let removed = self.contexts.lock().await.remove(vendor);
        if let Some(context) = removed {
            close_tab(Arc::clone(&context.tab)).await;
        }
    }

    /// Drops every context and the browser; the next fetch relaunches.
    async fn reset(&self) {
        tracing::warn!("Resetting browser pool");
        self.close_all().await;
    }

    async fn close_all(&self) {
        // In-flight fetches are not awaited; closing their tab makes them fail fast.
        let contexts: Vec<Arc<VendorContext>> = self.contexts.lock().await.drain().map(|(_, c)| c).collect();
        for context in contexts {
            close_tab(Arc::clone(&context.tab)).await;
        }

        if let Some(browser) = self.browser.lock().await.take() {
            // Dropping the last handle terminates the process.
            let _ = tokio::task::spawn_blocking(move || drop(browser)).await;
        }
    }

    /// Closes all contexts, then the browser. Later fetches fail with `Cancelled`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_all().await;
        tracing::info!("Browser pool shut down");
    }
}

fn open_tab(browser: &Browser, user_agent: &str, timeout: Duration) -> Result<Arc<Tab>, FetchError> {
    let tab = browser.new_tab().map_err(|e| browser_error("new tab", e))?;
    tab.set_default_timeout(timeout);
    tab.set_user_agent(user_agent, None, None)
        .map_err(|e| browser_error("set user agent", e))?;

    let interceptor: Arc<dyn RequestInterceptor + Send + Sync> = Arc::new(
        |_transport: Arc<Transport>, _session: SessionId, event: RequestPausedEvent| {
            if is_blocked_resource(&event.params.resource_Type) {
                RequestPausedDecision::Fail(FailRequest {
                    request_id: event.params.request_id,
                    error_reason: ErrorReason::BlockedByClient,
                })
            } else {
                RequestPausedDecision::Continue(None)
            }
        },
    );
    tab.enable_fetch(None, None)
        .map_err(|e| browser_error("enable fetch", e))?;
    tab.enable_request_interception(interceptor)
        .map_err(|e| browser_error("request interception", e))?;

    Ok(tab)
}

async fn close_tab(tab: Arc<Tab>) {
    let _ = tokio::task::spawn_blocking(move || tab.close(true)).await;
}

/// Navigates and waits for load. A wait that never completes is not an error:
/// whatever content arrived is still worth extracting.
fn navigate(tab: &Tab, url: &str) -> Result<(), FetchError> {
    tab.navigate_to(url).map_err(|e| browser_error("navigate", e))?;
    if let Err(e) = tab.wait_until_navigated() {
        tracing::debug!(url, error = %e, "Navigation did not settle, extracting partial content");
    }
    Ok(())
}

/// Renders pages in the pooled browser.
pub struct RenderedStrategy {
    pool: BrowserPool,
    settle_delay: Duration,
    extraction_timeout: Duration,
}

impl RenderedStrategy {
    pub fn new(config: BrowserConfig, user_agent: String) -> Self {
        let settle_delay = config.settle_delay();
        let extraction_timeout = config.extraction_timeout();
        Self {
            pool: BrowserPool::new(config, user_agent),
            settle_delay,
            extraction_timeout,
        }
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }
}

#[async_trait]
impl PageStrategy for RenderedStrategy {
    fn name(&self) -> &str {
        "rendered"
    }

    async fn acquire(&self, request: PageRequest<'_>) -> Result<PageSignals, FetchError> {
        let context = self.pool.context(request.vendor).await?;
        let busy = context.in_use.lock().await;
        if self.pool.is_closed() {
            return Err(FetchError::Cancelled);
        }

        let nav_tab = Arc::clone(&context.tab);
        let url = request.url.to_string();
        let navigation = tokio::task::spawn_blocking(move || navigate(&nav_tab, &url));
        let navigated = request
            .shutdown
            .guard(async { Ok(tokio::time::timeout(request.timeout + NAVIGATION_GRACE, navigation).await) })
            .await?;
        match navigated {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => {
                drop(busy);
                self.pool.discard(request.vendor).await;
                return Err(err);
            }
            Ok(Err(join)) => return Err(browser_error("navigation task", join)),
            Err(_) => {
                tracing::warn!(url = %request.url, "Navigation timed out, extracting partial content");
            }
        }

        request.shutdown.sleep(self.settle_delay).await?;

        let content_tab = Arc::clone(&context.tab);
        let extraction = tokio::task::spawn_blocking(move || {
            let html = content_tab.get_content().map_err(|e| browser_error("get content", e))?;
            Ok::<_, FetchError>((html, content_tab.get_url()))
        });
        let extracted = request
            .shutdown
            .guard(async { Ok(tokio::time::timeout(self.extraction_timeout, extraction).await) })
            .await?;
        let (html, final_url) = match extracted {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => return Err(browser_error("extraction task", join)),
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: request.url.to_string(),
                });
            }
        };

        let final_url = if final_url.is_empty() {
            request.url.to_string()
        } else {
            final_url
        };
        tracing::debug!(url = %request.url, vendor = request.vendor, bytes = html.len(), "Rendered page");
        Ok(extract_signals(&html, request.selectors, &final_url))
    }

    async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
