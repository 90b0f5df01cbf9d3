//! Drives sweeps over the catalog: fetch, classify, track, alert.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::classifier::classify;
use crate::config::SchedulerConfig;
use crate::models::{AlertEvent, Catalog, ClassificationResult, FetchMethod, FetchResult, Leaf, StockStatus};
use crate::plugins::{NotificationResult, Notifier};
use crate::scraper::FetchPipeline;
use crate::tracker::{deliver_alert, StockTracker};
use crate::utils::error::AppError;
use crate::utils::shutdown::ShutdownSignal;

/// Deliberate pacing between page loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub leaf_delay: Duration,
    pub vendor_delay: Duration,
}

impl ThrottlePolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            leaf_delay: Duration::from_millis(config.leaf_delay_ms),
            vendor_delay: Duration::from_millis(config.vendor_delay_ms),
        }
    }

    pub fn none() -> Self {
        Self {
            leaf_delay: Duration::ZERO,
            vendor_delay: Duration::ZERO,
        }
    }

    /// Delay before visiting `next`, given the leaf visited just before it.
    pub fn delay_between(&self, previous: &Leaf, next: &Leaf) -> Duration {
        if previous.vendor_key == next.vendor_key {
            self.leaf_delay
        } else {
            self.vendor_delay
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeafReport {
    pub key: String,
    pub vendor: String,
    pub product: String,
    pub supplier: String,
    pub url: String,
    pub status: StockStatus,
    pub price: Option<String>,
    pub method: FetchMethod,
    pub error: Option<String>,
    pub alerted: bool,
}

impl LeafReport {
    fn failed(leaf: &Leaf, error: String) -> Self {
        Self {
            key: leaf.key(),
            vendor: leaf.vendor_key.clone(),
            product: leaf.product.clone(),
            supplier: leaf.supplier.clone(),
            url: leaf.url.clone(),
            status: StockStatus::Unknown,
            price: None,
            method: FetchMethod::None,
            error: Some(error),
            alerted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SweepSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub checked: usize,
    pub in_stock: usize,
    pub out_of_stock: usize,
    pub unknown: usize,
    pub failed: usize,
    pub alerts: usize,
    /// Shutdown arrived before every leaf was visited.
    pub abandoned: bool,
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub summary: SweepSummary,
    pub leaves: Vec<LeafReport>,
}

/// Diagnostic fetch + classify for one URL.
#[derive(Debug, Clone, Serialize)]
pub struct UrlCheck {
    pub url: String,
    pub vendor: String,
    pub fetch: FetchResult,
    pub classification: ClassificationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub vendors: usize,
    pub products: usize,
    pub leaves: usize,
    pub tracked_records: usize,
    pub in_stock: usize,
    pub sweep_running: bool,
    pub last_sweep: Option<SweepSummary>,
}

/// Clears the running flag even if the sweep unwinds.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollOrchestrator {
    catalog: Arc<Catalog>,
    pipeline: Arc<FetchPipeline>,
    tracker: Mutex<StockTracker>,
    notifier: Arc<dyn Notifier>,
    throttle: ThrottlePolicy,
    shutdown: ShutdownSignal,
    running: AtomicBool,
    last_sweep: std::sync::Mutex<Option<SweepSummary>>,
}

impl PollOrchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        pipeline: Arc<FetchPipeline>,
        tracker: StockTracker,
        notifier: Arc<dyn Notifier>,
        throttle: ThrottlePolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            catalog,
            pipeline,
            tracker: Mutex::new(tracker),
            notifier,
            throttle,
            shutdown,
            running: AtomicBool::new(false),
            last_sweep: std::sync::Mutex::new(None),
        }
    }

    /// Loads persisted records and reconciles them with the catalog.
    pub async fn restore_state(&self) {
        let mut tracker = self.tracker.lock().await;
        tracker.load_persisted().await;
        tracker.sync_with_catalog(&self.catalog.leaves());
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pipeline(&self) -> &Arc<FetchPipeline> {
        &self.pipeline
    }

    pub fn is_sweep_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_sweep(&self) -> Option<SweepSummary> {
        match self.last_sweep.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// One ordered pass over every leaf. Returns `None` without doing anything
    /// when a sweep is already in progress.
    pub async fn run_sweep_once(&self) -> Option<SweepReport> {
        let Some(_guard) = SweepGuard::acquire(&self.running) else {
            tracing::info!("Sweep already in progress, trigger coalesced");
            metrics::counter!("restock_sweeps_coalesced_total").increment(1);
            return None;
        };

        let started_at = Utc::now();
        let leaves = self.catalog.leaves();
        tracing::info!(leaves = leaves.len(), "Starting sweep");

        let mut reports = Vec::with_capacity(leaves.len());
        let mut abandoned = false;
        let mut previous: Option<&Leaf> = None;

        for leaf in &leaves {
            if let Some(previous) = previous {
                if self.pace(previous, leaf).await.is_err() {
                    abandoned = true;
                    break;
                }
            }
            if self.shutdown.is_triggered() {
                abandoned = true;
                break;
            }
            previous = Some(leaf);

            let report = AssertUnwindSafe(self.check_leaf(leaf))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(key = %leaf.key(), "Leaf check panicked");
                    LeafReport::failed(leaf, "leaf check panicked".to_string())
                });
            reports.push(report);
        }

        if abandoned {
            tracing::warn!(
                visited = reports.len(),
                total = leaves.len(),
                "Shutdown requested, abandoning sweep"
            );
        }

        let persisted = self.tracker.lock().await.persist().await;
        let summary = summarize(started_at, &reports, abandoned, persisted);
        tracing::info!(
            checked = summary.checked,
            in_stock = summary.in_stock,
            out_of_stock = summary.out_of_stock,
            unknown = summary.unknown,
            alerts = summary.alerts,
            "Sweep finished"
        );
        metrics::counter!("restock_sweeps_total").increment(1);

        match self.last_sweep.lock() {
            Ok(mut guard) => *guard = Some(summary.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(summary.clone()),
        }

        Some(SweepReport {
            summary,
            leaves: reports,
        })
    }

    /// Rate-limit cooldown first, then the normal throttle.
    async fn pace(&self, previous: &Leaf, next: &Leaf) -> Result<(), crate::utils::error::FetchError> {
        let cooldown = self.pipeline.cooldown_remaining();
        if !cooldown.is_zero() {
            tracing::info!(cooldown_ms = cooldown.as_millis() as u64, "Waiting out rate-limit cooldown");
            self.shutdown.sleep(cooldown).await?;
        }
        self.shutdown.sleep(self.throttle.delay_between(previous, next)).await
    }

    async fn check_leaf(&self, leaf: &Leaf) -> LeafReport {
        tracing::debug!(key = %leaf.key(), url = %leaf.url, "Checking leaf");

        let (fetch, error) = match self.pipeline.fetch(&leaf.url, &leaf.vendor_key).await {
            Ok(result) => {
                let error = result.error.as_ref().map(|e| e.to_string());
                (Some(result), error)
            }
            Err(e) => {
                tracing::warn!(key = %leaf.key(), error = %e, "Fetch failed");
                (None, Some(e.to_string()))
            }
        };

        let classification = fetch
            .as_ref()
            .map(classify)
            .unwrap_or_else(ClassificationResult::unknown);
        let transition = self.tracker.lock().await.apply(leaf, &classification);
        // The tracker lock is released before delivery.
        let alerted = match &transition.alert {
            Some(alert) => deliver_alert(self.notifier.as_ref(), alert).await,
            None => false,
        };

        tracing::info!(
            key = %leaf.key(),
            status = %classification.stock_status,
            price = classification.price.as_deref(),
            method = fetch.as_ref().map(|f| f.method_used.as_str()).unwrap_or("none"),
            "Leaf checked"
        );

        LeafReport {
            key: leaf.key(),
            vendor: leaf.vendor_key.clone(),
            product: leaf.product.clone(),
            supplier: leaf.supplier.clone(),
            url: leaf.url.clone(),
            status: classification.stock_status,
            price: classification.price,
            method: fetch.map(|f| f.method_used).unwrap_or(FetchMethod::None),
            error,
            alerted,
        }
    }

    /// Fetch and classify one URL without touching stock state.
    pub async fn check_single_url(&self, url: &str, vendor: Option<&str>) -> Result<UrlCheck, AppError> {
        let vendor = vendor
            .or_else(|| self.catalog.vendor_for_url(url))
            .unwrap_or("generic")
            .to_string();

        let fetch = self.pipeline.fetch(url, &vendor).await?;
        let classification = classify(&fetch);
        Ok(UrlCheck {
            url: url.to_string(),
            vendor,
            fetch,
            classification,
        })
    }

    pub async fn status(&self) -> MonitorStatus {
        let tracker = self.tracker.lock().await;
        MonitorStatus {
            vendors: self.catalog.vendors.len(),
            products: self.catalog.product_count(),
            leaves: self.catalog.leaf_count(),
            tracked_records: tracker.current_state().len(),
            in_stock: tracker.in_stock_count(),
            sweep_running: self.is_sweep_running(),
            last_sweep: self.last_sweep(),
        }
    }

    /// Delivers a synthetic alert for the first leaf of `vendor` (or of the
    /// catalog). Stock state is untouched.
    pub async fn send_test_alert(&self, vendor: Option<&str>) -> Result<NotificationResult, AppError> {
        let leaf = self
            .catalog
            .leaves()
            .into_iter()
            .find(|leaf| vendor.is_none_or(|v| leaf.vendor_key == v))
            .ok_or_else(|| AppError::NotFound {
                resource: match vendor {
                    Some(v) => format!("vendor '{}'", v),
                    None => "any catalog leaf".to_string(),
                },
            })?;

        tracing::info!(key = %leaf.key(), "Sending test alert");
        self.notifier
            .deliver(&AlertEvent::for_leaf(&leaf, Some("TEST".to_string())))
            .await
    }

    /// Flushes pending state; used on shutdown.
    pub async fn persist(&self) -> bool {
        self.tracker.lock().await.persist().await
    }
}

fn summarize(started_at: DateTime<Utc>, reports: &[LeafReport], abandoned: bool, persisted: bool) -> SweepSummary {
    let count = |status: StockStatus| reports.iter().filter(|r| r.status == status).count();
    SweepSummary {
        started_at,
        finished_at: Utc::now(),
        checked: reports.len(),
        in_stock: count(StockStatus::InStock),
        out_of_stock: count(StockStatus::OutOfStock),
        unknown: count(StockStatus::Unknown),
        failed: reports.iter().filter(|r| r.error.is_some()).count(),
        alerts: reports.iter().filter(|r| r.alerted).count(),
        abandoned,
        persisted,
    }
}
