// Shared fakes and wiring for the restock-bell integration tests.

pub mod state_tests;
pub mod sweep_tests;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use restock_bell::element_finder::SelectorTable;
use restock_bell::models::{AlertEvent, Catalog, PageSignals, Product, Supplier, Vendor};
use restock_bell::orchestrator::{PollOrchestrator, ThrottlePolicy};
use restock_bell::plugins::{NotificationResult, Notifier};
use restock_bell::scraper::{FetchPipeline, PageRequest, PageStrategy, PipelineSettings, RetryPolicy, StrategySettings};
use restock_bell::store::{StateStore, StockState};
use restock_bell::tracker::StockTracker;
use restock_bell::utils::error::{AppError, FetchError};
use restock_bell::utils::shutdown::{Shutdown, ShutdownSignal};

/// Page strategy answering from a per-URL table. Unknown URLs are 404s.
pub struct FakePages {
    pages: Mutex<HashMap<String, Result<PageSignals, FetchError>>>,
    visits: Mutex<Vec<String>>,
    calls: AtomicUsize,
    /// Fired on every call; lets a test observe that a sweep is in flight.
    pub entered: Notify,
    /// When set, each call waits for one permit before answering.
    gate: Option<Arc<tokio::sync::Semaphore>>,
    /// Triggers shutdown once this many calls have been made.
    shutdown_after: Option<(usize, Arc<Shutdown>)>,
}

impl FakePages {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            visits: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: None,
            shutdown_after: None,
        }
    }

    pub fn gated(mut self, gate: Arc<tokio::sync::Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn shutdown_after(mut self, calls: usize, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown_after = Some((calls, shutdown));
        self
    }

    pub fn set(&self, url: &str, outcome: Result<PageSignals, FetchError>) {
        self.pages.lock().unwrap().insert(url.to_string(), outcome);
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageStrategy for FakePages {
    fn name(&self) -> &str {
        "fake"
    }

    async fn acquire(&self, request: PageRequest<'_>) -> Result<PageSignals, FetchError> {
        let url = request.url.to_string();
        self.visits.lock().unwrap().push(url.clone());
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some((after, shutdown)) = &self.shutdown_after {
            if calls >= *after {
                shutdown.trigger();
            }
        }

        self.pages
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or(Err(FetchError::HttpStatus { url, status: 404 }))
    }
}

/// In-memory store that counts saves.
#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<StockState>,
    pub saves: AtomicUsize,
}

impl MemoryStore {
    pub fn with_state(state: StockState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> StockState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<StockState, AppError> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &StockState) -> Result<(), AppError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }
}

/// Notifier that keeps every alert it was asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<AlertEvent>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<NotificationResult, AppError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(NotificationResult::delivered(None))
    }
}

pub fn in_stock_page() -> PageSignals {
    PageSignals {
        action_labels: vec!["Add to cart".to_string()],
        price_labels: vec!["$24.00".to_string()],
        ..Default::default()
    }
}

pub fn sold_out_page() -> PageSignals {
    PageSignals {
        action_labels: vec!["Sold out".to_string()],
        price_labels: vec!["$24.00".to_string()],
        ..Default::default()
    }
}

/// Two vendors, three leaves, in sweep order:
/// `ippodo-us/Sayaka/Ippodo`, `yugen-tea/Kanbayashi/Yugen`, `yugen-tea/Kanbayashi/Kyoto Direct`.
pub fn test_catalog() -> Catalog {
    let supplier = |name: &str, url: &str| Supplier {
        name: name.to_string(),
        url: url.to_string(),
    };

    let mut vendors = BTreeMap::new();
    vendors.insert(
        "yugen-tea".to_string(),
        Vendor {
            name: "Yugen Tea".to_string(),
            products: vec![Product {
                name: "Kanbayashi".to_string(),
                suppliers: vec![
                    supplier("Yugen", "https://yugen.test/kanbayashi"),
                    supplier("Kyoto Direct", "https://kyoto.test/kanbayashi"),
                ],
            }],
            selectors: None,
        },
    );
    vendors.insert(
        "ippodo-us".to_string(),
        Vendor {
            name: "Ippodo US".to_string(),
            products: vec![Product {
                name: "Sayaka".to_string(),
                suppliers: vec![supplier("Ippodo", "https://ippodo.test/sayaka")],
            }],
            selectors: None,
        },
    );
    Catalog { vendors }
}

pub const SAYAKA_URL: &str = "https://ippodo.test/sayaka";
pub const YUGEN_URL: &str = "https://yugen.test/kanbayashi";
pub const KYOTO_URL: &str = "https://kyoto.test/kanbayashi";

pub const SAYAKA_KEY: &str = "ippodo-us_Sayaka_Ippodo";
pub const YUGEN_KEY: &str = "yugen-tea_Kanbayashi_Yugen";
pub const KYOTO_KEY: &str = "yugen-tea_Kanbayashi_Kyoto Direct";

/// Lightweight-only settings with no retries and no backoff.
pub fn fast_settings() -> PipelineSettings {
    let strategy = StrategySettings {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::once(),
    };
    PipelineSettings {
        lightweight: strategy.clone(),
        rendered: strategy,
        fallback_timeout: Duration::from_secs(5),
        sufficient_action_labels: 1,
        sufficient_stock_labels: 3,
    }
}

pub struct Harness {
    pub orchestrator: Arc<PollOrchestrator>,
    pub pages: Arc<FakePages>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn harness(pages: FakePages, store: MemoryStore, signal: ShutdownSignal) -> Harness {
    harness_with(pages, store, signal, fast_settings(), ThrottlePolicy::none()).await
}

pub async fn harness_with(
    pages: FakePages,
    store: MemoryStore,
    signal: ShutdownSignal,
    settings: PipelineSettings,
    throttle: ThrottlePolicy,
) -> Harness {
    let pages = Arc::new(pages);
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::default());

    let pipeline = FetchPipeline::new(
        pages.clone(),
        None,
        SelectorTable::builtin(),
        settings,
        signal.clone(),
    );
    let tracker = StockTracker::new(store.clone());
    let orchestrator = Arc::new(PollOrchestrator::new(
        Arc::new(test_catalog()),
        Arc::new(pipeline),
        tracker,
        notifier.clone(),
        throttle,
        signal,
    ));
    orchestrator.restore_state().await;

    Harness {
        orchestrator,
        pages,
        store,
        notifier,
    }
}
