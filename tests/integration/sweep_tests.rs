use super::*;
use restock_bell::models::{FetchMethod, StockRecord, StockStatus};

#[tokio::test]
async fn test_sweep_continues_past_failing_leaf() -> anyhow::Result<()> {
    let pages = FakePages::new();
    pages.set(SAYAKA_URL, Err(FetchError::Network("connection reset".to_string())));
    pages.set(YUGEN_URL, Ok(in_stock_page()));
    pages.set(KYOTO_URL, Ok(sold_out_page()));

    let h = harness(pages, MemoryStore::default(), ShutdownSignal::never()).await;
    let report = h.orchestrator.run_sweep_once().await.expect("sweep should run");

    assert_eq!(report.leaves.len(), 3);
    assert_eq!(report.summary.checked, 3);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.in_stock, 1);
    assert_eq!(report.summary.out_of_stock, 1);
    assert_eq!(report.summary.unknown, 1);
    assert!(!report.summary.abandoned);
    assert!(report.summary.persisted);

    let failed = &report.leaves[0];
    assert_eq!(failed.key, SAYAKA_KEY);
    assert_eq!(failed.status, StockStatus::Unknown);
    assert_eq!(failed.method, FetchMethod::None);
    assert!(failed.error.as_deref().unwrap().contains("connection reset"));

    let state = h.store.snapshot();
    assert!(!state.contains_key(SAYAKA_KEY));
    assert_eq!(state.get(YUGEN_KEY), Some(&StockRecord::True));
    assert_eq!(state.get(KYOTO_KEY), Some(&StockRecord::False));
    Ok(())
}

#[tokio::test]
async fn test_sweep_visits_leaves_in_catalog_order() -> anyhow::Result<()> {
    let pages = FakePages::new();
    for url in [SAYAKA_URL, YUGEN_URL, KYOTO_URL] {
        pages.set(url, Ok(sold_out_page()));
    }

    let h = harness(pages, MemoryStore::default(), ShutdownSignal::never()).await;
    let first = h.orchestrator.run_sweep_once().await.expect("first sweep");
    let second = h.orchestrator.run_sweep_once().await.expect("second sweep");

    let keys = |report: &restock_bell::orchestrator::SweepReport| {
        report.leaves.iter().map(|l| l.key.clone()).collect::<Vec<_>>()
    };
    assert_eq!(keys(&first), vec![SAYAKA_KEY, YUGEN_KEY, KYOTO_KEY]);
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(
        h.pages.visits(),
        vec![SAYAKA_URL, YUGEN_URL, KYOTO_URL, SAYAKA_URL, YUGEN_URL, KYOTO_URL]
    );
    Ok(())
}

#[tokio::test]
async fn test_restock_alerts_once_until_item_sells_out_again() -> anyhow::Result<()> {
    let pages = FakePages::new();
    pages.set(SAYAKA_URL, Ok(sold_out_page()));
    pages.set(YUGEN_URL, Ok(sold_out_page()));
    pages.set(KYOTO_URL, Ok(sold_out_page()));

    let h = harness(pages, MemoryStore::default(), ShutdownSignal::never()).await;

    let report = h.orchestrator.run_sweep_once().await.unwrap();
    assert_eq!(report.summary.alerts, 0);

    h.pages.set(YUGEN_URL, Ok(in_stock_page()));
    let report = h.orchestrator.run_sweep_once().await.unwrap();
    assert_eq!(report.summary.alerts, 1);
    assert!(report.leaves[1].alerted);

    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].vendor_key, "yugen-tea");
    assert_eq!(alerts[0].product_name, "Kanbayashi");
    assert_eq!(alerts[0].supplier_name, "Yugen");
    assert_eq!(alerts[0].price.as_deref(), Some("$24.00"));
    assert_eq!(alerts[0].url, YUGEN_URL);

    // Still in stock: no repeat.
    let report = h.orchestrator.run_sweep_once().await.unwrap();
    assert_eq!(report.summary.alerts, 0);

    // A failed check in between does not reset the record.
    h.pages.set(YUGEN_URL, Err(FetchError::Timeout { url: YUGEN_URL.to_string() }));
    h.orchestrator.run_sweep_once().await.unwrap();
    h.pages.set(YUGEN_URL, Ok(in_stock_page()));
    let report = h.orchestrator.run_sweep_once().await.unwrap();
    assert_eq!(report.summary.alerts, 0);

    // Sold out, then back: alerts again.
    h.pages.set(YUGEN_URL, Ok(sold_out_page()));
    h.orchestrator.run_sweep_once().await.unwrap();
    h.pages.set(YUGEN_URL, Ok(in_stock_page()));
    let report = h.orchestrator.run_sweep_once().await.unwrap();
    assert_eq!(report.summary.alerts, 1);
    assert_eq!(h.notifier.alerts().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_overlapping_trigger_is_coalesced() -> anyhow::Result<()> {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let pages = FakePages::new().gated(Arc::clone(&gate));
    for url in [SAYAKA_URL, YUGEN_URL, KYOTO_URL] {
        pages.set(url, Ok(sold_out_page()));
    }

    let h = harness(pages, MemoryStore::default(), ShutdownSignal::never()).await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let first = tokio::spawn(async move { orchestrator.run_sweep_once().await });

    h.pages.entered.notified().await;
    assert!(h.orchestrator.is_sweep_running());
    assert!(h.orchestrator.run_sweep_once().await.is_none());

    gate.add_permits(3);
    let report = first.await?.expect("first sweep completes");
    assert_eq!(report.summary.checked, 3);
    assert_eq!(h.pages.calls(), 3);
    assert!(!h.orchestrator.is_sweep_running());

    // The slot is free again once the first sweep is done.
    gate.add_permits(3);
    assert!(h.orchestrator.run_sweep_once().await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_abandons_sweep_and_flushes_state() -> anyhow::Result<()> {
    let shutdown = Arc::new(Shutdown::new());
    let pages = FakePages::new().shutdown_after(1, Arc::clone(&shutdown));
    for url in [SAYAKA_URL, YUGEN_URL, KYOTO_URL] {
        pages.set(url, Ok(in_stock_page()));
    }

    let h = harness(pages, MemoryStore::default(), shutdown.signal()).await;
    let report = h.orchestrator.run_sweep_once().await.unwrap();

    assert!(report.summary.abandoned);
    assert_eq!(report.summary.checked, 1);
    assert_eq!(h.pages.calls(), 1);
    assert!(report.summary.persisted);
    assert_eq!(h.store.snapshot().get(SAYAKA_KEY), Some(&StockRecord::True));
    Ok(())
}

#[tokio::test]
async fn test_status_reflects_last_sweep() -> anyhow::Result<()> {
    let pages = FakePages::new();
    pages.set(SAYAKA_URL, Ok(in_stock_page()));
    pages.set(YUGEN_URL, Ok(sold_out_page()));

    let h = harness(pages, MemoryStore::default(), ShutdownSignal::never()).await;

    let status = h.orchestrator.status().await;
    assert_eq!(status.vendors, 2);
    assert_eq!(status.products, 2);
    assert_eq!(status.leaves, 3);
    assert_eq!(status.tracked_records, 0);
    assert!(status.last_sweep.is_none());

    h.orchestrator.run_sweep_once().await.unwrap();

    let status = h.orchestrator.status().await;
    assert_eq!(status.tracked_records, 2);
    assert_eq!(status.in_stock, 1);
    assert!(!status.sweep_running);
    let last = status.last_sweep.expect("last sweep recorded");
    assert_eq!(last.checked, 3);
    assert_eq!(last.failed, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sweep_paces_leaves_by_vendor() -> anyhow::Result<()> {
    let pages = FakePages::new();
    for url in [SAYAKA_URL, YUGEN_URL, KYOTO_URL] {
        pages.set(url, Ok(sold_out_page()));
    }
    let throttle = ThrottlePolicy {
        leaf_delay: Duration::from_secs(2),
        vendor_delay: Duration::from_secs(5),
    };

    let h = harness_with(pages, MemoryStore::default(), ShutdownSignal::never(), fast_settings(), throttle).await;
    let started = tokio::time::Instant::now();
    let report = h.orchestrator.run_sweep_once().await.unwrap();

    // ippodo-us -> yugen-tea crosses vendors (5s), then stays within yugen-tea (2s).
    assert_eq!(report.summary.checked, 3);
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_cooldown_delays_next_leaf() -> anyhow::Result<()> {
    let pages = FakePages::new();
    pages.set(
        SAYAKA_URL,
        Err(FetchError::RateLimited {
            url: SAYAKA_URL.to_string(),
            retry_after: Some(Duration::from_secs(30)),
        }),
    );
    pages.set(YUGEN_URL, Ok(sold_out_page()));
    pages.set(KYOTO_URL, Ok(sold_out_page()));

    let mut settings = fast_settings();
    settings.lightweight.retry.rate_limit_max_backoff = Duration::from_secs(60);
    let throttle = ThrottlePolicy {
        leaf_delay: Duration::from_secs(2),
        vendor_delay: Duration::from_secs(5),
    };

    let h = harness_with(pages, MemoryStore::default(), ShutdownSignal::never(), settings, throttle).await;
    let started = tokio::time::Instant::now();
    let report = h.orchestrator.run_sweep_once().await.unwrap();

    assert_eq!(report.leaves[0].status, StockStatus::Unknown);
    assert!(report.leaves[0].error.as_deref().unwrap().contains("rate limited"));
    // One request per leaf.
    assert_eq!(h.pages.calls(), 3);
    // 30s cooldown, then the 5s vendor switch, then the 2s leaf delay.
    assert_eq!(started.elapsed(), Duration::from_secs(37));
    assert_eq!(h.orchestrator.pipeline().cooldown_remaining(), Duration::ZERO);
    Ok(())
}

/// Holds every delivery until the test releases a permit.
struct StalledNotifier {
    gate: Arc<tokio::sync::Semaphore>,
    entered: Notify,
}

#[async_trait]
impl Notifier for StalledNotifier {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn deliver(&self, _alert: &AlertEvent) -> Result<NotificationResult, AppError> {
        self.entered.notify_one();
        self.gate.acquire().await.unwrap().forget();
        Ok(NotificationResult::delivered(None))
    }
}

#[tokio::test]
async fn test_status_is_readable_while_alert_is_delivered() -> anyhow::Result<()> {
    let pages = Arc::new(FakePages::new());
    pages.set(SAYAKA_URL, Ok(in_stock_page()));
    pages.set(YUGEN_URL, Ok(sold_out_page()));

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let notifier = Arc::new(StalledNotifier {
        gate: Arc::clone(&gate),
        entered: Notify::new(),
    });
    let pipeline = FetchPipeline::new(
        pages,
        None,
        SelectorTable::builtin(),
        fast_settings(),
        ShutdownSignal::never(),
    );
    let orchestrator = Arc::new(PollOrchestrator::new(
        Arc::new(test_catalog()),
        Arc::new(pipeline),
        StockTracker::new(Arc::new(MemoryStore::default())),
        notifier.clone(),
        ThrottlePolicy::none(),
        ShutdownSignal::never(),
    ));

    let sweeping = Arc::clone(&orchestrator);
    let sweep = tokio::spawn(async move { sweeping.run_sweep_once().await });

    notifier.entered.notified().await;
    let status = tokio::time::timeout(Duration::from_secs(1), orchestrator.status()).await?;
    assert!(status.sweep_running);
    assert_eq!(status.in_stock, 1);

    gate.add_permits(1);
    let report = sweep.await?.expect("sweep completes");
    assert_eq!(report.summary.alerts, 1);
    assert!(report.leaves[0].alerted);
    Ok(())
}
