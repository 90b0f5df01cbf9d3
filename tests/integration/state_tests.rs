use super::*;
use restock_bell::models::StockRecord;
use restock_bell::store::JsonFileStore;
use tempfile::TempDir;

async fn file_backed(path: &std::path::Path, pages: Arc<FakePages>) -> (Arc<PollOrchestrator>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(JsonFileStore::new(path));
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
        StockTracker::new(store),
        notifier.clone(),
        ThrottlePolicy::none(),
        ShutdownSignal::never(),
    ));
    orchestrator.restore_state().await;
    (orchestrator, notifier)
}

#[tokio::test]
async fn test_state_survives_restart_without_duplicate_alerts() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("state").join("stock_data.json");

    let pages = Arc::new(FakePages::new());
    pages.set(SAYAKA_URL, Ok(in_stock_page()));
    pages.set(YUGEN_URL, Ok(sold_out_page()));

    let (first_run, first_notifier) = file_backed(&path, Arc::clone(&pages)).await;
    let report = first_run.run_sweep_once().await.unwrap();
    assert!(report.summary.persisted);
    assert_eq!(first_notifier.alerts().len(), 1);

    let on_disk: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(on_disk[SAYAKA_KEY], serde_json::json!(true));
    assert_eq!(on_disk[YUGEN_KEY], serde_json::json!(false));
    assert!(on_disk.get(KYOTO_KEY).is_none());

    // Same pages after a restart: the in-stock leaf is already known.
    let (second_run, second_notifier) = file_backed(&path, Arc::clone(&pages)).await;
    assert_eq!(second_run.status().await.tracked_records, 2);
    second_run.run_sweep_once().await.unwrap();
    assert!(second_notifier.alerts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_restore_drops_records_missing_from_catalog() -> anyhow::Result<()> {
    let mut persisted = StockState::new();
    persisted.insert(SAYAKA_KEY.to_string(), StockRecord::True);
    persisted.insert("retired-vendor_Old Tin_Shop".to_string(), StockRecord::False);

    let pages = FakePages::new();
    pages.set(SAYAKA_URL, Ok(in_stock_page()));

    let h = harness(pages, MemoryStore::with_state(persisted), ShutdownSignal::never()).await;
    assert_eq!(h.orchestrator.status().await.tracked_records, 1);

    h.orchestrator.run_sweep_once().await.unwrap();
    let saved = h.store.snapshot();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved.get(SAYAKA_KEY), Some(&StockRecord::True));
    assert!(h.notifier.alerts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_corrupt_state_file_starts_empty_and_is_replaced() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("stock_data.json");
    std::fs::write(&path, "{ not json")?;

    let pages = Arc::new(FakePages::new());
    pages.set(KYOTO_URL, Ok(sold_out_page()));

    let (orchestrator, _notifier) = file_backed(&path, pages).await;
    assert_eq!(orchestrator.status().await.tracked_records, 0);

    let report = orchestrator.run_sweep_once().await.unwrap();
    assert!(report.summary.persisted);

    let on_disk: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(on_disk[KYOTO_KEY], serde_json::json!(false));
    Ok(())
}

#[tokio::test]
async fn test_unchanged_sweep_skips_write() -> anyhow::Result<()> {
    let pages = FakePages::new();
    pages.set(SAYAKA_URL, Ok(sold_out_page()));

    let h = harness(pages, MemoryStore::default(), ShutdownSignal::never()).await;
    h.orchestrator.run_sweep_once().await.unwrap();
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);

    h.orchestrator.run_sweep_once().await.unwrap();
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);
    Ok(())
}
