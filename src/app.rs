use std::sync::Arc;

use crate::config::AppConfig;
use crate::element_finder::SelectorTable;
use crate::models::Catalog;
use crate::orchestrator::{PollOrchestrator, ThrottlePolicy};
use crate::plugins::{Notifier, NotifierManager};
use crate::scraper::FetchPipeline;
use crate::store::{JsonFileStore, StateStore};
use crate::tracker::StockTracker;
use crate::utils::error::AppError;
use crate::utils::shutdown::Shutdown;

/// Everything a running monitor owns, wired from configuration.
pub struct App {
    pub config: AppConfig,
    pub orchestrator: Arc<PollOrchestrator>,
    shutdown: Shutdown,
}

impl App {
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        let catalog = Catalog::load(&config.storage.catalog_path).await?;
        let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(config.storage.state_path.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(NotifierManager::from_config(&config.notifications)?);
        Self::from_parts(config, catalog, store, notifier).await
    }

    /// Wiring with injected collaborators; the fetch pipeline is always real.
    pub async fn from_parts(
        config: AppConfig,
        catalog: Catalog,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let shutdown = Shutdown::new();
        let selectors = SelectorTable::with_catalog(&catalog);
        let pipeline = Arc::new(FetchPipeline::from_config(&config, selectors, shutdown.signal())?);

        let tracker = StockTracker::new(store);
        let orchestrator = Arc::new(PollOrchestrator::new(
            Arc::new(catalog),
            pipeline,
            tracker,
            notifier,
            ThrottlePolicy::from_config(&config.scheduler),
            shutdown.signal(),
        ));
        orchestrator.restore_state().await;

        Ok(Self {
            config,
            orchestrator,
            shutdown,
        })
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Signals shutdown, flushes state, then closes browser contexts and the browser.
    pub async fn shutdown(&self) {
        if !self.shutdown.is_triggered() {
            self.shutdown.trigger();
        }
        if !self.orchestrator.persist().await {
            tracing::warn!("Final state flush failed");
        }
        self.orchestrator.pipeline().shutdown().await;
    }
}
