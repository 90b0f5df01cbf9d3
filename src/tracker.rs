//! Edge-triggered restock detection over the persisted per-leaf records.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::{AlertEvent, ClassificationResult, Leaf, StockRecord, StockStatus};
use crate::plugins::Notifier;
use crate::store::{StateStore, StockState};

/// What one classification did to a leaf's record.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub prior: StockRecord,
    pub current: StockRecord,
    /// Present only on a restock. Hand it to [`deliver_alert`] after releasing the tracker.
    pub alert: Option<AlertEvent>,
}

/// `prior != True && current == InStock`.
pub fn is_restock(prior: StockRecord, current: StockStatus) -> bool {
    prior != StockRecord::True && current == StockStatus::InStock
}

/// `Unknown` never overwrites a definite record.
pub fn next_record(prior: StockRecord, current: StockStatus) -> StockRecord {
    match current {
        StockStatus::InStock => StockRecord::True,
        StockStatus::OutOfStock => StockRecord::False,
        StockStatus::Unknown => prior,
    }
}

/// Sends a restock alert. Failures are logged and reported as `false`; they
/// never roll back the record that triggered the alert.
pub async fn deliver_alert(notifier: &dyn Notifier, alert: &AlertEvent) -> bool {
    let key = format!("{}_{}_{}", alert.vendor_key, alert.product_name, alert.supplier_name);
    match notifier.deliver(alert).await {
        Ok(result) if result.success => true,
        Ok(result) => {
            tracing::error!(
                key = %key,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Restock alert was not delivered"
            );
            false
        }
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Restock alert delivery failed");
            false
        }
    }
}

/// Sole writer of the stock state.
pub struct StockTracker {
    store: Arc<dyn StateStore>,
    state: StockState,
    dirty: bool,
}

impl StockTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            state: StockState::new(),
            dirty: false,
        }
    }

    /// Replaces in-memory state with the store's. A broken store degrades to empty.
    pub async fn load_persisted(&mut self) {
        self.state = match self.store.load().await {
            Ok(state) => {
                tracing::info!(records = state.len(), "Loaded stock state");
                state
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load stock state, starting empty");
                StockState::new()
            }
        };
        self.dirty = false;
    }

    /// Drops records for leaves no longer in the catalog. New leaves stay `Unset`
    /// until their first definite classification.
    pub fn sync_with_catalog(&mut self, leaves: &[Leaf]) -> usize {
        let live: HashSet<String> = leaves.iter().map(Leaf::key).collect();
        let before = self.state.len();
        self.state.retain(|key, _| live.contains(key));
        let dropped = before - self.state.len();
        if dropped > 0 {
            tracing::info!(dropped, "Dropped stock records for leaves no longer in the catalog");
            self.dirty = true;
        }
        dropped
    }

    pub fn record(&self, key: &str) -> StockRecord {
        self.state.get(key).copied().unwrap_or_default()
    }

    pub fn current_state(&self) -> &StockState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn in_stock_count(&self) -> usize {
        self.state.values().filter(|r| **r == StockRecord::True).count()
    }

    /// Applies one classification and returns the alert to send, if any.
    pub fn apply(&mut self, leaf: &Leaf, classification: &ClassificationResult) -> Transition {
        let key = leaf.key();
        let prior = self.record(&key);
        let current = next_record(prior, classification.stock_status);

        if current != prior {
            tracing::debug!(key = %key, ?prior, ?current, "Stock record changed");
            self.state.insert(key.clone(), current);
            self.dirty = true;
        }

        let alert = is_restock(prior, classification.stock_status).then(|| {
            tracing::info!(key = %key, price = classification.price.as_deref(), "Restock detected");
            metrics::counter!("restock_alerts_total").increment(1);
            AlertEvent::for_leaf(leaf, classification.price.clone())
        });

        Transition { prior, current, alert }
    }

    /// Writes state if anything changed. On failure the state stays dirty so the
    /// next call retries.
    pub async fn persist(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        match self.store.save(&self.state).await {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist stock state, will retry next sweep");
                false
            }
        }
    }
}
