use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::models::StockRecord;
use crate::utils::error::AppError;

/// `leafKey -> record`. `Unset` entries are never written.
pub type StockState = BTreeMap<String, StockRecord>;

/// Durable home of the per-leaf stock records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// A missing store is an empty state, not an error.
    async fn load(&self) -> Result<StockState, AppError>;

    /// Replaces the stored state atomically.
    async fn save(&self, state: &StockState) -> Result<(), AppError>;
}

/// JSON object on disk: `{"vendor_product_supplier": true, ...}`.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("state");
        self.path
            .with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<StockState, AppError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No stock state file yet, starting empty");
                return Ok(StockState::new());
            }
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(StockState::new());
        }

        let persisted: BTreeMap<String, Option<bool>> = serde_json::from_str(&raw).map_err(|e| {
            AppError::Persistence(format!("parsing {}: {}", self.path.display(), e))
        })?;

        Ok(persisted
            .into_iter()
            .map(|(key, value)| (key, StockRecord::from_persisted(value)))
            .filter(|(_, record)| *record != StockRecord::Unset)
            .collect())
    }

    async fn save(&self, state: &StockState) -> Result<(), AppError> {
        let persisted: BTreeMap<&str, bool> = state
            .iter()
            .filter_map(|(key, record)| record.as_persisted().map(|value| (key.as_str(), value)))
            .collect();
        let bytes = serde_json::to_vec_pretty(&persisted)?;

        let persistence = |action: &str, e: std::io::Error| {
            AppError::Persistence(format!("{} {}: {}", action, self.path.display(), e))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence("creating directory for", e))?;
        }

        let tmp = self.temp_path();
        let replaced = async {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| persistence("creating temp file for", e))?;
            file.write_all(&bytes)
                .await
                .map_err(|e| persistence("writing", e))?;
            file.sync_all().await.map_err(|e| persistence("syncing", e))?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| persistence("replacing", e))
        }
        .await;

        // The previous state file is untouched on any failure; only the temp file goes.
        if let Err(err) = replaced {
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove temp state file");
                }
            }
            return Err(err);
        }

        tracing::debug!(path = %self.path.display(), records = persisted.len(), "Saved stock state");
        Ok(())
    }
}
