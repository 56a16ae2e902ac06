//! Local filesystem dataset store.
//!
//! ## Save Protocol
//!
//! 1. Serialize and write `{name}.json.tmp`, fsync
//! 2. Copy the live `{name}.json` to `{name}_backup.json` (temp + rename)
//! 3. Rename the temp file over `{name}.json`
//! 4. Rewrite `{name}_metadata.json`
//!
//! A crash before step 3 leaves the previous live file untouched; a crash
//! after it leaves a valid new generation plus the old one as backup.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{Dataset, StoreConfig};
use crate::storage::{DatasetStore, MetadataSummary, SaveSummary};
use crate::utils::fs;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dataset_path: PathBuf,
    backup_path: PathBuf,
    metadata_path: PathBuf,
}

impl LocalStore {
    /// Create a store using the layout from configuration.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            dataset_path: config.dataset_path(),
            backup_path: config.backup_path(),
            metadata_path: config.metadata_path(),
        }
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Read the sibling metadata summary.
    pub async fn load_metadata(&self) -> Result<Option<MetadataSummary>> {
        match fs::read_optional(&self.metadata_path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Parse and integrity-check a dataset file.
    async fn read_dataset(path: &Path) -> Result<Option<Dataset>> {
        let Some(bytes) = fs::read_optional(path).await? else {
            return Ok(None);
        };
        let dataset: Dataset =
            serde_json::from_slice(&bytes).map_err(|e| AppError::corrupt_store(path, e))?;
        dataset
            .check_integrity()
            .map_err(|msg| AppError::corrupt_store(path, msg))?;
        Ok(Some(dataset))
    }

    /// Steps 1-3 of the save protocol. Returns whether a backup was taken.
    async fn replace_live(&self, dataset: &Dataset) -> Result<bool> {
        let bytes = serde_json::to_vec_pretty(dataset)?;
        let tmp = fs::write_tmp(&self.dataset_path, &bytes).await?;
        let backed_up = fs::copy_atomic(&self.dataset_path, &self.backup_path).await?;
        tokio::fs::rename(&tmp, &self.dataset_path).await?;
        Ok(backed_up)
    }

    fn file_name(&self) -> String {
        self.dataset_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatasetStore for LocalStore {
    async fn load(&self) -> Result<Dataset> {
        match Self::read_dataset(&self.dataset_path).await? {
            Some(dataset) => {
                log::info!(
                    "Loaded {} records (version {}) from {}",
                    dataset.len(),
                    dataset.metadata.version,
                    self.dataset_path.display()
                );
                Ok(dataset)
            }
            None => {
                log::warn!(
                    "No dataset at {}; starting empty",
                    self.dataset_path.display()
                );
                Ok(Dataset::new())
            }
        }
    }

    async fn save(&self, dataset: &mut Dataset) -> Result<SaveSummary> {
        let now = Utc::now();
        let next = dataset.next_metadata(now);
        let previous = std::mem::replace(&mut dataset.metadata, next);

        let backed_up = match self.replace_live(dataset).await {
            Ok(backed_up) => backed_up,
            Err(e) => {
                dataset.metadata = previous;
                return Err(e);
            }
        };

        let summary = MetadataSummary::of(dataset, self.file_name());
        if let Err(e) = fs::write_json_atomic(&self.metadata_path, &summary).await {
            log::warn!(
                "Dataset saved but metadata write to {} failed: {}",
                self.metadata_path.display(),
                e
            );
        }

        log::info!(
            "Saved {} records (version {}) to {}",
            dataset.len(),
            dataset.metadata.version,
            self.dataset_path.display()
        );

        Ok(SaveSummary {
            total_count: dataset.len(),
            version: dataset.metadata.version,
            backed_up,
            timestamp: now,
            path: self.dataset_path.clone(),
        })
    }

    async fn load_backup(&self) -> Result<Option<Dataset>> {
        Self::read_dataset(&self.backup_path).await
    }

    async fn restore_backup(&self) -> Result<Dataset> {
        let Some(backup) = self.load_backup().await? else {
            return Err(AppError::config(format!(
                "No backup found at {}",
                self.backup_path.display()
            )));
        };

        let bytes = serde_json::to_vec_pretty(&backup)?;
        fs::write_atomic(&self.dataset_path, &bytes).await?;
        let summary = MetadataSummary::of(&backup, self.file_name());
        fs::write_json_atomic(&self.metadata_path, &summary).await?;

        log::info!(
            "Restored {} records (version {}) from {}",
            backup.len(),
            backup.metadata.version,
            self.backup_path.display()
        );
        Ok(backup)
    }
}
