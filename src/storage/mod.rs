//! Storage abstractions for dataset persistence.
//!
//! ## Directory Structure
//!
//! ```text
//! data/
//! ├── config.toml               # Collector configuration
//! ├── projects.json             # Live dataset (records + metadata envelope)
//! ├── projects_backup.json      # Previous generation
//! ├── projects_metadata.json    # Summary counts for readers
//! ├── owner_locations.jsonl     # Append-only owner location cache
//! └── checkpoints/
//!     └── {task_id}.json        # Pagination progress of a bulk collection
//! ```

pub mod checkpoint;
pub mod local;
pub mod owner_cache;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Dataset;

// Re-export for convenience
pub use checkpoint::CheckpointManager;
pub use local::LocalStore;
pub use owner_cache::{OwnerLocation, OwnerLocationCache};

/// Result of a successful save.
#[derive(Debug, Clone)]
pub struct SaveSummary {
    /// Records written
    pub total_count: usize,
    /// Save generation now on disk
    pub version: u64,
    /// Whether a previous generation was copied to the backup
    pub backed_up: bool,
    /// Timestamp of the write
    pub timestamp: DateTime<Utc>,
    /// Live dataset file
    pub path: PathBuf,
}

/// Sibling `_metadata` document with summary counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSummary {
    pub last_updated: DateTime<Utc>,
    pub total_count: usize,
    pub version: u64,
    pub dataset_file: String,
    pub total_stars: u64,
    /// Records per primary language ("Unknown" when absent)
    pub languages: BTreeMap<String, usize>,
}

impl MetadataSummary {
    pub fn of(dataset: &Dataset, dataset_file: impl Into<String>) -> Self {
        let mut languages = BTreeMap::new();
        let mut total_stars = 0u64;
        for record in dataset.records() {
            total_stars = total_stars.saturating_add(record.stars);
            let lang = record.language.as_deref().unwrap_or("Unknown").to_string();
            *languages.entry(lang).or_insert(0) += 1;
        }
        Self {
            last_updated: dataset.metadata.last_updated.unwrap_or_else(Utc::now),
            total_count: dataset.len(),
            version: dataset.metadata.version,
            dataset_file: dataset_file.into(),
            total_stars,
            languages,
        }
    }
}

/// Trait for dataset storage backends.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Load the live dataset. A missing file is an empty dataset; an
    /// unparsable one is `AppError::CorruptStore`.
    async fn load(&self) -> Result<Dataset>;

    /// Atomically replace the live dataset, keeping one prior generation.
    ///
    /// On success `dataset.metadata` reflects what was written; on failure
    /// it is left unchanged.
    async fn save(&self, dataset: &mut Dataset) -> Result<SaveSummary>;

    /// Load the previous generation, if any.
    async fn load_backup(&self) -> Result<Option<Dataset>>;

    /// Replace the live dataset with the backup and return it.
    async fn restore_backup(&self) -> Result<Dataset>;
}
