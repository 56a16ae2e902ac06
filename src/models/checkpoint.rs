// src/models/checkpoint.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk checkpoint format.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable pagination progress of one bulk collection task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stable id derived from the query
    pub task_id: String,
    /// Query string the cursor belongs to
    pub query: String,
    /// Opaque cursor of the next page to fetch
    pub cursor: String,
    /// Records seen up to and including `last_page`
    pub records_fetched: u64,
    /// Last fully processed page (1-based)
    pub last_page: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

impl Checkpoint {
    pub fn new(
        task_id: impl Into<String>,
        query: impl Into<String>,
        cursor: impl Into<String>,
        records_fetched: u64,
        last_page: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            query: query.into(),
            cursor: cursor.into(),
            records_fetched,
            last_page,
            saved_at: Utc::now(),
            version: CHECKPOINT_VERSION,
        }
    }
}
