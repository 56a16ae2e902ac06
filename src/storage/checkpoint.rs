//! Checkpoint persistence for resumable bulk collection.
//!
//! One file per task under `checkpoints/`, written atomically. A checkpoint
//! that cannot be read back is treated as absent so the collection restarts
//! from the first page instead of failing.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{CHECKPOINT_VERSION, Checkpoint};
use crate::utils::fs;

/// Reads and writes checkpoints in a directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, task_id: &str) -> PathBuf {
        let safe: String = task_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Persist the position after the last fully processed page.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::write_json_atomic(&self.path(&checkpoint.task_id), checkpoint).await?;
        log::debug!(
            "Checkpoint {}: page {} ({} records)",
            checkpoint.task_id,
            checkpoint.last_page,
            checkpoint.records_fetched
        );
        Ok(())
    }

    /// Load the checkpoint of `task_id`, if a usable one exists.
    pub async fn load(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path(task_id);
        let Some(bytes) = fs::read_optional(&path).await? else {
            return Ok(None);
        };

        let checkpoint: Checkpoint = match serde_json::from_slice(&bytes) {
            Ok(cp) => cp,
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable checkpoint {}: {}. Restarting from the beginning.",
                    path.display(),
                    e
                );
                return Ok(None);
            }
        };

        if checkpoint.task_id != task_id || checkpoint.version > CHECKPOINT_VERSION {
            log::warn!(
                "Ignoring checkpoint {} (task {}, version {})",
                path.display(),
                checkpoint.task_id,
                checkpoint.version
            );
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    /// Remove the checkpoint of `task_id`. Returns whether one existed.
    pub async fn clear(&self, task_id: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path(task_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable checkpoints, sorted by task id.
    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(bytes) = fs::read_optional(&path).await? else {
                continue;
            };
            match serde_json::from_slice::<Checkpoint>(&bytes) {
                Ok(cp) => checkpoints.push(cp),
                Err(e) => log::warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
            }
        }
        checkpoints.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(checkpoints)
    }
}
