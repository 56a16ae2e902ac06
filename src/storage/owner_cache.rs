//! Owner-location cache backed by an append-only JSON Lines file.
//!
//! Each line records one observation:
//!
//! ```text
//! {"login":"alice","location":"Seattle, WA"}
//! {"login":"bob","location":null}
//! {"login":"alice","invalidated":true}
//! ```
//!
//! `null` marks an owner whose location could not be resolved. Later lines
//! win. Entries never expire; they change only through `insert` or
//! `invalidate`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::models::Record;
use crate::utils::fs;

/// Resolved location of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerLocation {
    Known(String),
    /// Looked up, but no location could be resolved.
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheLine {
    login: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    invalidated: bool,
}

/// Explicit cache object; load it at the start of a run and flush at the end.
#[derive(Debug)]
pub struct OwnerLocationCache {
    path: PathBuf,
    entries: HashMap<String, OwnerLocation>,
    pending: Vec<CacheLine>,
}

impl OwnerLocationCache {
    /// Empty cache that will append to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Replay the file at `path`. Malformed lines are skipped.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let mut cache = Self::new(path);
        let Some(bytes) = fs::read_optional(&cache.path).await? else {
            return Ok(cache);
        };

        let text = String::from_utf8_lossy(&bytes);
        let mut skipped = 0usize;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<CacheLine>(line) {
                Ok(entry) => cache.apply(&entry),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!(
                "Skipped {} malformed line(s) in {}",
                skipped,
                cache.path.display()
            );
        }
        log::debug!(
            "Loaded {} owner locations from {}",
            cache.entries.len(),
            cache.path.display()
        );
        Ok(cache)
    }

    fn normalize(login: &str) -> String {
        login.trim().to_lowercase()
    }

    fn apply(&mut self, line: &CacheLine) {
        let login = Self::normalize(&line.login);
        if line.invalidated {
            self.entries.remove(&login);
        } else {
            let location = match &line.location {
                Some(loc) if !loc.trim().is_empty() => OwnerLocation::Known(loc.clone()),
                _ => OwnerLocation::Unknown,
            };
            self.entries.insert(login, location);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lines waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn get(&self, login: &str) -> Option<&OwnerLocation> {
        self.entries.get(&Self::normalize(login))
    }

    /// Record a location (`None` = unresolved). Returns whether it changed.
    pub fn insert(&mut self, login: &str, location: Option<String>) -> bool {
        let line = CacheLine {
            login: Self::normalize(login),
            location: location.filter(|l| !l.trim().is_empty()),
            invalidated: false,
        };
        let next = match &line.location {
            Some(loc) => OwnerLocation::Known(loc.clone()),
            None => OwnerLocation::Unknown,
        };
        if self.entries.get(&line.login) == Some(&next) {
            return false;
        }
        self.apply(&line);
        self.pending.push(line);
        true
    }

    /// Forget an owner. Returns whether an entry existed.
    pub fn invalidate(&mut self, login: &str) -> bool {
        let line = CacheLine {
            login: Self::normalize(login),
            location: None,
            invalidated: true,
        };
        if !self.entries.contains_key(&line.login) {
            return false;
        }
        self.apply(&line);
        self.pending.push(line);
        true
    }

    /// Learn from a record's owner location, or fill it from the cache.
    pub fn enrich(&mut self, record: &mut Record) {
        if let Some(location) = record.owner_location.clone() {
            self.insert(&record.owner, Some(location));
        } else if let Some(OwnerLocation::Known(location)) = self.get(&record.owner) {
            record.owner_location = Some(location.clone());
        }
    }

    /// Append pending lines to the file. Returns how many were written.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        fs::ensure_parent(&self.path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        for line in &self.pending {
            let mut bytes = serde_json::to_vec(line)?;
            bytes.push(b'\n');
            // One write per line so concurrent appenders never interleave within a line.
            file.write_all(&bytes).await?;
        }
        file.flush().await?;
        file.sync_data().await?;

        let written = self.pending.len();
        self.pending.clear();
        log::debug!("Appended {} owner locations to {}", written, self.path.display());
        Ok(written)
    }
}
