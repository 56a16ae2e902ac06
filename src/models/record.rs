// src/models/record.rs

//! Repository record and its normalized key.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::scoring;

/// Case-normalized `owner/name` identity of a repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoKey(String);

impl RepoKey {
    /// Build a key from owner and name, trimming and lower-casing both halves.
    pub fn new(owner: &str, name: &str) -> Self {
        Self(format!(
            "{}/{}",
            owner.trim().to_lowercase(),
            name.trim().to_lowercase()
        ))
    }

    /// Parse an `owner/name` string.
    pub fn parse(raw: &str) -> Result<Self> {
        let (owner, name) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| AppError::validation(format!("'{}' is not owner/name", raw)))?;

        for part in [owner, name] {
            if part.trim().is_empty() || part.contains('/') || part.chars().any(char::is_whitespace)
            {
                return Err(AppError::validation(format!(
                    "'{}' is not a valid repository key",
                    raw
                )));
            }
        }
        Ok(Self::new(owner, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(o, _)| o).unwrap_or(&self.0)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or("")
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RepoKey {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RepoKey> for String {
    fn from(key: RepoKey) -> Self {
        key.0
    }
}

/// One tracked repository.
///
/// Records are replaced as a whole; nothing outside the dataset edits
/// individual fields of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub owner: String,
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub url: String,

    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
    pub open_issues: u64,

    /// Source-reported creation time
    pub created_at: DateTime<Utc>,
    /// Source-reported last modification time
    pub updated_at: DateTime<Utc>,
    /// Source-reported last push time
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,

    /// Local time of the last successful fetch
    pub last_fetched_at: DateTime<Utc>,

    /// stars + forks + watchers, recomputed on normalization
    #[serde(default)]
    pub activity_score: u64,

    #[serde(default)]
    pub language: Option<String>,

    /// SPDX identifier
    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    pub is_fork: bool,

    #[serde(default)]
    pub is_archived: bool,

    #[serde(default)]
    pub owner_location: Option<String>,
}

impl Record {
    pub fn key(&self) -> RepoKey {
        RepoKey::new(&self.owner, &self.name)
    }

    /// Recompute cached fields from the metrics.
    pub fn refresh_derived(&mut self) {
        self.activity_score = scoring::activity_score(self.stars, self.forks, self.watchers);
    }

    /// Copy of this record with only the fetch time advanced.
    pub fn touched(&self, fetched_at: DateTime<Utc>) -> Self {
        Self {
            last_fetched_at: fetched_at,
            ..self.clone()
        }
    }

    /// Age of the local copy at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_fetched_at
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn key_is_case_normalized() {
        let record = record("Microsoft", "VSCode", 10);
        assert_eq!(record.key().as_str(), "microsoft/vscode");
        assert_eq!(record.key(), RepoKey::new("microsoft", "vscode"));
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(RepoKey::parse("no-slash").is_err());
        assert!(RepoKey::parse("/name").is_err());
        assert!(RepoKey::parse("owner/").is_err());
        assert!(RepoKey::parse("a/b/c").is_err());
        assert!(RepoKey::parse("a b/c").is_err());
        assert_eq!(RepoKey::parse(" Rust-Lang/Cargo ").unwrap().as_str(), "rust-lang/cargo");
    }

    #[test]
    fn key_parts() {
        let key = RepoKey::new("Octo", "Hello");
        assert_eq!(key.owner(), "octo");
        assert_eq!(key.name(), "hello");
    }

    #[test]
    fn activity_score_tracks_metrics() {
        let mut r = record("a", "b", 100);
        assert_eq!(r.activity_score, 100 + 10 + 100);
        r.forks = 0;
        r.refresh_derived();
        assert_eq!(r.activity_score, 200);
    }

    #[test]
    fn serde_round_trip_keeps_large_integers() {
        let mut r = record("a", "b", 1);
        r.stars = u64::MAX - 1;
        r.refresh_derived();
        let json = serde_json::to_string(&r).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn touched_only_moves_fetch_time() {
        let r = record("a", "b", 5);
        let later = base_time() + chrono::Duration::hours(1);
        let t = r.touched(later);
        assert_eq!(t.last_fetched_at, later);
        assert_eq!(Record { last_fetched_at: r.last_fetched_at, ..t }, r);
    }
}
