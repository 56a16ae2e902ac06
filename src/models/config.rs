//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::policy::ReplacementPolicy;
use super::query::QuerySpec;
use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote API access and pacing
    #[serde(default)]
    pub api: ApiConfig,

    /// What to collect
    #[serde(default)]
    pub query: QuerySpec,

    /// Dataset size, freshness and checkpointing
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Where the dataset lives
    #[serde(default)]
    pub store: StoreConfig,

    /// Influence score weights
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.api.user_agent.trim().is_empty() {
            return Err(AppError::validation("api.user_agent is empty"));
        }
        if self.api.timeout_secs == 0 {
            return Err(AppError::validation("api.timeout_secs must be > 0"));
        }
        if self.api.max_concurrent == 0 {
            return Err(AppError::validation("api.max_concurrent must be > 0"));
        }
        if self.api.max_concurrent as u64 >= self.api.rate_limit_margin {
            return Err(AppError::validation(
                "api.max_concurrent must be below api.rate_limit_margin",
            ));
        }
        if self.api.backoff_max_ms < self.api.backoff_base_ms {
            return Err(AppError::validation(
                "api.backoff_max_ms must be >= api.backoff_base_ms",
            ));
        }
        if self.api.token_env.trim().is_empty() {
            return Err(AppError::validation("api.token_env is empty"));
        }
        if !(1..=100).contains(&self.query.page_size) {
            return Err(AppError::validation("query.page_size must be within 1..=100"));
        }
        if self.query.location.trim().is_empty() {
            return Err(AppError::validation("query.location is empty"));
        }
        if self.query.repos_per_account == 0 || self.query.repos_per_account > 100 {
            return Err(AppError::validation(
                "query.repos_per_account must be within 1..=100",
            ));
        }
        if self.collection.target_size == 0 {
            return Err(AppError::validation("collection.target_size must be > 0"));
        }
        if self.collection.checkpoint_every_pages == 0 {
            return Err(AppError::validation(
                "collection.checkpoint_every_pages must be > 0",
            ));
        }
        if self.store.dataset_name.trim().is_empty() {
            return Err(AppError::validation("store.dataset_name is empty"));
        }
        self.scoring.validate()
    }
}

/// Remote API access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// REST API base URL
    #[serde(default = "defaults::rest_url")]
    pub rest_url: String,

    /// GraphQL endpoint
    #[serde(default = "defaults::graphql_url")]
    pub graphql_url: String,

    /// Environment variable holding the bearer token
    #[serde(default = "defaults::token_env")]
    pub token_env: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles per attempt
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single retry delay
    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,

    /// Pause until reset once remaining quota drops below this
    #[serde(default = "defaults::rate_limit_margin")]
    pub rate_limit_margin: u64,

    /// Delay between requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_url: defaults::rest_url(),
            graphql_url: defaults::graphql_url(),
            token_env: defaults::token_env(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_retries: defaults::max_retries(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
            rate_limit_margin: defaults::rate_limit_margin(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Dataset size, freshness and checkpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Maximum number of records kept
    #[serde(default = "defaults::target_size")]
    pub target_size: usize,

    /// Records older than this many days are refreshed
    #[serde(default = "defaults::refresh_days")]
    pub refresh_days: u32,

    /// Which records make room when the dataset is full
    #[serde(default)]
    pub policy: ReplacementPolicy,

    /// Save dataset and checkpoint after this many pages
    #[serde(default = "defaults::checkpoint_every_pages")]
    pub checkpoint_every_pages: u32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            target_size: defaults::target_size(),
            refresh_days: defaults::refresh_days(),
            policy: ReplacementPolicy::default(),
            checkpoint_every_pages: defaults::checkpoint_every_pages(),
        }
    }
}

impl CollectionConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.refresh_days))
    }
}

/// Dataset file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding dataset, backup, metadata and checkpoints
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,

    /// Base file name of the dataset (without extension)
    #[serde(default = "defaults::dataset_name")]
    pub dataset_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            dataset_name: defaults::dataset_name(),
        }
    }
}

impl StoreConfig {
    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.dataset_name))
    }

    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_backup.json", self.dataset_name))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_metadata.json", self.dataset_name))
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn owner_cache_path(&self) -> PathBuf {
        self.data_dir.join("owner_locations.jsonl")
    }
}

/// Influence score weights and smoothing constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "defaults::star_weight")]
    pub star_weight: f64,
    #[serde(default = "defaults::fork_weight")]
    pub fork_weight: f64,
    #[serde(default = "defaults::watcher_weight")]
    pub watcher_weight: f64,
    #[serde(default = "defaults::age_weight")]
    pub age_weight: f64,
    #[serde(default = "defaults::health_weight")]
    pub health_weight: f64,

    /// Years at which the age factor reaches one half
    #[serde(default = "defaults::age_smoothing_years")]
    pub age_smoothing_years: f64,

    /// Open issue count at which the health factor reaches one half
    #[serde(default = "defaults::health_smoothing")]
    pub health_smoothing: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            star_weight: defaults::star_weight(),
            fork_weight: defaults::fork_weight(),
            watcher_weight: defaults::watcher_weight(),
            age_weight: defaults::age_weight(),
            health_weight: defaults::health_weight(),
            age_smoothing_years: defaults::age_smoothing_years(),
            health_smoothing: defaults::health_smoothing(),
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        let weights = [
            self.star_weight,
            self.fork_weight,
            self.watcher_weight,
            self.age_weight,
            self.health_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AppError::validation(
                "scoring weights must be finite and non-negative",
            ));
        }
        if self.age_smoothing_years <= 0.0 || self.health_smoothing <= 0.0 {
            return Err(AppError::validation(
                "scoring smoothing constants must be > 0",
            ));
        }
        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;

    // API defaults
    pub fn rest_url() -> String {
        "https://api.github.com".into()
    }
    pub fn graphql_url() -> String {
        "https://api.github.com/graphql".into()
    }
    pub fn token_env() -> String {
        "GITHUB_TOKEN".into()
    }
    pub fn user_agent() -> String {
        "source-ranker/0.1".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn backoff_base() -> u64 {
        500
    }
    pub fn backoff_max() -> u64 {
        30_000
    }
    pub fn rate_limit_margin() -> u64 {
        100
    }
    pub fn request_delay() -> u64 {
        500
    }
    pub fn max_concurrent() -> usize {
        4
    }

    // Collection defaults
    pub fn target_size() -> usize {
        10_000
    }
    pub fn refresh_days() -> u32 {
        7
    }
    pub fn checkpoint_every_pages() -> u32 {
        1
    }

    // Store defaults
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn dataset_name() -> String {
        "projects".into()
    }

    // Scoring defaults
    pub fn star_weight() -> f64 {
        0.40
    }
    pub fn fork_weight() -> f64 {
        0.25
    }
    pub fn watcher_weight() -> f64 {
        0.15
    }
    pub fn age_weight() -> f64 {
        0.10
    }
    pub fn health_weight() -> f64 {
        0.10
    }
    pub fn age_smoothing_years() -> f64 {
        2.0
    }
    pub fn health_smoothing() -> f64 {
        10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Strategy;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_concurrency_above_margin() {
        let mut config = Config::default();
        config.api.max_concurrent = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.api.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_page_size_out_of_range() {
        let mut config = Config::default();
        config.query.page_size = 0;
        assert!(config.validate().is_err());
        config.query.page_size = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_weight() {
        let mut config = Config::default();
        config.scoring.fork_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [query]
            location = "portland"
            strategy = "cursor_bulk"

            [collection]
            target_size = 50
            policy = "oldest"
            "#,
        )
        .unwrap();
        assert_eq!(config.query.location, "portland");
        assert_eq!(config.query.strategy, Strategy::CursorBulk);
        assert_eq!(config.query.page_size, 100);
        assert_eq!(config.collection.target_size, 50);
        assert_eq!(config.collection.policy, ReplacementPolicy::Oldest);
        assert_eq!(config.collection.refresh_days, 7);
        assert_eq!(config.api.token_env, "GITHUB_TOKEN");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_round_trips_through_toml() {
        let text = Config::default().to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.store.dataset_name, "projects");
        assert_eq!(back.scoring.health_smoothing, 10.0);
    }

    #[test]
    fn store_paths_follow_dataset_name() {
        let store = StoreConfig {
            data_dir: PathBuf::from("/tmp/x"),
            dataset_name: "seattle".into(),
        };
        assert_eq!(store.dataset_path(), PathBuf::from("/tmp/x/seattle.json"));
        assert_eq!(store.backup_path(), PathBuf::from("/tmp/x/seattle_backup.json"));
        assert_eq!(
            store.metadata_path(),
            PathBuf::from("/tmp/x/seattle_metadata.json")
        );
    }

    #[test]
    fn load_or_default_falls_back() {
        let config = Config::load_or_default("/definitely/not/here.toml");
        assert_eq!(config.collection.target_size, 10_000);
    }
}
