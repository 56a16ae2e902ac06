//! Source Ranker CLI
//!
//! Local entry point for collecting, refreshing and ranking the dataset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use source_ranker::{
    error::{AppError, Result},
    models::{Config, ReplacementPolicy},
    pipeline::{self, CollectOptions, Context, DatasetSummary},
    scoring,
    services::GitHubClient,
    storage::{CheckpointManager, DatasetStore, LocalStore, OwnerLocationCache},
    utils::{fs, shutdown::Shutdown},
};

/// Source Ranker - Regional GitHub Repository Collector
#[derive(Parser, Debug)]
#[command(
    name = "source-ranker",
    version,
    about = "Incrementally collect and rank GitHub repositories by region"
)]
struct Cli {
    /// Path to the configuration file (default: {data_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overriding store.data_dir
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Stop gracefully after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a summary of the current dataset
    Status {
        /// Number of top records to show
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Re-fetch records older than the refresh window
    Refresh {
        /// Refresh window in days (default: collection.refresh_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Collect new repositories, resuming from the last checkpoint
    Collect {
        /// Maximum dataset size (default: collection.target_size)
        #[arg(long)]
        target: Option<usize>,

        /// Replacement policy: lowest_stars, oldest or lowest_activity
        #[arg(long)]
        policy: Option<ReplacementPolicy>,

        /// Location to search (default: query.location)
        #[arg(long)]
        location: Option<String>,

        /// Ignore any checkpoint and start from the first page
        #[arg(long)]
        restart: bool,
    },

    /// Run full update: Refresh → Collect
    Update {
        #[arg(long)]
        target: Option<usize>,

        #[arg(long)]
        days: Option<u32>,

        #[arg(long)]
        policy: Option<ReplacementPolicy>,

        #[arg(long)]
        restart: bool,
    },

    /// Rank records by influence score
    Rank {
        /// Only rank records in this language (case-insensitive)
        #[arg(long)]
        language: Option<String>,

        /// Number of records to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List collection checkpoints
    Checkpoints {
        /// Remove the checkpoint of this task
        #[arg(long)]
        clear: Option<String>,
    },

    /// Replace the live dataset with its backup
    RestoreBackup,

    /// Validate configuration, credentials and the stored dataset
    Validate,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Fire the shutdown signal on Ctrl-C or after `timeout_secs`.
fn spawn_shutdown(timeout_secs: Option<u64>) -> Shutdown {
    let (tx, shutdown) = Shutdown::channel();
    tokio::spawn(async move {
        let timeout = async {
            match timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::warn!("Interrupt received; stopping after the current page...");
            }
            _ = timeout => {
                log::warn!("Timeout reached; stopping after the current page...");
            }
        }
        let _ = tx.send(true);
    });
    shutdown
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli).await;
    if let Err(AppError::CorruptStore { path, .. }) = &result {
        log::error!(
            "Dataset at {} is unreadable. Run 'source-ranker restore-backup' to recover the previous save.",
            path
        );
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let base_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| Config::default().store.data_dir);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join("config.toml"));

    let mut config = Config::load_or_default(&config_path);
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = dir.clone();
    }
    if !matches!(cli.command, Command::Validate | Command::InitConfig { .. }) {
        config.validate()?;
    }
    log::info!("Loaded configuration from {}", config_path.display());

    let store = LocalStore::new(&config.store);
    let checkpoints = CheckpointManager::new(config.store.checkpoint_dir());

    match cli.command {
        Command::Status { top } => {
            let dataset = store.load().await?;
            DatasetSummary::compute(
                &dataset,
                &config.scoring,
                config.collection.max_age(),
                Utc::now(),
                top,
            )
            .log();

            let pending = checkpoints.list().await?;
            if !pending.is_empty() {
                log::info!("{} collection(s) can be resumed", pending.len());
            }
        }

        Command::Refresh { days } => {
            let shutdown = spawn_shutdown(cli.timeout_secs);
            let client = GitHubClient::from_env(&config.api)?.with_shutdown(shutdown.clone());
            let ctx = Context {
                source: &client,
                store: &store,
                checkpoints: &checkpoints,
                shutdown,
            };

            let max_age = days
                .map(|d| chrono::Duration::days(i64::from(d)))
                .unwrap_or_else(|| config.collection.max_age());
            let mut dataset = store.load().await?;
            let report =
                pipeline::refresh_stale(&ctx, &mut dataset, max_age, config.api.max_concurrent)
                    .await?;
            log_refresh(&report);
        }

        Command::Collect {
            target,
            policy,
            location,
            restart,
        } => {
            let shutdown = spawn_shutdown(cli.timeout_secs);
            let client = GitHubClient::from_env(&config.api)?.with_shutdown(shutdown.clone());
            let ctx = Context {
                source: &client,
                store: &store,
                checkpoints: &checkpoints,
                shutdown,
            };

            let mut query = config.query.clone();
            if let Some(location) = location {
                query.location = location;
            }
            let mut options = CollectOptions::from_config(&config.collection);
            options.target_size = target.unwrap_or(options.target_size);
            options.policy = policy.unwrap_or(options.policy);
            options.restart = restart;

            let mut owners = OwnerLocationCache::load(config.store.owner_cache_path()).await?;
            let mut dataset = store.load().await?;
            let outcome =
                pipeline::collect_new(&ctx, &mut owners, &mut dataset, &query, &options).await?;

            if let Some(e) = outcome.error {
                log::error!("Collection stopped: {}. Run the same command to resume.", e);
                return Err(e.into());
            }
        }

        Command::Update {
            target,
            days,
            policy,
            restart,
        } => {
            let shutdown = spawn_shutdown(cli.timeout_secs);
            let client = GitHubClient::from_env(&config.api)?.with_shutdown(shutdown.clone());
            let ctx = Context {
                source: &client,
                store: &store,
                checkpoints: &checkpoints,
                shutdown,
            };

            let max_age = days
                .map(|d| chrono::Duration::days(i64::from(d)))
                .unwrap_or_else(|| config.collection.max_age());
            let mut options = CollectOptions::from_config(&config.collection);
            options.target_size = target.unwrap_or(options.target_size);
            options.policy = policy.unwrap_or(options.policy);
            options.restart = restart;

            let mut owners = OwnerLocationCache::load(config.store.owner_cache_path()).await?;
            let mut dataset = store.load().await?;
            let summary = pipeline::full_update(
                &ctx,
                &mut owners,
                &mut dataset,
                &config.query,
                &options,
                max_age,
                config.api.max_concurrent,
            )
            .await?;

            log_refresh(&summary.refresh);
            if let Some(e) = summary.collection.and_then(|c| c.error) {
                log::error!("Collection stopped: {}. Run the same command to resume.", e);
                return Err(e.into());
            }
        }

        Command::Rank { language, limit } => {
            let dataset = store.load().await?;
            let ranked = scoring::rank(
                dataset.records(),
                language.as_deref(),
                &config.scoring,
                Utc::now(),
            );
            if ranked.is_empty() {
                log::info!("No records to rank.");
            }
            for entry in ranked.iter().take(limit) {
                log::info!(
                    "{:>4}. {:<40} {:>7} stars  {:<12} {:.4}",
                    entry.rank,
                    entry.record.key().to_string(),
                    entry.record.stars,
                    entry.record.language.as_deref().unwrap_or("-"),
                    entry.score
                );
            }
        }

        Command::Checkpoints { clear } => {
            if let Some(task_id) = clear {
                if checkpoints.clear(&task_id).await? {
                    log::info!("Cleared checkpoint {}", task_id);
                } else {
                    log::warn!("No checkpoint named {}", task_id);
                }
                return Ok(());
            }

            let list = checkpoints.list().await?;
            if list.is_empty() {
                log::info!("No checkpoints in {}", checkpoints.dir().display());
            }
            for cp in list {
                log::info!(
                    "{}: page {}, {} records, saved {} ({})",
                    cp.task_id,
                    cp.last_page,
                    cp.records_fetched,
                    cp.saved_at.to_rfc3339(),
                    cp.query
                );
            }
        }

        Command::RestoreBackup => {
            let restored = store.restore_backup().await?;
            log::info!(
                "Live dataset now holds {} records (version {})",
                restored.len(),
                restored.metadata.version
            );
        }

        Command::Validate => validate(&config_path, &config, &store).await?,

        Command::InitConfig { force } => init_config(&config_path, force).await?,
    }

    log::info!("Done!");

    Ok(())
}

fn log_refresh(report: &pipeline::ReconciliationReport) {
    log::info!(
        "Refresh: {} updated, {} unchanged, {} failed ({} not found, {} rate limited)",
        report.updated_count(),
        report.unchanged_count(),
        report.failed_count(),
        report.failures_by(pipeline::FailureReason::NotFound),
        report.failures_by(pipeline::FailureReason::RateLimited)
    );
    if report.was_cancelled() {
        log::warn!("{} records were not refreshed before shutdown", report.skipped.len());
    }
}

async fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        log::warn!(
            "Config already exists at {}. Use --force to overwrite.",
            path.display()
        );
        return Ok(());
    }
    let toml = Config::default().to_toml()?;
    fs::write_atomic(path, toml.as_bytes()).await?;
    log::info!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn validate(config_path: &Path, config: &Config, store: &LocalStore) -> Result<()> {
    log::info!("Validating configuration...");

    if config_path.exists() {
        // Surface parse errors that load_or_default only warns about.
        Config::load(config_path)?;
    }
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }
    log::info!("✓ Config OK");

    if std::env::var(&config.api.token_env).is_ok_and(|t| !t.trim().is_empty()) {
        log::info!("✓ {} is set", config.api.token_env);
    } else {
        log::warn!(
            "{} is not set; requests will be unauthenticated",
            config.api.token_env
        );
    }

    let dataset = store.load().await?;
    log::info!("✓ Dataset OK ({} records)", dataset.len());

    log::info!("All validations passed!");
    Ok(())
}
