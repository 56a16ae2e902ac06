// src/pipeline/collect.rs

//! Resumable bulk collection.
//!
//! Pages are admitted into the dataset one at a time. Every
//! `checkpoint_every` pages the dataset is saved first, then the owner cache
//! is flushed, then the checkpoint is written. A crash between those steps
//! only causes pages to be reprocessed, which admission absorbs.

use futures::StreamExt;
use serde::Serialize;

use super::Context;
use super::ingest::{IngestionStats, admit};
use crate::error::{FetchError, Result};
use crate::models::{Checkpoint, CollectionConfig, Dataset, QuerySpec, ReplacementPolicy};
use crate::services::{PagePosition, paginate};
use crate::storage::OwnerLocationCache;

/// Collection settings.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub target_size: usize,
    pub policy: ReplacementPolicy,
    /// Pages between durable checkpoints
    pub checkpoint_every: u32,
    /// Discard an existing checkpoint and start from the first page
    pub restart: bool,
}

impl CollectOptions {
    pub fn from_config(config: &CollectionConfig) -> Self {
        Self {
            target_size: config.target_size,
            policy: config.policy,
            checkpoint_every: config.checkpoint_every_pages,
            restart: false,
        }
    }
}

/// What a collection run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionOutcome {
    pub task_id: String,
    /// Pages processed by this run
    pub pages: u32,
    /// Total records seen for the task, including resumed progress
    pub records_seen: u64,
    pub ingestion: IngestionStats,
    /// Last page of the checkpoint this run resumed from
    pub resumed_from: Option<u32>,
    /// The source reported no further pages
    pub completed: bool,
    pub cancelled: bool,
    /// Page fetch error that stopped the run
    #[serde(skip)]
    pub error: Option<FetchError>,
}

/// Walk `query` from its checkpoint (or the first page) and admit every
/// page into `dataset`.
///
/// A non-fatal fetch error stops the run after persisting progress and is
/// reported in the outcome; credential errors are returned.
pub async fn run_collection(
    ctx: &Context<'_>,
    owners: &mut OwnerLocationCache,
    dataset: &mut Dataset,
    query: &QuerySpec,
    options: &CollectOptions,
) -> Result<CollectionOutcome> {
    let task_id = query.task_id();
    let description = query.describe();
    let mut outcome = CollectionOutcome {
        task_id: task_id.clone(),
        ..Default::default()
    };

    if options.restart && ctx.checkpoints.clear(&task_id).await? {
        log::info!("Discarded checkpoint of {}", task_id);
    }

    let start = match ctx.checkpoints.load(&task_id).await? {
        Some(cp) if cp.query == description => {
            log::info!(
                "Resuming {} after page {} ({} records seen)",
                task_id,
                cp.last_page,
                cp.records_fetched
            );
            outcome.resumed_from = Some(cp.last_page);
            PagePosition {
                cursor: Some(cp.cursor),
                page: cp.last_page,
                records_fetched: cp.records_fetched,
            }
        }
        Some(cp) => {
            log::warn!(
                "Checkpoint of {} was written for '{}'; starting over",
                task_id,
                cp.query
            );
            PagePosition::default()
        }
        None => PagePosition::default(),
    };
    outcome.records_seen = start.records_fetched;

    log::info!("Collecting {} ({})", description, query.strategy);

    let every = options.checkpoint_every.max(1);
    let mut pending: Option<Checkpoint> = None;
    let mut unsaved_pages = 0u32;
    let mut pages = paginate(ctx.source, query, start);

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => {
                outcome.cancelled = true;
                break;
            }
            next = pages.next() => next,
        };

        let page = match next {
            None => {
                outcome.completed = true;
                break;
            }
            Some(Ok(page)) => page,
            Some(Err(FetchError::Cancelled)) => {
                outcome.cancelled = true;
                break;
            }
            Some(Err(e)) => {
                log::warn!("Page {} failed: {}", outcome.pages + 1, e);
                outcome.error = Some(e);
                break;
            }
        };

        let mut records = page.records;
        for record in &mut records {
            owners.enrich(record);
        }
        let stats = admit(records, dataset, options.target_size, options.policy);
        log::info!(
            "Page {}: {} admitted, {} updated, {} rejected, {} evicted ({} records)",
            page.number,
            stats.admitted,
            stats.updated,
            stats.rejected,
            stats.evicted,
            dataset.len()
        );
        outcome.ingestion.merge(stats);
        outcome.pages += 1;
        outcome.records_seen = page.records_fetched;

        let Some(cursor) = page.next_cursor else {
            pending = None;
            outcome.completed = true;
            break;
        };
        pending = Some(Checkpoint::new(
            task_id.clone(),
            description.clone(),
            cursor,
            page.records_fetched,
            page.number,
        ));
        unsaved_pages += 1;

        if unsaved_pages >= every {
            if let Some(checkpoint) = pending.take() {
                persist(ctx, owners, dataset, &checkpoint).await?;
            }
            unsaved_pages = 0;
        }
    }
    drop(pages);

    if let Some(e) = outcome.error.as_ref().filter(|e| e.is_fatal()) {
        return Err(e.clone().into());
    }

    if outcome.completed {
        ctx.store.save(dataset).await?;
        flush_owners(owners).await;
        ctx.checkpoints.clear(&task_id).await?;
        log::info!(
            "Collection of {} complete: {} pages, {} records seen",
            task_id,
            outcome.pages,
            outcome.records_seen
        );
    } else if let Some(checkpoint) = pending {
        persist(ctx, owners, dataset, &checkpoint).await?;
        log::warn!(
            "Collection of {} stopped after page {}; rerun to resume",
            task_id,
            checkpoint.last_page
        );
    } else {
        flush_owners(owners).await;
    }

    Ok(outcome)
}

async fn persist(
    ctx: &Context<'_>,
    owners: &mut OwnerLocationCache,
    dataset: &mut Dataset,
    checkpoint: &Checkpoint,
) -> Result<()> {
    ctx.store.save(dataset).await?;
    flush_owners(owners).await;
    ctx.checkpoints.save(checkpoint).await
}

async fn flush_owners(owners: &mut OwnerLocationCache) {
    if let Err(e) = owners.flush().await {
        log::warn!(
            "Failed to append owner locations to {}: {}",
            owners.path().display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::models::fixtures::record;
    use crate::models::{Record, StoreConfig};
    use crate::services::FakeSource;
    use crate::storage::{CheckpointManager, DatasetStore, LocalStore};
    use crate::utils::shutdown::Shutdown;

    struct Harness {
        _tmp: TempDir,
        store: LocalStore,
        checkpoints: CheckpointManager,
        owners: OwnerLocationCache,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let config = StoreConfig {
                data_dir: tmp.path().to_path_buf(),
                dataset_name: "projects".into(),
            };
            Self {
                store: LocalStore::new(&config),
                checkpoints: CheckpointManager::new(config.checkpoint_dir()),
                owners: OwnerLocationCache::new(config.owner_cache_path()),
                _tmp: tmp,
            }
        }

        fn context<'a>(&'a self, source: &'a FakeSource, shutdown: Shutdown) -> Context<'a> {
            Context {
                source,
                store: &self.store,
                checkpoints: &self.checkpoints,
                shutdown,
            }
        }
    }

    fn five_pages() -> Vec<Vec<Record>> {
        (0..5)
            .map(|p| {
                (0..4)
                    .map(|i| record("owner", &format!("p{}-r{}", p, i), 100 + p * 10 + i))
                    .collect()
            })
            .collect()
    }

    fn options(every: u32) -> CollectOptions {
        CollectOptions {
            target_size: 1000,
            policy: ReplacementPolicy::LowestStars,
            checkpoint_every: every,
            restart: false,
        }
    }

    #[tokio::test]
    async fn complete_run_saves_and_clears_checkpoint() {
        let h = Harness::new();
        let mut owners = OwnerLocationCache::new(h.owners.path());
        let source = FakeSource::with_pages(five_pages());
        let query = QuerySpec::default();
        let mut ds = Dataset::new();

        let outcome = run_collection(
            &h.context(&source, Shutdown::never()),
            &mut owners,
            &mut ds,
            &query,
            &options(1),
        )
        .await
        .unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.pages, 5);
        assert_eq!(outcome.records_seen, 20);
        assert_eq!(outcome.ingestion.admitted, 20);
        assert_eq!(ds.len(), 20);
        assert_eq!(h.store.load().await.unwrap().len(), 20);
        assert!(h.checkpoints.load(&query.task_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_page_resumes_from_next_cursor() {
        let h = Harness::new();
        let query = QuerySpec::default();
        let mut owners = OwnerLocationCache::new(h.owners.path());

        let mut failing = FakeSource::with_pages(five_pages());
        failing
            .page_errors
            .insert(3, FetchError::transient("connection reset", 4));
        let mut ds = Dataset::new();
        let outcome = run_collection(
            &h.context(&failing, Shutdown::never()),
            &mut owners,
            &mut ds,
            &query,
            &options(1),
        )
        .await
        .unwrap();

        assert!(!outcome.completed);
        assert_eq!(outcome.pages, 3);
        assert!(matches!(outcome.error, Some(FetchError::Transient { .. })));
        let cp = h.checkpoints.load(&query.task_id()).await.unwrap().unwrap();
        assert_eq!(cp.last_page, 3);
        assert_eq!(cp.cursor, "3");
        assert_eq!(cp.records_fetched, 12);
        assert_eq!(h.store.load().await.unwrap().len(), 12);

        let healthy = FakeSource::with_pages(five_pages());
        let mut ds = h.store.load().await.unwrap();
        let resumed = run_collection(
            &h.context(&healthy, Shutdown::never()),
            &mut owners,
            &mut ds,
            &query,
            &options(1),
        )
        .await
        .unwrap();

        assert_eq!(healthy.calls(), vec![Some("3".to_string()), Some("4".to_string())]);
        assert_eq!(resumed.resumed_from, Some(3));
        assert_eq!(resumed.pages, 2);
        assert_eq!(resumed.records_seen, 20);
        assert_eq!(resumed.ingestion.admitted, 8);
        assert_eq!(resumed.ingestion.updated + resumed.ingestion.unchanged, 0);
        assert_eq!(ds.len(), 20);
        assert!(h.checkpoints.load(&query.task_id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_persists_progress_since_last_checkpoint() {
        let h = Harness::new();
        let query = QuerySpec::default();
        let mut owners = OwnerLocationCache::new(h.owners.path());
        let (tx, shutdown) = Shutdown::channel();

        let mut source = FakeSource::with_pages(five_pages());
        source.cancel_at = Some((3, Arc::new(tx)));
        let mut ds = Dataset::new();
        let outcome = run_collection(
            &h.context(&source, shutdown),
            &mut owners,
            &mut ds,
            &query,
            &options(2),
        )
        .await
        .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.pages, 3);
        let cp = h.checkpoints.load(&query.task_id()).await.unwrap().unwrap();
        assert_eq!(cp.last_page, 3);
        assert_eq!(cp.cursor, "3");
        // The page in flight at cancellation is discarded.
        assert_eq!(h.store.load().await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn restart_ignores_checkpoint() {
        let h = Harness::new();
        let query = QuerySpec::default();
        h.checkpoints
            .save(&Checkpoint::new(query.task_id(), query.describe(), "3", 12, 3))
            .await
            .unwrap();

        let source = FakeSource::with_pages(five_pages());
        let mut owners = OwnerLocationCache::new(h.owners.path());
        let mut ds = Dataset::new();
        let outcome = run_collection(
            &h.context(&source, Shutdown::never()),
            &mut owners,
            &mut ds,
            &query,
            &CollectOptions {
                restart: true,
                ..options(1)
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.resumed_from, None);
        assert_eq!(source.calls().first(), Some(&None));
        assert_eq!(ds.len(), 20);
    }

    #[tokio::test]
    async fn checkpoint_for_changed_query_is_ignored() {
        let h = Harness::new();
        let query = QuerySpec::default();
        h.checkpoints
            .save(&Checkpoint::new(query.task_id(), "location:elsewhere", "3", 12, 3))
            .await
            .unwrap();

        let source = FakeSource::with_pages(five_pages());
        let mut owners = OwnerLocationCache::new(h.owners.path());
        let mut ds = Dataset::new();
        let outcome = run_collection(
            &h.context(&source, Shutdown::never()),
            &mut owners,
            &mut ds,
            &query,
            &options(1),
        )
        .await
        .unwrap();
        assert_eq!(outcome.resumed_from, None);
        assert_eq!(outcome.pages, 5);
    }

    #[tokio::test]
    async fn unauthorized_page_is_returned_as_error() {
        let h = Harness::new();
        let mut source = FakeSource::with_pages(five_pages());
        source
            .page_errors
            .insert(0, FetchError::Unauthorized("bad credentials".into()));
        let mut owners = OwnerLocationCache::new(h.owners.path());
        let mut ds = Dataset::new();

        let result = run_collection(
            &h.context(&source, Shutdown::never()),
            &mut owners,
            &mut ds,
            &QuerySpec::default(),
            &options(1),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn owner_locations_fill_and_flush() {
        let h = Harness::new();
        let mut page = vec![record("alice", "one", 10), record("alice", "two", 5)];
        page[0].owner_location = Some("Seattle, WA".into());
        let source = FakeSource::with_pages(vec![page]);
        let mut owners = OwnerLocationCache::new(h.owners.path());
        let mut ds = Dataset::new();

        run_collection(
            &h.context(&source, Shutdown::never()),
            &mut owners,
            &mut ds,
            &QuerySpec::default(),
            &options(1),
        )
        .await
        .unwrap();

        let two = ds.lookup(&crate::models::RepoKey::new("alice", "two")).unwrap();
        assert_eq!(two.owner_location.as_deref(), Some("Seattle, WA"));
        assert_eq!(owners.pending(), 0);
        let reloaded = OwnerLocationCache::load(h.owners.path()).await.unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}
