// src/pipeline/update.rs

//! Maintenance runs composed from reconciliation and collection.

use chrono::{Duration, Utc};
use serde::Serialize;

use super::Context;
use super::collect::{CollectOptions, CollectionOutcome, run_collection};
use super::reconcile::{ReconcileOptions, ReconciliationReport, find_stale, reconcile};
use crate::error::Result;
use crate::models::{Dataset, QuerySpec};
use crate::storage::OwnerLocationCache;

/// Result of [`full_update`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateSummary {
    pub refresh: ReconciliationReport,
    /// None when the run was cancelled before collection started
    pub collection: Option<CollectionOutcome>,
}

/// Re-fetch every record older than `max_age` and save the dataset.
pub async fn refresh_stale(
    ctx: &Context<'_>,
    dataset: &mut Dataset,
    max_age: Duration,
    concurrency: usize,
) -> Result<ReconciliationReport> {
    let stale = find_stale(dataset, max_age, Utc::now());
    if stale.is_empty() {
        log::info!("No records older than {} days", max_age.num_days());
        return Ok(ReconciliationReport::default());
    }
    log::info!(
        "Refreshing {} of {} records older than {} days",
        stale.len(),
        dataset.len(),
        max_age.num_days()
    );

    let source = ctx.source;
    let options = ReconcileOptions {
        concurrency,
        shutdown: ctx.shutdown.clone(),
    };
    let report = reconcile(
        dataset,
        stale,
        |key| async move { source.fetch_repo(&key).await },
        &options,
    )
    .await?;

    if report.succeeded() > 0 {
        ctx.store.save(dataset).await?;
    }
    for failure in &report.failed {
        log::debug!("  {} {}: {}", failure.reason, failure.key, failure.message);
    }
    Ok(report)
}

/// Run a bulk collection for `query`.
pub async fn collect_new(
    ctx: &Context<'_>,
    owners: &mut OwnerLocationCache,
    dataset: &mut Dataset,
    query: &QuerySpec,
    options: &CollectOptions,
) -> Result<CollectionOutcome> {
    let before = dataset.len();
    let outcome = run_collection(ctx, owners, dataset, query, options).await?;
    log::info!(
        "Collection: {} pages, {} seen, {} admitted, {} evicted, {} rejected ({} -> {} records)",
        outcome.pages,
        outcome.ingestion.total_seen(),
        outcome.ingestion.admitted,
        outcome.ingestion.evicted,
        outcome.ingestion.rejected,
        before,
        dataset.len()
    );
    Ok(outcome)
}

/// Refresh stale records, then collect new ones.
pub async fn full_update(
    ctx: &Context<'_>,
    owners: &mut OwnerLocationCache,
    dataset: &mut Dataset,
    query: &QuerySpec,
    options: &CollectOptions,
    max_age: Duration,
    concurrency: usize,
) -> Result<UpdateSummary> {
    log::info!("Step 1/2: Refreshing stale records...");
    let refresh = refresh_stale(ctx, dataset, max_age, concurrency).await?;

    if ctx.shutdown.is_cancelled() {
        log::warn!("Cancelled after refresh; skipping collection");
        return Ok(UpdateSummary {
            refresh,
            collection: None,
        });
    }

    log::info!("Step 2/2: Collecting new records...");
    let collection = collect_new(ctx, owners, dataset, query, options).await?;
    Ok(UpdateSummary {
        refresh,
        collection: Some(collection),
    })
}
