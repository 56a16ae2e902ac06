// src/pipeline/reconcile.rs

//! Staleness detection and reconciliation against the remote source.
//!
//! A failed refresh never deletes or modifies the stored record. Failures
//! are independent per key; only credential errors abort the run.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::delta::record_delta;
use crate::error::{FetchError, FetchResult, Result};
use crate::models::{Dataset, Record, RepoKey};
use crate::utils::shutdown::Shutdown;

/// Keys whose last successful fetch is older than `max_age` at `now`.
pub fn find_stale(dataset: &Dataset, max_age: Duration, now: DateTime<Utc>) -> BTreeSet<RepoKey> {
    dataset
        .records()
        .filter(|r| r.age(now) > max_age)
        .map(Record::key)
        .collect()
}

/// Why a refresh failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    NotFound,
    RateLimited,
    TransientError,
}

impl FailureReason {
    pub fn from_error(error: &FetchError) -> Self {
        match error {
            FetchError::NotFound(_) => Self::NotFound,
            FetchError::RateLimited { .. } => Self::RateLimited,
            _ => Self::TransientError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::RateLimited => "rate-limited",
            Self::TransientError => "transient-error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedKey {
    pub key: RepoKey,
    pub reason: FailureReason,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatedKey {
    pub key: RepoKey,
    /// Fields that differed from the stored version
    pub changed: Vec<&'static str>,
}

/// Per-key outcomes of a reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub updated: Vec<UpdatedKey>,
    pub unchanged: Vec<RepoKey>,
    pub failed: Vec<FailedKey>,
    /// Keys never fetched because the run was cancelled
    pub skipped: Vec<RepoKey>,
}

impl ReconciliationReport {
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }

    pub fn unchanged_count(&self) -> usize {
        self.unchanged.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Successful refreshes, changed or not.
    pub fn succeeded(&self) -> usize {
        self.updated.len() + self.unchanged.len()
    }

    pub fn failures_by(&self, reason: FailureReason) -> usize {
        self.failed.iter().filter(|f| f.reason == reason).count()
    }

    pub fn was_cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Execution settings for [`reconcile`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Fetches in flight at once
    pub concurrency: usize,
    /// Stop issuing fetches when fired
    pub shutdown: Shutdown,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            shutdown: Shutdown::never(),
        }
    }
}

/// Refresh `keys` with `fetch`, merging results into `dataset`.
///
/// - changed upstream: the record is replaced and reported `updated`
/// - identical: only `last_fetched_at` advances, reported `unchanged`
/// - fetch failed: the record is left as is, reported `failed`
///
/// Keys not present in the dataset are ignored. Results are applied on the
/// calling task; fetches run with bounded concurrency.
pub async fn reconcile<F, Fut>(
    dataset: &mut Dataset,
    keys: impl IntoIterator<Item = RepoKey>,
    fetch: F,
    options: &ReconcileOptions,
) -> Result<ReconciliationReport>
where
    F: Fn(RepoKey) -> Fut,
    Fut: Future<Output = FetchResult<Record>>,
{
    let keys: Vec<RepoKey> = keys
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|k| {
            let known = dataset.contains(k);
            if !known {
                log::debug!("Skipping reconciliation of unknown key {}", k);
            }
            known
        })
        .collect();

    let mut report = ReconciliationReport::default();
    let mut processed: HashSet<RepoKey> = HashSet::with_capacity(keys.len());

    let mut results = stream::iter(keys.clone())
        .map(|key| {
            let fut = fetch(key.clone());
            async move { (key, fut.await) }
        })
        .buffer_unordered(options.concurrency.max(1));

    loop {
        let next = tokio::select! {
            biased;
            _ = options.shutdown.cancelled() => {
                log::warn!("Reconciliation cancelled; remaining keys are skipped");
                break;
            }
            next = results.next() => next,
        };
        let Some((key, result)) = next else {
            break;
        };

        match result {
            Ok(fresh) => apply_fresh(dataset, &key, fresh, &mut report),
            Err(FetchError::Cancelled) => continue,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                let reason = FailureReason::from_error(&e);
                log::warn!("Refresh of {} failed ({}): {}", key, reason, e);
                report.failed.push(FailedKey {
                    key: key.clone(),
                    reason,
                    message: e.to_string(),
                });
            }
        }
        processed.insert(key);
    }
    drop(results);

    report.skipped = keys.into_iter().filter(|k| !processed.contains(k)).collect();

    log::info!(
        "Reconciled: {} updated, {} unchanged, {} failed, {} skipped",
        report.updated.len(),
        report.unchanged.len(),
        report.failed.len(),
        report.skipped.len()
    );
    Ok(report)
}

fn apply_fresh(
    dataset: &mut Dataset,
    key: &RepoKey,
    mut fresh: Record,
    report: &mut ReconciliationReport,
) {
    let Some(previous) = dataset.lookup(key) else {
        return;
    };

    let fresh_key = fresh.key();
    if fresh_key != *key {
        // Renamed or transferred upstream; the old identity no longer resolves.
        report.failed.push(FailedKey {
            key: key.clone(),
            reason: FailureReason::NotFound,
            message: format!("repository now resolves to {}", fresh_key),
        });
        return;
    }

    if fresh.owner_location.is_none() {
        fresh.owner_location = previous.owner_location.clone();
    }

    let delta = record_delta(previous, &fresh);
    if delta.is_empty() {
        let touched = previous.touched(fresh.last_fetched_at);
        dataset.upsert(touched);
        report.unchanged.push(key.clone());
    } else {
        log::debug!("{} changed: {}", key, delta.changed.join(", "));
        dataset.upsert(fresh);
        report.updated.push(UpdatedKey {
            key: key.clone(),
            changed: delta.changed,
        });
    }
}
