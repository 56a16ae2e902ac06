// src/pipeline/mod.rs

//! Pipeline entry points for dataset maintenance.
//!
//! - `refresh_stale`: Re-fetch records older than the refresh window
//! - `collect_new`: Walk search pages and admit new records under capacity
//! - `full_update`: Both, refresh first
//! - `DatasetSummary`: Counts and top records for status output

pub mod collect;
pub mod delta;
pub mod ingest;
pub mod reconcile;
pub mod status;
pub mod update;

use crate::services::RepoSource;
use crate::storage::{CheckpointManager, DatasetStore};
use crate::utils::shutdown::Shutdown;

pub use collect::{CollectOptions, CollectionOutcome, run_collection};
pub use delta::{RecordDelta, record_delta};
pub use ingest::{IngestionStats, admit};
pub use reconcile::{
    FailedKey, FailureReason, ReconcileOptions, ReconciliationReport, UpdatedKey, find_stale,
    reconcile,
};
pub use status::{DatasetSummary, StarBucket};
pub use update::{UpdateSummary, collect_new, full_update, refresh_stale};

/// Collaborators shared by pipeline runs.
#[derive(Clone)]
pub struct Context<'a> {
    pub source: &'a dyn RepoSource,
    pub store: &'a dyn DatasetStore,
    pub checkpoints: &'a CheckpointManager,
    pub shutdown: Shutdown,
}
