// src/models/mod.rs

//! Domain models for the collector.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod checkpoint;
mod config;
mod dataset;
mod policy;
mod query;
mod record;

#[cfg(test)]
pub(crate) use record::fixtures;

// Re-export all public types
pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint};
pub use config::{ApiConfig, CollectionConfig, Config, ScoringConfig, StoreConfig};
pub use dataset::{Dataset, DatasetMetadata};
pub use policy::ReplacementPolicy;
pub use query::{QuerySpec, Strategy};
pub use record::{Record, RepoKey};
