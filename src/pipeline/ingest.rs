// src/pipeline/ingest.rs

//! Capacity-bounded admission of newly discovered records.
//!
//! Candidates already in the dataset refresh their record in place. New
//! candidates compete with the stored records under the replacement policy:
//! when the dataset would overflow, the lowest-ranked records leave, whether
//! stored or incoming. A candidate that ties a stored record on the policy
//! value loses, so equal records never churn.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::delta::record_delta;
use crate::models::{Dataset, Record, RepoKey, ReplacementPolicy};

/// Outcome of one [`admit`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    /// New records inserted
    pub admitted: usize,
    /// New records turned away because the dataset was full
    pub rejected: usize,
    /// Stored records removed to make room
    pub evicted: usize,
    /// Stored records whose upstream data changed
    pub updated: usize,
    /// Stored records seen again without changes
    pub unchanged: usize,
    pub admitted_keys: Vec<RepoKey>,
    pub rejected_keys: Vec<RepoKey>,
    pub evicted_keys: Vec<RepoKey>,
}

impl IngestionStats {
    /// Accumulate another batch.
    pub fn merge(&mut self, other: IngestionStats) {
        self.admitted += other.admitted;
        self.rejected += other.rejected;
        self.evicted += other.evicted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.admitted_keys.extend(other.admitted_keys);
        self.rejected_keys.extend(other.rejected_keys);
        self.evicted_keys.extend(other.evicted_keys);
    }

    pub fn total_seen(&self) -> usize {
        self.admitted + self.rejected + self.updated + self.unchanged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    Candidate,
    Stored,
}

/// Merge `candidates` into `dataset` without exceeding `target_size`.
///
/// Duplicates within the batch collapse to the last occurrence.
pub fn admit(
    candidates: impl IntoIterator<Item = Record>,
    dataset: &mut Dataset,
    target_size: usize,
    policy: ReplacementPolicy,
) -> IngestionStats {
    let mut stats = IngestionStats::default();

    let mut batch: BTreeMap<RepoKey, Record> = BTreeMap::new();
    for record in candidates {
        batch.insert(record.key(), record);
    }

    let mut fresh: Vec<Record> = Vec::new();
    for (key, mut record) in batch {
        let Some(previous) = dataset.lookup(&key) else {
            fresh.push(record);
            continue;
        };
        if record.owner_location.is_none() {
            record.owner_location = previous.owner_location.clone();
        }
        if record_delta(previous, &record).is_empty() {
            let touched = previous.touched(record.last_fetched_at);
            dataset.upsert(touched);
            stats.unchanged += 1;
        } else {
            dataset.upsert(record);
            stats.updated += 1;
        }
    }

    let excess = (dataset.len() + fresh.len()).saturating_sub(target_size);
    let (evicted, rejected) = if excess == 0 {
        (Vec::new(), HashSet::new())
    } else {
        select_victims(dataset, &fresh, excess, policy)
    };

    for key in evicted {
        if dataset.remove(&key).is_some() {
            log::debug!("Evicted {} ({})", key, policy);
            stats.evicted += 1;
            stats.evicted_keys.push(key);
        }
    }

    for record in fresh {
        let key = record.key();
        if rejected.contains(&key) {
            stats.rejected += 1;
            stats.rejected_keys.push(key);
        } else {
            dataset.upsert(record);
            stats.admitted += 1;
            stats.admitted_keys.push(key);
        }
    }

    if stats.evicted > 0 || stats.rejected > 0 {
        log::info!(
            "Capacity {} reached: {} admitted, {} evicted, {} rejected ({})",
            target_size,
            stats.admitted,
            stats.evicted,
            stats.rejected,
            policy
        );
    }
    stats
}

/// Pick the `excess` lowest-ranked records across stored and fresh ones.
fn select_victims(
    dataset: &Dataset,
    fresh: &[Record],
    excess: usize,
    policy: ReplacementPolicy,
) -> (Vec<RepoKey>, HashSet<RepoKey>) {
    let mut pool: Vec<(Origin, &Record)> = dataset
        .records()
        .map(|r| (Origin::Stored, r))
        .chain(fresh.iter().map(|r| (Origin::Candidate, r)))
        .collect();

    pool.sort_by(|(oa, a), (ob, b)| {
        policy
            .value_cmp(a, b)
            .then_with(|| oa.cmp(ob))
            .then_with(|| policy.tie_cmp(a, b))
    });

    let mut evicted = Vec::new();
    let mut rejected = HashSet::new();
    for (origin, record) in pool.into_iter().take(excess) {
        match origin {
            Origin::Stored => evicted.push(record.key()),
            Origin::Candidate => {
                rejected.insert(record.key());
            }
        }
    }
    (evicted, rejected)
}
