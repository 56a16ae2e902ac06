// src/models/dataset.rs

//! In-memory dataset: records keyed by `owner/name` plus a metadata envelope.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use super::record::{Record, RepoKey};

/// Metadata envelope stored alongside the records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Number of records at the last save
    pub total_count: usize,
    /// Time of the last successful save
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Save generation, incremented on every successful save
    #[serde(default)]
    pub version: u64,
}

/// The persisted collection of tracked repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub metadata: DatasetMetadata,
    #[serde(default, deserialize_with = "unique_records")]
    records: BTreeMap<RepoKey, Record>,
}

/// Reject entries whose keys collide once normalized instead of letting
/// the later one silently replace the earlier.
fn unique_records<'de, D>(deserializer: D) -> Result<BTreeMap<RepoKey, Record>, D::Error>
where
    D: Deserializer<'de>,
{
    struct RecordsVisitor;

    impl<'de> Visitor<'de> for RecordsVisitor {
        type Value = BTreeMap<RepoKey, Record>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of owner/name keys to records")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut records = BTreeMap::new();
            while let Some((raw, record)) = map.next_entry::<String, Record>()? {
                let key = RepoKey::parse(&raw).map_err(de::Error::custom)?;
                if records.contains_key(&key) {
                    return Err(de::Error::custom(format!(
                        "duplicate entry '{}' (normalizes to '{}')",
                        raw, key
                    )));
                }
                records.insert(key, record);
            }
            Ok(records)
        }
    }

    deserializer.deserialize_map(RecordsVisitor)
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from records; later duplicates replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut dataset = Self::new();
        for record in records {
            dataset.upsert(record);
        }
        dataset
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lookup(&self, key: &RepoKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &RepoKey) -> bool {
        self.records.contains_key(key)
    }

    /// Insert or fully replace a record, returning the previous version.
    pub fn upsert(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.key(), record)
    }

    pub fn remove(&mut self, key: &RepoKey) -> Option<Record> {
        self.records.remove(key)
    }

    /// Records in key order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Metadata the next successful save will carry.
    pub fn next_metadata(&self, now: DateTime<Utc>) -> DatasetMetadata {
        DatasetMetadata {
            total_count: self.len(),
            last_updated: Some(now),
            version: self.metadata.version + 1,
        }
    }

    /// Check that every map key matches the key derived from its record.
    pub fn check_integrity(&self) -> std::result::Result<(), String> {
        for (key, record) in &self.records {
            let derived = record.key();
            if *key != derived {
                return Err(format!(
                    "entry '{}' holds record for '{}'",
                    key, derived
                ));
            }
        }
        Ok(())
    }
}
