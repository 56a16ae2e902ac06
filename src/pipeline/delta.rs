// src/pipeline/delta.rs

//! Field-level comparison between two versions of a record.
//!
//! Used to tell a real upstream change from a refetch of identical data.
//! Only source-reported fields take part; `last_fetched_at` and the cached
//! `activity_score` are local.

use serde::Serialize;

use crate::models::Record;

/// Names of the fields that differ between two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordDelta {
    pub changed: Vec<&'static str>,
}

impl RecordDelta {
    /// Check if there are any changes.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Compare `previous` with `current` on every source-reported field.
pub fn record_delta(previous: &Record, current: &Record) -> RecordDelta {
    let mut changed = Vec::new();

    macro_rules! compare {
        ($($field:ident),* $(,)?) => {
            $(
                if previous.$field != current.$field {
                    changed.push(stringify!($field));
                }
            )*
        };
    }

    compare!(
        owner,
        name,
        description,
        url,
        stars,
        forks,
        watchers,
        open_issues,
        created_at,
        updated_at,
        pushed_at,
        language,
        license,
        is_fork,
        is_archived,
        owner_location,
    );

    RecordDelta { changed }
}
