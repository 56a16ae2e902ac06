// src/pipeline/status.rs

//! Read-only dataset summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::reconcile::find_stale;
use crate::models::{Dataset, RepoKey, ScoringConfig};
use crate::scoring;

/// Star ranges, highest first. A record lands in the first range whose
/// lower bound it reaches.
const STAR_BUCKETS: [(&str, u64); 9] = [
    ("10000+", 10_000),
    ("5000-9999", 5_000),
    ("1000-4999", 1_000),
    ("500-999", 500),
    ("100-499", 100),
    ("50-99", 50),
    ("10-49", 10),
    ("1-9", 1),
    ("0", 0),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StarBucket {
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopRecord {
    pub rank: usize,
    pub key: RepoKey,
    pub stars: u64,
    pub score: f64,
    pub language: Option<String>,
}

/// Counts and highlights of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub total_count: usize,
    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub total_stars: u64,
    pub average_stars: f64,
    pub highest: Option<(RepoKey, u64)>,
    pub lowest: Option<(RepoKey, u64)>,
    /// Records per primary language, "Unknown" when absent
    pub languages: BTreeMap<String, usize>,
    pub star_buckets: Vec<StarBucket>,
    /// Records older than the refresh window
    pub stale_count: usize,
    pub top: Vec<TopRecord>,
}

impl DatasetSummary {
    pub fn compute(
        dataset: &Dataset,
        scoring: &ScoringConfig,
        max_age: Duration,
        now: DateTime<Utc>,
        top_n: usize,
    ) -> Self {
        let total_count = dataset.len();
        let total_stars: u64 = dataset.records().map(|r| r.stars).fold(0, u64::saturating_add);
        let average_stars = if total_count == 0 {
            0.0
        } else {
            total_stars as f64 / total_count as f64
        };

        let highest = dataset
            .records()
            .max_by(|a, b| a.stars.cmp(&b.stars).then_with(|| b.key().cmp(&a.key())))
            .map(|r| (r.key(), r.stars));
        let lowest = dataset
            .records()
            .min_by(|a, b| a.stars.cmp(&b.stars).then_with(|| a.key().cmp(&b.key())))
            .map(|r| (r.key(), r.stars));

        let mut languages = BTreeMap::new();
        for record in dataset.records() {
            let language = record.language.clone().unwrap_or_else(|| "Unknown".into());
            *languages.entry(language).or_insert(0) += 1;
        }

        let mut star_buckets: Vec<StarBucket> = STAR_BUCKETS
            .iter()
            .map(|&(label, _)| StarBucket { label, count: 0 })
            .collect();
        for record in dataset.records() {
            if let Some(i) = STAR_BUCKETS.iter().position(|(_, min)| record.stars >= *min) {
                star_buckets[i].count += 1;
            }
        }

        let top = scoring::rank(dataset.records(), None, scoring, now)
            .into_iter()
            .take(top_n)
            .map(|r| TopRecord {
                rank: r.rank,
                key: r.record.key(),
                stars: r.record.stars,
                score: r.score,
                language: r.record.language.clone(),
            })
            .collect();

        Self {
            total_count,
            version: dataset.metadata.version,
            last_updated: dataset.metadata.last_updated,
            total_stars,
            average_stars,
            highest,
            lowest,
            languages,
            star_buckets,
            stale_count: find_stale(dataset, max_age, now).len(),
            top,
        }
    }

    /// Write the summary to the log.
    pub fn log(&self) {
        log::info!(
            "Dataset: {} records, version {}, last updated {}",
            self.total_count,
            self.version,
            self.last_updated
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into())
        );
        log::info!(
            "Stars: {} total, {:.1} average",
            self.total_stars,
            self.average_stars
        );
        if let Some((key, stars)) = &self.highest {
            log::info!("  Highest: {} ({} stars)", key, stars);
        }
        if let Some((key, stars)) = &self.lowest {
            log::info!("  Lowest: {} ({} stars)", key, stars);
        }
        log::info!("Stale records: {}", self.stale_count);

        log::info!("Star distribution:");
        for bucket in self.star_buckets.iter().filter(|b| b.count > 0) {
            log::info!("  {:>10}: {}", bucket.label, bucket.count);
        }

        let mut languages: Vec<(&String, &usize)> = self.languages.iter().collect();
        languages.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        log::info!("Languages:");
        for (language, count) in languages.into_iter().take(10) {
            log::info!("  {:<16} {}", language, count);
        }

        if !self.top.is_empty() {
            log::info!("Top {} by influence:", self.top.len());
            for entry in &self.top {
                log::info!(
                    "  {:>3}. {} ({} stars, score {:.3})",
                    entry.rank,
                    entry.key,
                    entry.stars,
                    entry.score
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{at, base_time, record};

    #[test]
    fn empty_dataset_summary() {
        let summary = DatasetSummary::compute(
            &Dataset::new(),
            &ScoringConfig::default(),
            Duration::days(7),
            base_time(),
            5,
        );
        assert_eq!(summary.total_count, 0);
        assert_eq!(summary.average_stars, 0.0);
        assert!(summary.highest.is_none());
        assert!(summary.top.is_empty());
        assert_eq!(summary.star_buckets.len(), 9);
        assert!(summary.star_buckets.iter().all(|b| b.count == 0));
    }

    #[test]
    fn buckets_languages_and_extremes() {
        let mut untyped = record("d", "w", 0);
        untyped.language = None;
        let mut old = record("e", "v", 10_000);
        old.last_fetched_at = at(30);
        let ds = Dataset::from_records([
            record("a", "z", 5),
            record("b", "y", 500),
            record("c", "x", 9_999),
            untyped,
            old,
        ]);

        let summary = DatasetSummary::compute(
            &ds,
            &ScoringConfig::default(),
            Duration::days(7),
            base_time(),
            2,
        );

        let count = |label: &str| {
            summary
                .star_buckets
                .iter()
                .find(|b| b.label == label)
                .map(|b| b.count)
        };
        assert_eq!(count("10000+"), Some(1));
        assert_eq!(count("5000-9999"), Some(1));
        assert_eq!(count("500-999"), Some(1));
        assert_eq!(count("1-9"), Some(1));
        assert_eq!(count("0"), Some(1));

        assert_eq!(summary.total_stars, 20_504);
        assert_eq!(summary.highest, Some((RepoKey::new("e", "v"), 10_000)));
        assert_eq!(summary.lowest, Some((RepoKey::new("d", "w"), 0)));
        assert_eq!(summary.languages.get("Rust"), Some(&4));
        assert_eq!(summary.languages.get("Unknown"), Some(&1));
        assert_eq!(summary.stale_count, 1);
        assert_eq!(summary.top.len(), 2);
        assert_eq!(summary.top[0].key, RepoKey::new("e", "v"));
    }
}
