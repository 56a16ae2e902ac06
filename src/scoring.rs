// src/scoring.rs

//! Influence score and ranked views over the dataset.
//!
//! ```text
//! score = 0.40 * S + 0.25 * F + 0.15 * W + 0.10 * T + 0.10 * H
//! ```
//!
//! `S`, `F` and `W` are stars, forks and watchers divided by the maximum in
//! the ranked set. `T` grows with project age and `H` shrinks with the open
//! issue count. Weights and smoothing constants come from [`ScoringConfig`].

use chrono::{DateTime, Utc};

use crate::models::{Record, ScoringConfig};

/// Age factor used when the creation time is unknown or in the future.
pub const UNKNOWN_AGE_WEIGHT: f64 = 0.3;

/// Cached activity value: stars + forks + watchers.
pub fn activity_score(stars: u64, forks: u64, watchers: u64) -> u64 {
    stars.saturating_add(forks).saturating_add(watchers)
}

/// `value / max`, or 0 when the set has no signal.
pub fn normalize(value: u64, max: u64) -> f64 {
    if max == 0 {
        0.0
    } else {
        value as f64 / max as f64
    }
}

/// Older projects approach 1; `smoothing_years` is where the weight hits 0.5.
pub fn age_weight(created_at: DateTime<Utc>, now: DateTime<Utc>, smoothing_years: f64) -> f64 {
    let years = (now - created_at).num_days() as f64 / 365.0;
    if years > 0.0 {
        years / (years + smoothing_years)
    } else {
        UNKNOWN_AGE_WEIGHT
    }
}

/// Fewer open issues score higher.
pub fn health_score(open_issues: u64, smoothing: f64) -> f64 {
    let issues = open_issues as f64;
    1.0 - issues / (issues + smoothing)
}

/// Per-metric maxima of a ranked set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricMax {
    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
}

impl MetricMax {
    pub fn of<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        records.into_iter().fold(Self::default(), |acc, r| Self {
            stars: acc.stars.max(r.stars),
            forks: acc.forks.max(r.forks),
            watchers: acc.watchers.max(r.watchers),
        })
    }
}

/// Weighted influence score of one record relative to `max`.
pub fn influence_score(
    record: &Record,
    max: &MetricMax,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> f64 {
    config.star_weight * normalize(record.stars, max.stars)
        + config.fork_weight * normalize(record.forks, max.forks)
        + config.watcher_weight * normalize(record.watchers, max.watchers)
        + config.age_weight * age_weight(record.created_at, now, config.age_smoothing_years)
        + config.health_weight * health_score(record.open_issues, config.health_smoothing)
}

/// A record with its computed score.
#[derive(Debug, Clone)]
pub struct Ranked<'a> {
    pub rank: usize,
    pub score: f64,
    pub record: &'a Record,
}

/// Rank records by influence, highest first. Ties fall back to key order.
///
/// The language filter is case-insensitive; maxima are taken over the
/// filtered set so each language view is normalized on its own.
pub fn rank<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    language: Option<&str>,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Vec<Ranked<'a>> {
    let language = language.map(str::to_lowercase);
    let selected: Vec<&Record> = records
        .into_iter()
        .filter(|r| match &language {
            Some(lang) => r
                .language
                .as_deref()
                .is_some_and(|l| l.to_lowercase() == *lang),
            None => true,
        })
        .collect();

    let max = MetricMax::of(selected.iter().copied());
    let mut scored: Vec<(f64, &Record)> = selected
        .into_iter()
        .map(|r| (influence_score(r, &max, config, now), r))
        .collect();

    scored.sort_by(|(sa, ra), (sb, rb)| {
        sb.total_cmp(sa).then_with(|| ra.key().cmp(&rb.key()))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, record))| Ranked {
            rank: i + 1,
            score,
            record,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{at, base_time, record};

    #[test]
    fn activity_saturates() {
        assert_eq!(activity_score(1, 2, 3), 6);
        assert_eq!(activity_score(u64::MAX, 1, 1), u64::MAX);
    }

    #[test]
    fn age_weight_grows_with_age() {
        let now = base_time();
        let two_years = age_weight(now - chrono::Duration::days(730), now, 2.0);
        assert!((two_years - 0.5).abs() < 1e-9);
        assert_eq!(age_weight(now, now, 2.0), UNKNOWN_AGE_WEIGHT);
        assert_eq!(
            age_weight(now + chrono::Duration::days(3), now, 2.0),
            UNKNOWN_AGE_WEIGHT
        );
    }

    #[test]
    fn health_uses_configured_smoothing() {
        assert_eq!(health_score(0, 10.0), 1.0);
        assert!((health_score(10, 10.0) - 0.5).abs() < 1e-9);
        assert!((health_score(10, 30.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn top_record_gets_full_metric_weight() {
        let config = ScoringConfig::default();
        let mut r = record("a", "top", 100);
        r.open_issues = 0;
        r.created_at = at(730);
        let max = MetricMax::of([&r]);
        let score = influence_score(&r, &max, &config, base_time());
        // 0.4 + 0.25 + 0.15 + 0.1 * 0.5 + 0.1 * 1.0
        assert!((score - 0.95).abs() < 1e-2);
    }

    #[test]
    fn rank_orders_by_score_and_filters_language() {
        let config = ScoringConfig::default();
        let a = record("a", "small", 10);
        let b = record("b", "big", 1000);
        let mut c = record("c", "py", 5000);
        c.language = Some("Python".into());

        let all = rank([&a, &b, &c], None, &config, base_time());
        let order: Vec<_> = all.iter().map(|r| r.record.name.as_str()).collect();
        assert_eq!(order, vec!["py", "big", "small"]);
        assert_eq!(all[0].rank, 1);

        let rust = rank([&a, &b, &c], Some("rust"), &config, base_time());
        assert_eq!(rust.len(), 2);
        assert_eq!(rust[0].record.name, "big");
    }

    #[test]
    fn rank_ties_fall_back_to_key() {
        let config = ScoringConfig::default();
        let a = record("b", "x", 10);
        let b = record("a", "x", 10);
        let ranked = rank([&a, &b], None, &config, base_time());
        assert_eq!(ranked[0].record.owner, "a");
    }
}
