// src/models/policy.rs

//! Replacement policies for capacity-bounded ingestion.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::record::Record;
use crate::error::AppError;

/// Rule selecting which records leave a full dataset first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Fewest stars first, then stalest fetch, then key.
    #[default]
    LowestStars,
    /// Least recently updated upstream first, then key.
    Oldest,
    /// Lowest activity score first, then stalest fetch, then key.
    LowestActivity,
}

impl ReplacementPolicy {
    pub const ALL: [ReplacementPolicy; 3] = [Self::LowestStars, Self::Oldest, Self::LowestActivity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowestStars => "lowest_stars",
            Self::Oldest => "oldest",
            Self::LowestActivity => "lowest_activity",
        }
    }

    /// Compare on the policy's primary value only. `Less` leaves first.
    pub fn value_cmp(&self, a: &Record, b: &Record) -> Ordering {
        match self {
            Self::LowestStars => a.stars.cmp(&b.stars),
            Self::Oldest => a.updated_at.cmp(&b.updated_at),
            Self::LowestActivity => a.activity_score.cmp(&b.activity_score),
        }
    }

    /// Deterministic tie-break for records with equal primary value.
    pub fn tie_cmp(&self, a: &Record, b: &Record) -> Ordering {
        match self {
            Self::LowestStars | Self::LowestActivity => a
                .last_fetched_at
                .cmp(&b.last_fetched_at)
                .then_with(|| a.key().cmp(&b.key())),
            Self::Oldest => a.key().cmp(&b.key()),
        }
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplacementPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                AppError::validation(format!(
                    "unknown replacement policy '{}' (expected lowest_stars, oldest or lowest_activity)",
                    s
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::fixtures::{at, record};

    fn order(policy: ReplacementPolicy, a: &Record, b: &Record) -> Ordering {
        policy.value_cmp(a, b).then_with(|| policy.tie_cmp(a, b))
    }

    #[test]
    fn lowest_stars_breaks_ties_by_fetch_age_then_key() {
        let policy = ReplacementPolicy::LowestStars;
        let mut a = record("a", "a", 10);
        let mut b = record("b", "b", 10);
        a.last_fetched_at = at(1);
        b.last_fetched_at = at(5);
        assert_eq!(order(policy, &b, &a), Ordering::Less);

        b.last_fetched_at = at(1);
        assert_eq!(order(policy, &a, &b), Ordering::Less);
    }

    #[test]
    fn oldest_uses_updated_at_then_key() {
        let policy = ReplacementPolicy::Oldest;
        let mut a = record("z", "z", 1000);
        let mut b = record("a", "a", 1);
        a.updated_at = at(100);
        b.updated_at = at(2);
        assert_eq!(order(policy, &a, &b), Ordering::Less);

        b.updated_at = at(100);
        assert_eq!(order(policy, &b, &a), Ordering::Less);
    }

    #[test]
    fn lowest_activity_uses_activity_score() {
        let policy = ReplacementPolicy::LowestActivity;
        let mut a = record("a", "a", 10);
        let b = record("b", "b", 5);
        a.forks = 0;
        a.watchers = 0;
        a.refresh_derived();
        assert!(a.activity_score == 10 && b.activity_score == 10);
        assert_eq!(policy.value_cmp(&a, &b), Ordering::Equal);
        assert_eq!(order(policy, &a, &b), Ordering::Less);
    }

    #[test]
    fn parse_policy_names() {
        assert_eq!(
            "lowest-stars".parse::<ReplacementPolicy>().unwrap(),
            ReplacementPolicy::LowestStars
        );
        assert_eq!(
            "OLDEST".parse::<ReplacementPolicy>().unwrap(),
            ReplacementPolicy::Oldest
        );
        assert!("random".parse::<ReplacementPolicy>().is_err());
    }
}
