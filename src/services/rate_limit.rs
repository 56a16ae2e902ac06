// src/services/rate_limit.rs

//! Remaining-quota tracking from API responses.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

/// Slack added after the reported reset time before resuming.
const RESET_GRACE: Duration = Duration::from_secs(1);

/// Last observed rate-limit state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimit {
    /// Read `X-RateLimit-*` headers. None if the response carries none.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let num = |name: &str| -> Option<u64> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };

        let remaining = num("x-ratelimit-remaining");
        let limit = num("x-ratelimit-limit");
        let reset_at = num("x-ratelimit-reset")
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        if remaining.is_none() && limit.is_none() && reset_at.is_none() {
            return None;
        }
        Some(Self {
            limit,
            remaining,
            reset_at,
        })
    }

    /// Fold a newer observation in, keeping fields it does not report.
    pub fn update(&mut self, newer: RateLimit) {
        if newer.limit.is_some() {
            self.limit = newer.limit;
        }
        if newer.remaining.is_some() {
            self.remaining = newer.remaining;
        }
        if newer.reset_at.is_some() {
            self.reset_at = newer.reset_at;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// How long to wait before the next call, if quota is below `margin`.
    pub fn pause_needed(&self, margin: u64, now: DateTime<Utc>) -> Option<Duration> {
        let remaining = self.remaining?;
        if remaining >= margin {
            return None;
        }
        self.until_reset(now)
    }

    /// Time until the window resets plus grace, if the reset is ahead.
    pub fn until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset_at = self.reset_at?;
        if reset_at <= now {
            return None;
        }
        (reset_at - now).to_std().ok().map(|d| d + RESET_GRACE)
    }
}
