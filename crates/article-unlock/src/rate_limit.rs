//! Per-URL attempt limiting in one-minute buckets.

use std::collections::HashMap;

use chrono::Utc;

/// Attempts allowed per URL per minute bucket.
pub const DEFAULT_MAX_PER_MINUTE: u32 = 3;

/// Buckets older than this many minutes are dropped on each check.
const RETAIN_MINUTES: i64 = 5;

/// Counts orchestration attempts keyed by `(url, minute)`.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: u32,
    counters: HashMap<(String, i64), u32>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_MINUTE)
    }
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            counters: HashMap::new(),
        }
    }

    /// Count an attempt for `url` now. Returns `false` when over the limit.
    pub fn check(&mut self, url: &str) -> bool {
        self.check_at(url, Utc::now().timestamp())
    }

    /// Same as [`Self::check`] at an explicit unix time in seconds.
    pub fn check_at(&mut self, url: &str, unix_secs: i64) -> bool {
        let minute = unix_secs.div_euclid(60);
        self.counters
            .retain(|(_, bucket), _| minute - *bucket < RETAIN_MINUTES);

        let count = self.counters.entry((url.to_string(), minute)).or_insert(0);
        if *count >= self.max_per_minute {
            tracing::debug!("rate limit hit for {url} ({count} attempts this minute)");
            return false;
        }
        *count += 1;
        true
    }

    /// Number of live `(url, minute)` counters.
    pub fn tracked(&self) -> usize {
        self.counters.len()
    }
}
