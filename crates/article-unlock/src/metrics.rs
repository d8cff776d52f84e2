//! Attempt history and success tracking.
//!
//! Every attempt lands in three places: the domain x method aggregate, the
//! global per-method aggregate, and a bounded ring buffer of raw records.
//! Aggregates keep a short FIFO window so that ranking can react to recent
//! behavior without forgetting lifetime totals.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::urls::extract_domain;

/// Capacity of the global attempt ring buffer.
pub const HISTORY_CAPACITY: usize = 1000;

/// Entries kept in each aggregate's recency window.
pub const RECENT_WINDOW: usize = 20;

/// Recent success rate gap (percentage points) that decides ranking outright.
const RECENT_RATE_MARGIN: f64 = 10.0;

/// Overall success rate gap (percentage points) used as the second tier.
const OVERALL_RATE_MARGIN: f64 = 5.0;

/// Domain recorded for URLs whose host cannot be parsed.
const UNKNOWN_DOMAIN: &str = "unknown";

/// One executed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub url: String,
    pub domain: String,
    pub method: String,
    pub success: bool,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowEntry {
    pub success: bool,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Counters for one method, either within a domain or globally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsAggregate {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub total_response_time_ms: u64,
    pub average_response_time_ms: f64,
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: Option<u64>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub recent_attempts: VecDeque<WindowEntry>,
    /// Percentage of successes in `recent_attempts`.
    pub recent_success_rate: f64,
}

impl MetricsAggregate {
    fn record(&mut self, success: bool, response_time_ms: u64, at: DateTime<Utc>) {
        self.total_attempts += 1;
        if success {
            self.successful_attempts += 1;
            self.consecutive_failures = 0;
            self.last_success = Some(at);
        } else {
            self.failed_attempts += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        self.last_attempt = Some(at);

        self.total_response_time_ms = self.total_response_time_ms.saturating_add(response_time_ms);
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.total_attempts as f64;
        self.min_response_time_ms = Some(
            self.min_response_time_ms
                .map_or(response_time_ms, |m| m.min(response_time_ms)),
        );
        self.max_response_time_ms = Some(
            self.max_response_time_ms
                .map_or(response_time_ms, |m| m.max(response_time_ms)),
        );

        self.recent_attempts.push_back(WindowEntry {
            success,
            response_time_ms,
            timestamp: at,
        });
        while self.recent_attempts.len() > RECENT_WINDOW {
            self.recent_attempts.pop_front();
        }
        let successes = self.recent_attempts.iter().filter(|e| e.success).count();
        self.recent_success_rate = successes as f64 * 100.0 / self.recent_attempts.len() as f64;
    }

    /// Lifetime success percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 * 100.0 / self.total_attempts as f64
        }
    }

    /// Lifetime failure percentage.
    pub fn failure_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.failed_attempts as f64 * 100.0 / self.total_attempts as f64
        }
    }

    /// Failure percentage within the recency window.
    pub fn recent_failure_rate(&self) -> f64 {
        if self.recent_attempts.is_empty() {
            return 0.0;
        }
        let failures = self.recent_attempts.iter().filter(|e| !e.success).count();
        failures as f64 * 100.0 / self.recent_attempts.len() as f64
    }
}

/// Ranking order: recent success rate when clearly apart, then overall
/// success rate when clearly apart, then faster average response.
pub fn compare_ranked(a: &MetricsAggregate, b: &MetricsAggregate) -> Ordering {
    if (a.recent_success_rate - b.recent_success_rate).abs() > RECENT_RATE_MARGIN {
        return b
            .recent_success_rate
            .partial_cmp(&a.recent_success_rate)
            .unwrap_or(Ordering::Equal);
    }
    if (a.success_rate() - b.success_rate()).abs() > OVERALL_RATE_MARGIN {
        return b
            .success_rate()
            .partial_cmp(&a.success_rate())
            .unwrap_or(Ordering::Equal);
    }
    a.average_response_time_ms
        .partial_cmp(&b.average_response_time_ms)
        .unwrap_or(Ordering::Equal)
}

/// Stable insertion sort by [`compare_ranked`].
///
/// The margins make the comparator non-transitive, which `slice::sort_by`
/// is allowed to panic on.
pub fn rank_methods(ranked: &mut Vec<MethodRanking>) {
    for i in 1..ranked.len() {
        let mut j = i;
        while j > 0 && compare_ranked(&ranked[j - 1].stats, &ranked[j].stats) == Ordering::Greater {
            ranked.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// A method paired with its domain-specific aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodRanking {
    pub method: String,
    pub stats: MetricsAggregate,
}

/// Aggregate view for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub domains_tracked: usize,
    pub history_len: usize,
    pub global: HashMap<String, MetricsAggregate>,
}

/// Stores attempt history and derived aggregates.
#[derive(Debug, Default)]
pub struct MetricsStore {
    by_domain: HashMap<String, HashMap<String, MetricsAggregate>>,
    global: HashMap<String, MetricsAggregate>,
    history: VecDeque<AttemptRecord>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt against its domain, the global view, and history.
    pub fn record_attempt(
        &mut self,
        url: &str,
        method: &str,
        success: bool,
        response_time_ms: u64,
        metadata: Map<String, Value>,
    ) {
        let domain = extract_domain(url).unwrap_or_else(|| UNKNOWN_DOMAIN.to_string());
        let now = Utc::now();

        self.by_domain
            .entry(domain.clone())
            .or_default()
            .entry(method.to_string())
            .or_default()
            .record(success, response_time_ms, now);
        self.global
            .entry(method.to_string())
            .or_default()
            .record(success, response_time_ms, now);

        self.history.push_back(AttemptRecord {
            url: url.to_string(),
            domain,
            method: method.to_string(),
            success,
            response_time_ms,
            timestamp: now,
            metadata,
        });
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    pub fn domain_stats(&self, domain: &str, method: &str) -> Option<&MetricsAggregate> {
        self.by_domain.get(domain)?.get(method)
    }

    pub fn global_stats(&self, method: &str) -> Option<&MetricsAggregate> {
        self.global.get(method)
    }

    /// Methods with at least `min_attempts` on `domain`, best first.
    pub fn get_best_methods_for_domain(&self, domain: &str, min_attempts: u64) -> Vec<MethodRanking> {
        let Some(methods) = self.by_domain.get(domain) else {
            return Vec::new();
        };
        let mut ranked: Vec<MethodRanking> = methods
            .iter()
            .filter(|(_, stats)| stats.total_attempts >= min_attempts)
            .map(|(name, stats)| MethodRanking {
                method: name.clone(),
                stats: stats.clone(),
            })
            .collect();
        // HashMap order is arbitrary; settle ties deterministically first.
        ranked.sort_by(|a, b| a.method.cmp(&b.method));
        rank_methods(&mut ranked);
        ranked
    }

    /// Methods failing on `domain` both over their lifetime and recently.
    pub fn get_methods_to_blacklist(
        &self,
        domain: &str,
        min_attempts: u64,
        max_failure_rate: f64,
    ) -> Vec<String> {
        let Some(methods) = self.by_domain.get(domain) else {
            return Vec::new();
        };
        let mut names: Vec<String> = methods
            .iter()
            .filter(|(_, s)| {
                s.total_attempts >= min_attempts
                    && s.failure_rate() >= max_failure_rate
                    && s.recent_failure_rate() >= max_failure_rate
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The last `limit` attempts, newest last.
    pub fn recent_attempts(&self, limit: usize) -> Vec<AttemptRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_attempts: self.global.values().map(|s| s.total_attempts).sum(),
            successful_attempts: self.global.values().map(|s| s.successful_attempts).sum(),
            domains_tracked: self.by_domain.len(),
            history_len: self.history.len(),
            global: self.global.clone(),
        }
    }

    pub fn clear(&mut self) {
        self.by_domain.clear();
        self.global.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://news.example/story";

    fn record(store: &mut MetricsStore, method: &str, success: bool, ms: u64) {
        store.record_attempt(URL, method, success, ms, Map::new());
    }

    fn aggregate(total: u64, ok: u64, recent_rate: f64, avg: f64) -> MetricsAggregate {
        MetricsAggregate {
            total_attempts: total,
            successful_attempts: ok,
            failed_attempts: total - ok,
            average_response_time_ms: avg,
            recent_success_rate: recent_rate,
            ..MetricsAggregate::default()
        }
    }

    #[test]
    fn test_fail_then_succeed() {
        let mut store = MetricsStore::new();
        record(&mut store, "m", false, 300);
        let s = store.domain_stats("news.example", "m").unwrap();
        assert_eq!(s.total_attempts, 1);
        assert_eq!(s.failed_attempts, 1);
        assert_eq!(s.consecutive_failures, 1);

        record(&mut store, "m", true, 100);
        let s = store.domain_stats("news.example", "m").unwrap();
        assert_eq!(s.successful_attempts, 1);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.recent_success_rate, 50.0);
        assert_eq!(s.average_response_time_ms, 200.0);
        assert_eq!(s.min_response_time_ms, Some(100));
        assert_eq!(s.max_response_time_ms, Some(300));
        assert!(s.last_success.is_some());
    }

    #[test]
    fn test_global_mirrors_domain() {
        let mut store = MetricsStore::new();
        store.record_attempt("https://a.example/x", "m", true, 10, Map::new());
        store.record_attempt("https://b.example/y", "m", false, 30, Map::new());
        let g = store.global_stats("m").unwrap();
        assert_eq!(g.total_attempts, 2);
        assert_eq!(g.recent_success_rate, 50.0);
        assert_eq!(store.domain_stats("a.example", "m").unwrap().total_attempts, 1);
    }

    #[test]
    fn test_window_is_bounded_fifo() {
        let mut store = MetricsStore::new();
        for _ in 0..5 {
            record(&mut store, "m", false, 10);
        }
        for _ in 0..RECENT_WINDOW {
            record(&mut store, "m", true, 10);
        }
        let s = store.domain_stats("news.example", "m").unwrap();
        assert_eq!(s.recent_attempts.len(), RECENT_WINDOW);
        assert!(s.recent_attempts.iter().all(|e| e.success));
        assert_eq!(s.recent_success_rate, 100.0);
        assert_eq!(s.total_attempts, 25);
    }

    #[test]
    fn test_history_ring_buffer_capacity() {
        let mut store = MetricsStore::new();
        for i in 0..(HISTORY_CAPACITY + 5) {
            store.record_attempt(URL, "m", true, i as u64, Map::new());
        }
        let recent = store.recent_attempts(HISTORY_CAPACITY * 2);
        assert_eq!(recent.len(), HISTORY_CAPACITY);
        assert_eq!(recent[0].response_time_ms, 5);
        assert_eq!(store.recent_attempts(1)[0].response_time_ms, HISTORY_CAPACITY as u64 + 4);
    }

    #[test]
    fn test_unparseable_url_goes_to_unknown_domain() {
        let mut store = MetricsStore::new();
        store.record_attempt("::::", "m", false, 0, Map::new());
        assert!(store.domain_stats(UNKNOWN_DOMAIN, "m").is_some());
    }

    #[test]
    fn test_blacklist_requires_min_attempts() {
        let mut store = MetricsStore::new();
        record(&mut store, "bad", true, 10);
        for _ in 0..8 {
            record(&mut store, "bad", false, 10);
        }
        assert!(store.get_methods_to_blacklist("news.example", 10, 90.0).is_empty());

        record(&mut store, "bad", false, 10);
        assert_eq!(
            store.get_methods_to_blacklist("news.example", 10, 90.0),
            vec!["bad".to_string()]
        );
    }

    #[test]
    fn test_blacklist_requires_recent_agreement() {
        let mut store = MetricsStore::new();
        for _ in 0..30 {
            record(&mut store, "m", false, 10);
        }
        for _ in 0..5 {
            record(&mut store, "m", true, 10);
        }
        // Lifetime failures clear 85%, the last 20 attempts only reach 75%.
        assert!(store.get_methods_to_blacklist("news.example", 10, 85.0).is_empty());
    }

    #[test]
    fn test_recent_rate_dominates_ranking() {
        let a = aggregate(10, 9, 90.0, 900.0);
        let b = aggregate(10, 9, 70.0, 100.0);
        assert_eq!(compare_ranked(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_overall_rate_breaks_close_recent() {
        let a = aggregate(10, 6, 80.0, 100.0);
        let b = aggregate(10, 9, 85.0, 900.0);
        assert_eq!(compare_ranked(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_response_time_breaks_close_rates() {
        let a = aggregate(100, 80, 80.0, 900.0);
        let b = aggregate(100, 82, 82.0, 200.0);
        assert_eq!(compare_ranked(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_best_methods_filters_and_sorts() {
        let mut store = MetricsStore::new();
        for _ in 0..3 {
            record(&mut store, "fast", true, 50);
            record(&mut store, "flaky", false, 50);
        }
        record(&mut store, "fresh", true, 1);

        let best = store.get_best_methods_for_domain("news.example", 3);
        let names: Vec<&str> = best.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(names, vec!["fast", "flaky"]);
        assert!(store.get_best_methods_for_domain("elsewhere.example", 1).is_empty());
    }
}
