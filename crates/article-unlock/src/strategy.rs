//! Per-domain learned method ordering.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::urls::canonical_domain;

/// Default cap on tracked domains before least-recently-updated eviction.
pub const DEFAULT_MAX_STRATEGIES: usize = 10_000;

/// What has been learned about one domain.
///
/// A method name is never both preferred and blacklisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainStrategy {
    pub domain: String,
    pub preferred_methods: Vec<String>,
    pub blacklisted_methods: BTreeSet<String>,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub last_updated: DateTime<Utc>,
}

impl DomainStrategy {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            preferred_methods: Vec::new(),
            blacklisted_methods: BTreeSet::new(),
            total_attempts: 0,
            successful_attempts: 0,
            last_updated: Utc::now(),
        }
    }

    /// Build from configured lists. A name in both lists stays blacklisted.
    pub fn seeded(domain: impl Into<String>, preferred: &[String], blacklisted: &[String]) -> Self {
        let mut strategy = Self::new(domain);
        for name in preferred {
            if !strategy.preferred_methods.contains(name) {
                strategy.preferred_methods.push(name.clone());
            }
        }
        for name in blacklisted {
            strategy.blacklist(name);
        }
        strategy
    }

    /// Move `method` to the front of the preferred list and clear any ban.
    pub fn promote(&mut self, method: &str) {
        self.blacklisted_methods.remove(method);
        self.preferred_methods.retain(|m| m != method);
        self.preferred_methods.insert(0, method.to_string());
    }

    /// Ban `method` for this domain. Returns `true` if newly banned.
    pub fn blacklist(&mut self, method: &str) -> bool {
        self.preferred_methods.retain(|m| m != method);
        self.blacklisted_methods.insert(method.to_string())
    }

    pub fn is_blacklisted(&self, method: &str) -> bool {
        self.blacklisted_methods.contains(method)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }
}

/// All domain strategies, bounded by `max_entries`.
///
/// Keys are [`canonical_domain`] forms, so `www.` and case variants of a
/// domain share one entry.
#[derive(Debug)]
pub struct StrategyBook {
    entries: HashMap<String, DomainStrategy>,
    /// `(last_updated, domain)` for every entry, oldest first.
    recency: BTreeSet<(DateTime<Utc>, String)>,
    max_entries: usize,
}

impl Default for StrategyBook {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STRATEGIES)
    }
}

impl StrategyBook {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeSet::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, domain: &str) -> Option<&DomainStrategy> {
        self.entries.get(&canonical_domain(domain))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all(&self) -> Vec<DomainStrategy> {
        let mut all: Vec<DomainStrategy> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.domain.cmp(&b.domain));
        all
    }

    /// Insert or replace a strategy, keyed by its canonical domain.
    pub fn insert(&mut self, mut strategy: DomainStrategy) {
        strategy.domain = canonical_domain(&strategy.domain);
        match self.entries.remove(&strategy.domain) {
            Some(old) => {
                self.recency.remove(&(old.last_updated, old.domain));
            }
            None => self.make_room(),
        }
        self.recency
            .insert((strategy.last_updated, strategy.domain.clone()));
        self.entries.insert(strategy.domain.clone(), strategy);
    }

    /// Fold one attempt outcome into `domain`'s strategy, then ban every
    /// method in `to_blacklist`. Returns the updated strategy.
    pub fn record_outcome(
        &mut self,
        domain: &str,
        method: &str,
        success: bool,
        to_blacklist: &[String],
    ) -> DomainStrategy {
        let key = canonical_domain(domain);
        let previous = self.entries.get(&key).map(|s| s.last_updated);
        if previous.is_none() {
            self.make_room();
        }

        let strategy = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| DomainStrategy::new(key.as_str()));

        if success {
            strategy.promote(method);
            strategy.successful_attempts += 1;
        }
        strategy.total_attempts += 1;
        strategy.last_updated = Utc::now();

        for name in to_blacklist {
            if strategy.blacklist(name) {
                tracing::warn!("blacklisted method {name} for {key}");
            }
        }
        let updated = strategy.clone();

        if let Some(previous) = previous {
            self.recency.remove(&(previous, key.clone()));
        }
        self.recency.insert((updated.last_updated, key));
        updated
    }

    fn make_room(&mut self) {
        while self.entries.len() >= self.max_entries {
            let Some((_, domain)) = self.recency.pop_first() else {
                break;
            };
            tracing::debug!("evicting stale strategy for {domain}");
            self.entries.remove(&domain);
        }
    }
}
