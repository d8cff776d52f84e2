//! Request orchestration: candidate selection, sequential fallback, rate
//! limiting, and per-domain strategy learning.
//!
//! For each request the orchestrator builds an ordered list of methods from
//! what it has learned about the domain, then tries them one after another
//! until one succeeds. Every outcome feeds the [`MetricsStore`] and the
//! domain's [`DomainStrategy`], which shapes the ordering of the next request.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::classifier::{DomainListClassifier, PaywallClassifier, WhitelistStore};
use crate::config::{OrchestratorSettings, UnlockConfig};
use crate::method::Method;
use crate::metrics::{AttemptRecord, MetricsStore, MetricsSummary};
use crate::rate_limit::RateLimiter;
use crate::registry::{HealthReport, MethodRegistry};
use crate::strategy::{DomainStrategy, StrategyBook};
use crate::types::{
    AttemptOptions, Bypassed, HealthStatus, MethodSnapshot, UnlockError, UnlockResult,
};
use crate::urls;

/// Recent success rate (percent) a method needs to be ranked from history.
const HISTORY_PROMOTION_RATE: f64 = 50.0;

/// Everything the orchestrator knows, for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorMetrics {
    pub methods: Vec<MethodSnapshot>,
    pub summary: MetricsSummary,
    pub strategies: Vec<DomainStrategy>,
    pub rate_limit_keys: usize,
    pub paywalled_domains: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodHealthStatus {
    pub name: String,
    pub enabled: bool,
    pub available: bool,
    pub health: HealthStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthOverview {
    pub total_methods: usize,
    pub healthy_methods: usize,
    pub available_methods: usize,
    pub health_checks_running: bool,
    pub methods: Vec<MethodHealthStatus>,
}

/// Selects, executes, and learns from retrieval methods.
pub struct Orchestrator {
    registry: Arc<MethodRegistry>,
    classifier: Arc<dyn PaywallClassifier>,
    whitelist: WhitelistStore,
    config: UnlockConfig,
    metrics: Mutex<MetricsStore>,
    strategies: Mutex<StrategyBook>,
    limiter: Mutex<RateLimiter>,
}

impl Orchestrator {
    /// Build an orchestrator whose classifier is backed by the configured
    /// paywalled domain list.
    pub fn new(registry: Arc<MethodRegistry>, config: UnlockConfig) -> Self {
        let whitelist = WhitelistStore::new(&config.paywalled_domains);
        let classifier = Arc::new(DomainListClassifier::new(whitelist.clone()));
        let settings = &config.orchestrator;
        Self {
            registry,
            classifier,
            whitelist,
            metrics: Mutex::new(MetricsStore::new()),
            strategies: Mutex::new(StrategyBook::new(settings.max_domain_strategies)),
            limiter: Mutex::new(RateLimiter::new(settings.rate_limit_per_minute)),
            config,
        }
    }

    /// Replace the paywall classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn PaywallClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn settings(&self) -> &OrchestratorSettings {
        &self.config.orchestrator
    }

    fn metrics_store(&self) -> MutexGuard<'_, MetricsStore> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn strategy_book(&self) -> MutexGuard<'_, StrategyBook> {
        self.strategies.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    pub fn whitelist(&self) -> &WhitelistStore {
        &self.whitelist
    }

    /// Apply configured method overrides, seed domain strategies, and start
    /// periodic health checks. Must run inside a Tokio runtime.
    pub fn initialize(&self) -> UnlockResult<()> {
        self.config.validate()?;

        for (name, patch) in &self.config.methods {
            match self.registry.get(name) {
                Some(method) => method.update_config(patch),
                None => tracing::warn!("config references unknown method {name}"),
            }
        }

        {
            let mut book = self.strategy_book();
            for (domain, seed) in &self.config.domains {
                book.insert(DomainStrategy::seeded(
                    domain.as_str(),
                    &seed.preferred_methods,
                    &seed.blacklisted_methods,
                ));
            }
        }

        let interval = self.settings().health_check_interval_secs;
        if interval > 0 {
            self.registry
                .start_health_checks(Duration::from_secs(interval));
        }

        tracing::info!(
            "orchestrator ready: {} method(s), {} seeded domain(s), {} paywalled domain(s)",
            self.registry.len(),
            self.config.domains.len(),
            self.whitelist.len()
        );
        Ok(())
    }

    /// Retrieve `url` through the best available method for its domain.
    pub async fn bypass(&self, url: &str, options: &AttemptOptions) -> UnlockResult<Bypassed> {
        let request_id = Uuid::new_v4().to_string();
        let normalized = urls::normalize(url)?;
        let domain = urls::extract_domain(&normalized)
            .ok_or_else(|| UnlockError::InvalidUrl(format!("{url}: no domain")))?;

        let recognized = self.classifier.is_paywalled(&normalized);
        if !recognized && !options.force {
            tracing::debug!("[{request_id}] {normalized} does not need bypassing");
            return Err(UnlockError::NotApplicable);
        }

        let allowed = self
            .limiter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .check(&normalized);
        if !allowed {
            tracing::warn!("[{request_id}] rate limit exceeded for {normalized}");
            return Err(UnlockError::RateLimited);
        }

        let candidates = self.get_methods_for_domain(&domain);
        if candidates.is_empty() {
            tracing::warn!("[{request_id}] no available methods for {domain}");
            return Err(UnlockError::NoAvailableMethods);
        }
        tracing::info!(
            "[{request_id}] bypassing {normalized} with {} candidate(s)",
            candidates.len()
        );

        let mut attempted = Vec::with_capacity(candidates.len());
        for method in candidates {
            let name = method.name().to_string();
            attempted.push(name.clone());

            let started = Instant::now();
            let run = AssertUnwindSafe(method.attempt(&normalized, options))
                .catch_unwind()
                .await;

            match run {
                Ok(outcome) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    method
                        .core()
                        .record_attempt(outcome.success, elapsed, outcome.error.clone());
                    self.record(
                        &normalized,
                        &domain,
                        &name,
                        outcome.success,
                        elapsed,
                        outcome.metadata.clone(),
                    );

                    if outcome.success {
                        tracing::info!(
                            "[{request_id}] {name} succeeded for {domain} in {elapsed}ms"
                        );
                        if options.force && !recognized {
                            self.whitelist.add(&domain);
                        }
                        let mut metadata = outcome.metadata;
                        metadata.insert("attempts".to_string(), Value::from(attempted.len()));
                        return Ok(Bypassed {
                            url: normalized,
                            content: outcome.content,
                            method: name,
                            response_time_ms: elapsed,
                            metadata,
                            request_id,
                        });
                    }
                    tracing::debug!(
                        "[{request_id}] {name} failed for {domain}: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("[{request_id}] {name} panicked on {normalized}: {message}");
                    method.core().record_attempt(false, 0, Some(message.clone()));
                    let mut metadata = Map::new();
                    metadata.insert("panic".to_string(), Value::from(message));
                    self.record(&normalized, &domain, &name, false, 0, metadata);
                }
            }
        }

        tracing::warn!(
            "[{request_id}] all methods failed for {normalized}: {}",
            attempted.join(", ")
        );
        Err(UnlockError::AllMethodsFailed { attempted })
    }

    fn record(
        &self,
        url: &str,
        domain: &str,
        method: &str,
        success: bool,
        response_time_ms: u64,
        metadata: Map<String, Value>,
    ) {
        self.metrics_store()
            .record_attempt(url, method, success, response_time_ms, metadata);
        self.update_domain_strategy(domain, method, success, response_time_ms);
    }

    /// Fold an outcome into `domain`'s strategy and apply any blacklisting
    /// the metrics now call for.
    pub fn update_domain_strategy(
        &self,
        domain: &str,
        method: &str,
        success: bool,
        response_time_ms: u64,
    ) -> DomainStrategy {
        let settings = self.settings();
        let to_blacklist = self.metrics_store().get_methods_to_blacklist(
            domain,
            settings.blacklist_min_attempts,
            settings.blacklist_max_failure_rate,
        );
        let strategy = self
            .strategy_book()
            .record_outcome(domain, method, success, &to_blacklist);
        tracing::debug!(
            "strategy for {domain}: {method} {} in {response_time_ms}ms, preferred={:?}",
            if success { "succeeded" } else { "failed" },
            strategy.preferred_methods
        );
        strategy
    }

    /// Ordered candidate methods for `domain`.
    ///
    /// Learned preferences come first, then methods with a good recent
    /// record on the domain, then everything else by priority. Methods
    /// blacklisted for the domain are never returned.
    pub fn get_methods_for_domain(&self, domain: &str) -> Vec<Arc<dyn Method>> {
        let available = self.registry.get_methods_by_priority(true);
        let strategy = self.strategy_book().get(domain).cloned();
        let blacklisted: BTreeSet<String> = strategy
            .as_ref()
            .map(|s| s.blacklisted_methods.clone())
            .unwrap_or_default();

        let mut ordered: Vec<Arc<dyn Method>> = Vec::with_capacity(available.len());

        if let Some(strategy) = strategy.filter(|s| !s.preferred_methods.is_empty()) {
            for name in &strategy.preferred_methods {
                if blacklisted.contains(name) {
                    continue;
                }
                if let Some(m) = available.iter().find(|m| m.name() == name) {
                    ordered.push(Arc::clone(m));
                }
            }
        } else {
            let best = self
                .metrics_store()
                .get_best_methods_for_domain(domain, self.settings().min_history_attempts);
            for ranked in best
                .iter()
                .filter(|r| r.stats.recent_success_rate > HISTORY_PROMOTION_RATE)
            {
                if blacklisted.contains(&ranked.method) {
                    continue;
                }
                if let Some(m) = available.iter().find(|m| m.name() == ranked.method) {
                    ordered.push(Arc::clone(m));
                }
            }
        }

        for m in &available {
            if blacklisted.contains(m.name()) || ordered.iter().any(|o| o.name() == m.name()) {
                continue;
            }
            ordered.push(Arc::clone(m));
        }
        ordered
    }

    /// Bypass each URL in turn, keeping only the successes.
    pub async fn process_urls(&self, urls: &[String]) -> Vec<Bypassed> {
        let mut results = Vec::new();
        for url in urls {
            match self.bypass(url, &AttemptOptions::default()).await {
                Ok(result) => results.push(result),
                Err(UnlockError::NotApplicable) => {
                    tracing::debug!("skipping {url}: not paywalled");
                }
                Err(e) => tracing::warn!("failed to process {url}: {e}"),
            }
        }
        results
    }

    pub fn domain_strategy(&self, domain: &str) -> Option<DomainStrategy> {
        self.strategy_book().get(domain).cloned()
    }

    pub fn recent_attempts(&self, limit: usize) -> Vec<AttemptRecord> {
        self.metrics_store().recent_attempts(limit)
    }

    pub fn get_metrics(&self) -> OrchestratorMetrics {
        let methods = self
            .registry
            .all()
            .iter()
            .map(|m| m.get_metrics())
            .collect();
        OrchestratorMetrics {
            methods,
            summary: self.metrics_store().summary(),
            strategies: self.strategy_book().all(),
            rate_limit_keys: self
                .limiter
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .tracked(),
            paywalled_domains: self.whitelist.len(),
        }
    }

    pub fn get_health_status(&self) -> HealthOverview {
        let methods: Vec<MethodHealthStatus> = self
            .registry
            .all()
            .iter()
            .map(|m| {
                let snapshot = m.get_metrics();
                MethodHealthStatus {
                    name: snapshot.name,
                    enabled: snapshot.config.enabled,
                    available: snapshot.available,
                    health: snapshot.health,
                }
            })
            .collect();
        HealthOverview {
            total_methods: methods.len(),
            healthy_methods: methods.iter().filter(|m| m.health.healthy).count(),
            available_methods: methods.iter().filter(|m| m.available).count(),
            health_checks_running: self.registry.health_checks_running(),
            methods,
        }
    }

    /// Run one health-check sweep now.
    pub async fn check_health(&self) -> HealthReport {
        self.registry.perform_health_checks().await
    }

    /// Stop background work and release every method.
    pub async fn cleanup(&self) {
        self.registry.cleanup().await;
        tracing::info!("orchestrator shut down");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "method panicked".to_string()
    }
}
