//! The method capability interface.
//!
//! A method is one strategy for retrieving a resource. Concrete methods are
//! plain structs that hold a [`MethodCore`] (config, health, metrics) and
//! implement [`Method::attempt`]; everything else has a default.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;

use crate::types::{
    AttemptOptions, AttemptOutcome, HealthCheckResult, HealthStatus, MethodConfig,
    MethodConfigPatch, MethodMetrics, MethodSnapshot, MAX_PRIORITY, MIN_PRIORITY,
};

/// URL hit by the default health check.
pub const DEFAULT_HEALTH_CHECK_URL: &str = "https://example.com/";

#[derive(Debug)]
struct CoreState {
    config: MethodConfig,
    health: HealthStatus,
    metrics: MethodMetrics,
}

/// Shared bookkeeping carried by every method instance.
#[derive(Debug)]
pub struct MethodCore {
    name: String,
    state: Mutex<CoreState>,
}

impl MethodCore {
    pub fn new(name: impl Into<String>, config: MethodConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(CoreState {
                config,
                health: HealthStatus::default(),
                metrics: MethodMetrics::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> MethodConfig {
        self.state().config.clone()
    }

    pub fn health(&self) -> HealthStatus {
        self.state().health.clone()
    }

    pub fn metrics(&self) -> MethodMetrics {
        self.state().metrics.clone()
    }

    pub fn priority(&self) -> u8 {
        self.state().config.priority
    }

    pub fn is_available(&self) -> bool {
        let state = self.state();
        state.config.enabled && state.health.healthy
    }

    pub fn update_config(&self, patch: &MethodConfigPatch) {
        self.state().config.merge(patch);
    }

    /// Record an executed attempt: updates metrics and the health state.
    pub fn record_attempt(&self, success: bool, response_time_ms: u64, error: Option<String>) {
        let mut state = self.state();
        state.metrics.record(success, response_time_ms);
        if state.health.observe(success, error) {
            log_transition(&self.name, &state.health);
        }
    }

    /// Fold a health-check result into the health state.
    pub fn record_health(&self, result: &HealthCheckResult) {
        let mut state = self.state();
        if state.health.observe(result.healthy, result.error.clone()) {
            log_transition(&self.name, &state.health);
        }
    }

    pub fn snapshot(&self) -> MethodSnapshot {
        let state = self.state();
        MethodSnapshot {
            name: self.name.clone(),
            config: state.config.clone(),
            health: state.health.clone(),
            metrics: state.metrics.clone(),
            success_rate: state.metrics.success_rate(),
            available: state.config.enabled && state.health.healthy,
        }
    }
}

fn log_transition(name: &str, health: &HealthStatus) {
    if health.healthy {
        tracing::info!("method {name} recovered");
    } else {
        tracing::warn!(
            "method {name} marked unhealthy after {} consecutive failures: {}",
            health.consecutive_failures,
            health.last_error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// A pluggable retrieval strategy.
#[async_trait]
pub trait Method: Send + Sync {
    /// Bookkeeping owned by this instance.
    fn core(&self) -> &MethodCore;

    /// Try to retrieve `url`. Must not panic; failures are returned as
    /// outcomes with `success == false`.
    async fn attempt(&self, url: &str, options: &AttemptOptions) -> AttemptOutcome;

    /// URL used by the default health check.
    fn health_check_url(&self) -> &str {
        DEFAULT_HEALTH_CHECK_URL
    }

    /// Check the method. The registry folds the result into [`HealthStatus`].
    async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = self
            .attempt(self.health_check_url(), &AttemptOptions::default())
            .await;
        let elapsed = started.elapsed().as_millis() as u64;
        if outcome.success {
            HealthCheckResult {
                healthy: true,
                response_time_ms: Some(elapsed),
                error: None,
                message: format!("{} responded in {elapsed}ms", self.name()),
            }
        } else {
            let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            HealthCheckResult {
                healthy: false,
                response_time_ms: Some(elapsed),
                message: format!("{} check failed: {error}", self.name()),
                error: Some(error),
            }
        }
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn is_available(&self) -> bool {
        self.core().is_available()
    }

    fn get_metrics(&self) -> MethodSnapshot {
        self.core().snapshot()
    }

    fn update_config(&self, patch: &MethodConfigPatch) {
        self.core().update_config(patch);
    }

    /// Release held resources. Must be safe to call more than once.
    async fn cleanup(&self) {}
}

/// Check the parts of the method contract the type system cannot.
pub fn validate(method: &dyn Method) -> Result<(), String> {
    let name = method.name();
    if name.trim().is_empty() {
        return Err("method name must not be empty".to_string());
    }
    let config = method.core().config();
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&config.priority) {
        return Err(format!(
            "{name}: priority {} outside {MIN_PRIORITY}..={MAX_PRIORITY}",
            config.priority
        ));
    }
    if config.timeout_ms == 0 {
        return Err(format!("{name}: timeout must be positive"));
    }
    Ok(())
}
