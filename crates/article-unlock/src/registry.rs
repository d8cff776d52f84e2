//! Method registration, availability views, and periodic health checks.

use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::method::{self, Method};
use crate::types::{HealthCheckResult, HealthStatus, UnlockError, UnlockResult};

/// Health check result for one method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodHealth {
    pub method: String,
    #[serde(flatten)]
    pub result: HealthCheckResult,
}

/// Outcome of one health-check sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub total_methods: usize,
    pub healthy_methods: usize,
    pub results: Vec<MethodHealth>,
}

struct HealthScheduler {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Owns every registered method for the life of the process.
#[derive(Default)]
pub struct MethodRegistry {
    /// Registration order is kept so equal priorities sort stably.
    methods: RwLock<Vec<Arc<dyn Method>>>,
    scheduler: Mutex<Option<HealthScheduler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method, replacing any existing one with the same name.
    pub fn register(&self, method: Arc<dyn Method>) -> UnlockResult<()> {
        method::validate(method.as_ref()).map_err(UnlockError::InvalidMethod)?;

        let mut methods = self.methods.write().unwrap_or_else(|e| e.into_inner());
        let name = method.name().to_string();
        if let Some(slot) = methods.iter_mut().find(|m| m.name() == name) {
            tracing::warn!("method {name} already registered, replacing it");
            *slot = method;
        } else {
            tracing::info!("registered method {name} (priority {})", method.core().priority());
            methods.push(method);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.read().iter().find(|m| m.name() == name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Method>> {
        self.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|m| m.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Method>>> {
        self.methods.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Methods sorted by priority, highest first.
    pub fn get_methods_by_priority(&self, only_available: bool) -> Vec<Arc<dyn Method>> {
        let mut methods: Vec<Arc<dyn Method>> = self
            .read()
            .iter()
            .filter(|m| !only_available || m.is_available())
            .cloned()
            .collect();
        methods.sort_by_key(|m| std::cmp::Reverse(m.core().priority()));
        methods
    }

    pub fn health_status(&self) -> Vec<(String, HealthStatus)> {
        self.read()
            .iter()
            .map(|m| (m.name().to_string(), m.core().health()))
            .collect()
    }

    /// Check every method concurrently and fold the results into health.
    ///
    /// Each check runs in its own task, so a panicking check only marks its
    /// own method as failed.
    pub async fn perform_health_checks(&self) -> HealthReport {
        let methods = self.all();
        let tasks = methods.iter().map(|m| {
            let m = Arc::clone(m);
            tokio::spawn(async move { m.health_check().await })
        });
        let joined = join_all(tasks).await;

        let mut results = Vec::with_capacity(methods.len());
        for (method, outcome) in methods.iter().zip(joined) {
            let result = outcome.unwrap_or_else(|e| {
                tracing::error!("health check for {} aborted: {e}", method.name());
                HealthCheckResult::unhealthy(format!("health check aborted: {e}"))
            });
            method.core().record_health(&result);
            results.push(MethodHealth {
                method: method.name().to_string(),
                result,
            });
        }

        let healthy_methods = results.iter().filter(|r| r.result.healthy).count();
        tracing::debug!(
            "health checks complete: {healthy_methods}/{} healthy",
            results.len()
        );
        HealthReport {
            total_methods: results.len(),
            healthy_methods,
            results,
        }
    }

    /// Run [`Self::perform_health_checks`] every `interval` until stopped.
    ///
    /// The task only holds a weak reference to the registry and never keeps
    /// the runtime alive on its own.
    pub fn start_health_checks(self: &Arc<Self>, interval: Duration) {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if scheduler.is_some() {
            tracing::debug!("health checks already scheduled");
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let registry: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tracing::info!("health checks scheduled every {}ms", interval.as_millis());
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        tracing::info!("health check scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        registry.perform_health_checks().await;
                    }
                }
            }
        });

        *scheduler = Some(HealthScheduler { shutdown, handle });
    }

    /// Cancel the scheduler and wait for any in-flight sweep to finish.
    pub async fn stop_health_checks(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown.notify_one();
            if let Err(e) = scheduler.handle.await {
                tracing::warn!("health check scheduler ended abnormally: {e}");
            }
        }
    }

    pub fn health_checks_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop health checks, release every method's resources, and empty
    /// the registry. Safe to call repeatedly.
    ///
    /// Each method is released in its own task; one that panics is logged
    /// and does not stop the others.
    pub async fn cleanup(&self) {
        self.stop_health_checks().await;
        let methods = {
            let mut guard = self.methods.write().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if methods.is_empty() {
            return;
        }

        let tasks = methods.iter().map(|m| {
            let m = Arc::clone(m);
            tokio::spawn(async move { m.cleanup().await })
        });
        let joined = join_all(tasks).await;

        let mut failed = 0usize;
        for (method, outcome) in methods.iter().zip(joined) {
            if let Err(e) = outcome {
                failed += 1;
                tracing::error!("cleanup for {} aborted: {e}", method.name());
            }
        }
        tracing::info!(
            "released {} method(s), {failed} cleanup failure(s)",
            methods.len()
        );
    }
}
