//! Built-in retrieval methods and their registration table.

pub mod archive_today;
pub mod direct;
pub mod wayback;

use std::sync::Arc;
use std::time::{Duration, Instant};

use article_unlock::{HealthCheckResult, Method, MethodRegistry, UnlockResult};

use crate::http::HttpFetcher;

pub use archive_today::ArchiveToday;
pub use direct::Direct;
pub use wayback::Wayback;

type Factory = fn(&HttpFetcher) -> Arc<dyn Method>;

/// Every built-in method, in registration order.
const BUILTIN: &[(&str, Factory)] = &[
    (wayback::NAME, make_wayback),
    (archive_today::NAME, make_archive_today),
    (direct::NAME, make_direct),
];

fn make_wayback(http: &HttpFetcher) -> Arc<dyn Method> {
    Arc::new(Wayback::new(http.clone()))
}

fn make_archive_today(http: &HttpFetcher) -> Arc<dyn Method> {
    Arc::new(ArchiveToday::new(http.clone()))
}

fn make_direct(http: &HttpFetcher) -> Arc<dyn Method> {
    Arc::new(Direct::new(http.clone()))
}

/// Names of the built-in methods.
pub fn builtin_names() -> Vec<&'static str> {
    BUILTIN.iter().map(|(name, _)| *name).collect()
}

/// Instantiate every built-in method over a shared fetcher.
pub fn builtin_methods(http: &HttpFetcher) -> Vec<Arc<dyn Method>> {
    BUILTIN.iter().map(|(_, make)| make(http)).collect()
}

/// Register every built-in method with `registry`.
pub fn register_builtin(registry: &MethodRegistry, http: &HttpFetcher) -> UnlockResult<()> {
    for method in builtin_methods(http) {
        registry.register(method)?;
    }
    Ok(())
}

/// Health check shared by the built-ins: the endpoint answers without a
/// server error.
pub(crate) async fn check_endpoint(
    http: &HttpFetcher,
    name: &str,
    url: &str,
    timeout: Duration,
) -> HealthCheckResult {
    let started = Instant::now();
    let result = http.get(url, timeout).await;
    let elapsed = started.elapsed().as_millis() as u64;
    match result {
        Ok(resp) if resp.status < 500 => HealthCheckResult {
            healthy: true,
            response_time_ms: Some(elapsed),
            error: None,
            message: format!("{name} endpoint answered {} in {elapsed}ms", resp.status),
        },
        Ok(resp) => HealthCheckResult {
            response_time_ms: Some(elapsed),
            ..HealthCheckResult::unhealthy(format!("{name} endpoint returned {}", resp.status))
        },
        Err(e) => HealthCheckResult {
            response_time_ms: Some(elapsed),
            ..HealthCheckResult::unhealthy(format!("{name} endpoint unreachable: {e}"))
        },
    }
}
