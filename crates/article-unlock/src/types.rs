//! Core data types shared by methods, the registry, and the orchestrator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lowest allowed method priority.
pub const MIN_PRIORITY: u8 = 1;

/// Highest allowed method priority.
pub const MAX_PRIORITY: u8 = 10;

/// Consecutive failures after which a method is considered unhealthy.
pub const UNHEALTHY_THRESHOLD: u32 = 3;

/// Smoothing factor for the per-method response time EMA.
pub const EMA_ALPHA: f64 = 0.1;

/// What a single method attempt produced.
///
/// Methods never return errors from `attempt`; every failure is folded into
/// an outcome with `success == false` and a human-readable `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AttemptOutcome {
    /// A successful attempt carrying the retrieved content.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
            metadata: Map::new(),
        }
    }

    /// A failed attempt with an explanation.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Caller-supplied options threaded through to every method.
#[derive(Debug, Clone, Default)]
pub struct AttemptOptions {
    /// Upper bound the caller is willing to wait per method. Methods honor
    /// this themselves; the orchestrator does not cancel in-flight attempts.
    pub timeout: Option<Duration>,
    /// Skip the paywall classifier and always run the method chain.
    pub force: bool,
    /// Free-form hints for individual methods.
    pub extra: Map<String, Value>,
}

impl AttemptOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// Effective timeout: the caller's bound, capped by the method's own.
    pub fn effective_timeout(&self, method_timeout: Duration) -> Duration {
        match self.timeout {
            Some(t) => t.min(method_timeout),
            None => method_timeout,
        }
    }
}

/// Circuit-breaker state of a method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

impl HealthStatus {
    /// Fold one observation into the state machine.
    ///
    /// A single success restores health; `UNHEALTHY_THRESHOLD` consecutive
    /// failures trip it. Returns `true` when `healthy` flipped.
    pub fn observe(&mut self, success: bool, error: Option<String>) -> bool {
        let was_healthy = self.healthy;
        self.last_check = Some(Utc::now());
        if success {
            self.consecutive_failures = 0;
            self.last_error = None;
            self.healthy = true;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_error = error;
            if self.consecutive_failures >= UNHEALTHY_THRESHOLD {
                self.healthy = false;
            }
        }
        was_healthy != self.healthy
    }
}

/// Result of probing a method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub message: String,
}

impl HealthCheckResult {
    pub fn unhealthy(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            healthy: false,
            response_time_ms: None,
            message: format!("health check failed: {error}"),
            error: Some(error),
        }
    }
}

/// Per-method lifetime counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodMetrics {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    /// Exponential moving average, see [`EMA_ALPHA`].
    pub average_response_time_ms: f64,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl MethodMetrics {
    pub fn record(&mut self, success: bool, response_time_ms: u64) {
        let sample = response_time_ms as f64;
        self.average_response_time_ms = if self.total_attempts == 0 {
            sample
        } else {
            EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * self.average_response_time_ms
        };
        self.total_attempts += 1;
        if success {
            self.successful_attempts += 1;
        }
        self.last_attempt = Some(Utc::now());
    }

    /// Fraction of successful attempts in `[0, 1]`; 0 with no attempts.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }
}

/// User-tunable method settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodConfig {
    pub enabled: bool,
    pub priority: u8,
    pub timeout_ms: u64,
}

impl MethodConfig {
    pub fn new(priority: u8, timeout: Duration) -> Self {
        Self {
            enabled: true,
            priority,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Merge a partial update. Priority is clamped into range.
    pub fn merge(&mut self, patch: &MethodConfigPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        }
        if let Some(timeout_ms) = patch.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
    }
}

/// Partial [`MethodConfig`] update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MethodConfigPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Point-in-time view of a method for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSnapshot {
    pub name: String,
    pub config: MethodConfig,
    pub health: HealthStatus,
    pub metrics: MethodMetrics,
    pub success_rate: f64,
    pub available: bool,
}

/// A successful orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bypassed {
    pub url: String,
    pub content: Option<String>,
    pub method: String,
    pub response_time_ms: u64,
    pub metadata: Map<String, Value>,
    pub request_id: String,
}

/// Errors that can occur in the unlock engine.
#[derive(thiserror::Error, Debug)]
pub enum UnlockError {
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("not applicable")]
    NotApplicable,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("no available methods")]
    NoAvailableMethods,

    #[error("all methods failed")]
    AllMethodsFailed { attempted: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type UnlockResult<T> = Result<T, UnlockError>;
