//! article-unlock: adaptive method orchestration for retrieving blocked
//! articles.
//!
//! Methods are registered in a [`MethodRegistry`], which tracks their health.
//! The [`Orchestrator`] picks candidates per domain, tries them in order,
//! records every outcome in the [`MetricsStore`], and learns a
//! [`DomainStrategy`] from the results.

pub mod classifier;
pub mod config;
pub mod method;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limit;
pub mod registry;
pub mod strategy;
pub mod types;
pub mod urls;

pub use classifier::{DomainListClassifier, PaywallClassifier, WhitelistStore};
pub use config::{DomainSeed, OrchestratorSettings, UnlockConfig};
pub use method::{Method, MethodCore};
pub use metrics::{AttemptRecord, MetricsAggregate, MetricsStore};
pub use orchestrator::{HealthOverview, Orchestrator, OrchestratorMetrics};
pub use rate_limit::RateLimiter;
pub use registry::{HealthReport, MethodRegistry};
pub use strategy::{DomainStrategy, StrategyBook};
pub use types::*;
