//! Engine configuration: method overrides, domain seeds, and tuning knobs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::rate_limit::DEFAULT_MAX_PER_MINUTE;
use crate::strategy::DEFAULT_MAX_STRATEGIES;
use crate::types::{MethodConfigPatch, UnlockError, UnlockResult, MAX_PRIORITY, MIN_PRIORITY};

/// Configured starting point for a domain's strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomainSeed {
    #[serde(default)]
    pub preferred_methods: Vec<String>,
    #[serde(default)]
    pub blacklisted_methods: Vec<String>,
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub rate_limit_per_minute: u32,
    /// Zero disables periodic health checks.
    pub health_check_interval_secs: u64,
    pub max_domain_strategies: usize,
    /// Domain attempts a method needs before its history affects ordering.
    pub min_history_attempts: u64,
    pub blacklist_min_attempts: u64,
    /// Percent.
    pub blacklist_max_failure_rate: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: DEFAULT_MAX_PER_MINUTE,
            health_check_interval_secs: 300,
            max_domain_strategies: DEFAULT_MAX_STRATEGIES,
            min_history_attempts: 3,
            blacklist_min_attempts: 10,
            blacklist_max_failure_rate: 90.0,
        }
    }
}

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnlockConfig {
    #[serde(default)]
    pub methods: BTreeMap<String, MethodConfigPatch>,
    #[serde(default)]
    pub domains: BTreeMap<String, DomainSeed>,
    #[serde(default)]
    pub paywalled_domains: Vec<String>,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl UnlockConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> UnlockResult<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| UnlockError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> UnlockResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> UnlockResult<()> {
        for (name, patch) in &self.methods {
            if let Some(p) = patch.priority {
                if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&p) {
                    return Err(UnlockError::Config(format!(
                        "method {name}: priority {p} outside {MIN_PRIORITY}..={MAX_PRIORITY}"
                    )));
                }
            }
            if patch.timeout_ms == Some(0) {
                return Err(UnlockError::Config(format!(
                    "method {name}: timeout_ms must be positive"
                )));
            }
        }
        let settings = &self.orchestrator;
        if settings.rate_limit_per_minute == 0 {
            return Err(UnlockError::Config(
                "rate_limit_per_minute must be at least 1".to_string(),
            ));
        }
        if settings.max_domain_strategies < self.domains.len().max(1) {
            return Err(UnlockError::Config(format!(
                "max_domain_strategies {} cannot hold the {} seeded domain(s)",
                settings.max_domain_strategies,
                self.domains.len()
            )));
        }
        let rate = settings.blacklist_max_failure_rate;
        if !(0.0..=100.0).contains(&rate) {
            return Err(UnlockError::Config(format!(
                "blacklist_max_failure_rate {rate} outside 0..=100"
            )));
        }
        Ok(())
    }
}
