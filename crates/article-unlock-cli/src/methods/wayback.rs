//! Internet Archive snapshot lookup.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use article_unlock::{
    AttemptOptions, AttemptOutcome, HealthCheckResult, Method, MethodConfig, MethodCore,
};

use crate::http::HttpFetcher;
use crate::methods::check_endpoint;

pub const NAME: &str = "wayback";
pub const DEFAULT_API_BASE: &str = "https://archive.org";

#[derive(Debug, Deserialize)]
struct Availability {
    #[serde(default)]
    archived_snapshots: Snapshots,
}

#[derive(Debug, Default, Deserialize)]
struct Snapshots {
    closest: Option<Snapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub available: bool,
    pub url: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Pick the closest usable snapshot out of an availability API response.
pub fn parse_availability(body: &str) -> Option<Snapshot> {
    let parsed: Availability = serde_json::from_str(body).ok()?;
    parsed
        .archived_snapshots
        .closest
        .filter(|s| s.available && s.status.as_deref().map_or(true, |st| st == "200"))
}

pub struct Wayback {
    core: MethodCore,
    http: HttpFetcher,
    api_base: String,
    health_url: String,
}

impl Wayback {
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_api_base(http, DEFAULT_API_BASE)
    }

    pub fn with_api_base(http: HttpFetcher, api_base: &str) -> Self {
        let api_base = api_base.trim_end_matches('/').to_string();
        Self {
            core: MethodCore::new(NAME, MethodConfig::new(8, Duration::from_secs(20))),
            http,
            health_url: format!("{api_base}/wayback/available?url=example.com"),
            api_base,
        }
    }

    async fn lookup(&self, url: &str, timeout: Duration) -> Result<Snapshot, String> {
        let endpoint = url::Url::parse_with_params(
            &format!("{}/wayback/available", self.api_base),
            &[("url", url)],
        )
        .map_err(|e| format!("bad availability endpoint: {e}"))?;

        let resp = self
            .http
            .get(endpoint.as_str(), timeout)
            .await
            .map_err(|e| format!("availability lookup failed: {e}"))?;
        if !resp.is_success() {
            return Err(format!("availability API returned {}", resp.status));
        }
        parse_availability(&resp.body).ok_or_else(|| "no archived snapshot".to_string())
    }
}

#[async_trait]
impl Method for Wayback {
    fn core(&self) -> &MethodCore {
        &self.core
    }

    fn health_check_url(&self) -> &str {
        &self.health_url
    }

    async fn health_check(&self) -> HealthCheckResult {
        check_endpoint(
            &self.http,
            self.name(),
            self.health_check_url(),
            self.core.config().timeout(),
        )
        .await
    }

    async fn attempt(&self, url: &str, options: &AttemptOptions) -> AttemptOutcome {
        let timeout = options.effective_timeout(self.core.config().timeout());

        let snapshot = match self.lookup(url, timeout).await {
            Ok(s) => s,
            Err(e) => return AttemptOutcome::failed(e),
        };

        let resp = match self.http.get(&snapshot.url, timeout).await {
            Ok(r) => r,
            Err(e) => return AttemptOutcome::failed(format!("snapshot fetch failed: {e}")),
        };
        if !resp.is_success() {
            return AttemptOutcome::failed(format!("snapshot returned {}", resp.status));
        }

        let mut outcome = AttemptOutcome::ok(resp.body).with_meta("snapshot_url", snapshot.url);
        if let Some(ts) = snapshot.timestamp {
            outcome = outcome.with_meta("timestamp", ts);
        }
        outcome
    }
}
