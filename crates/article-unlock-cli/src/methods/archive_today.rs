//! archive.today newest-snapshot redirect.

use std::time::Duration;

use async_trait::async_trait;

use article_unlock::{
    AttemptOptions, AttemptOutcome, HealthCheckResult, Method, MethodConfig, MethodCore,
};

use crate::http::HttpFetcher;
use crate::methods::check_endpoint;

pub const NAME: &str = "archive_today";
pub const DEFAULT_BASE: &str = "https://archive.ph";

pub struct ArchiveToday {
    core: MethodCore,
    http: HttpFetcher,
    base: String,
}

impl ArchiveToday {
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_base(http, DEFAULT_BASE)
    }

    pub fn with_base(http: HttpFetcher, base: &str) -> Self {
        Self {
            core: MethodCore::new(NAME, MethodConfig::new(7, Duration::from_secs(30))),
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn newest_url(&self, url: &str) -> String {
        format!("{}/newest/{url}", self.base)
    }
}

#[async_trait]
impl Method for ArchiveToday {
    fn core(&self) -> &MethodCore {
        &self.core
    }

    fn health_check_url(&self) -> &str {
        &self.base
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
        let requested = self.newest_url(url);

        let resp = match self.http.get(&requested, timeout).await {
            Ok(r) => r,
            Err(e) => return AttemptOutcome::failed(format!("archive request failed: {e}")),
        };
        if !resp.is_success() {
            return AttemptOutcome::failed(format!("archive returned {}", resp.status));
        }
        // No redirect means the archive has no snapshot for this URL.
        if resp.final_url == requested || resp.final_url.contains("/newest/") {
            return AttemptOutcome::failed("no archived snapshot");
        }

        AttemptOutcome::ok(resp.body).with_meta("snapshot_url", resp.final_url)
    }
}
