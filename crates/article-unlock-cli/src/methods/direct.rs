//! Plain fetch of the original URL with reader-friendly headers.

use std::time::Duration;

use async_trait::async_trait;

use article_unlock::{
    AttemptOptions, AttemptOutcome, HealthCheckResult, Method, MethodConfig, MethodCore,
};

use crate::http::HttpFetcher;
use crate::methods::check_endpoint;

pub const NAME: &str = "direct";

/// Below this many bytes a page is treated as a teaser.
const MIN_CONTENT_BYTES: usize = 2_000;

const PAYWALL_MARKERS: &[&str] = &[
    "subscribe to continue",
    "subscribe to read",
    "subscriber-only",
    "this content is for subscribers",
    "create a free account to continue",
    "paywall",
];

const READER_HEADERS: &[(&str, &str)] = &[
    ("accept", "text/html,application/xhtml+xml"),
    ("accept-language", "en-US,en;q=0.9"),
    ("referer", "https://www.google.com/"),
];

/// Whether `body` looks like a paywall page rather than the article.
pub fn looks_paywalled(body: &str) -> bool {
    if body.len() < MIN_CONTENT_BYTES {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    PAYWALL_MARKERS.iter().any(|m| lower.contains(m))
}

pub struct Direct {
    core: MethodCore,
    http: HttpFetcher,
}

impl Direct {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            core: MethodCore::new(NAME, MethodConfig::new(5, Duration::from_secs(15))),
            http,
        }
    }
}

#[async_trait]
impl Method for Direct {
    fn core(&self) -> &MethodCore {
        &self.core
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
        let resp = match self.http.get_with_headers(url, READER_HEADERS, timeout).await {
            Ok(r) => r,
            Err(e) => return AttemptOutcome::failed(format!("fetch failed: {e}")),
        };
        if !resp.is_success() {
            return AttemptOutcome::failed(format!("server returned {}", resp.status));
        }
        if looks_paywalled(&resp.body) {
            return AttemptOutcome::failed("response looks paywalled");
        }
        AttemptOutcome::ok(resp.body).with_meta("final_url", resp.final_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_body_is_teaser() {
        assert!(looks_paywalled("<p>Lead paragraph</p>"));
    }

    #[test]
    fn test_marker_detected_case_insensitively() {
        let body = format!("{}<div>Subscribe to continue reading</div>", "x".repeat(3000));
        assert!(looks_paywalled(&body));
    }

    #[test]
    fn test_full_article_passes() {
        let body = format!("<article>{}</article>", "word ".repeat(1000));
        assert!(!looks_paywalled(&body));
    }
}
