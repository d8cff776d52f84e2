//! Shared HTTP fetcher for the built-in methods.
//!
//! Archive services throttle hard and often answer with gateway errors
//! while a snapshot is being served from cold storage, so transient
//! statuses are retried under a [`RetryPolicy`]. A timeout is never
//! retried: the method's budget is already spent.

use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};

const USER_AGENT: &str = concat!("article-unlock/", env!("CARGO_PKG_VERSION"));

/// Response headers the methods look at.
const KEPT_HEADERS: &[&str] = &["content-type", "location", "memento-datetime", "link"];

/// Response from a GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    /// Selected response headers, lower-cased names.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a single send produced, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Status {
        code: u16,
        retry_after: Option<Duration>,
    },
    Timeout,
    Connect,
}

/// When and how long to wait before sending again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Doubled after each retry.
    pub base_delay: Duration,
    /// Upper bound on any single wait, including a server's `Retry-After`.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), or `None` to give up.
    pub fn next_delay(&self, retry: u32, last: SendResult) -> Option<Duration> {
        if retry > self.max_retries {
            return None;
        }
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << (retry - 1).min(16))
            .min(self.max_delay);
        match last {
            SendResult::Status {
                code: 429,
                retry_after,
            } => Some(retry_after.unwrap_or(backoff).min(self.max_delay)),
            // Gateway and origin-unreachable codes, including the 52x range
            // CDNs in front of archives emit.
            SendResult::Status { code, .. } if matches!(code, 502..=504 | 520..=524) => {
                Some(backoff)
            }
            SendResult::Status { .. } | SendResult::Timeout => None,
            SendResult::Connect => Some(backoff),
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Cloneable handle onto pooled HTTP clients.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    /// Used when a server mishandles HTTP/2.
    http1: reqwest::Client,
    policy: RetryPolicy,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        let build = |http1_only: bool| {
            let builder = reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .redirect(reqwest::redirect::Policy::limited(8));
            let builder = if http1_only {
                builder.http1_only()
            } else {
                builder
            };
            builder.build().unwrap_or_default()
        };
        Self {
            client: build(false),
            http1: build(true),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url`, retrying transient failures. `timeout` bounds each send.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        self.get_with_headers(url, &[], timeout).await
    }

    /// GET with extra request headers.
    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut client = &self.client;
        let mut retry = 0u32;

        loop {
            retry += 1;
            let mut request = client.get(url).timeout(timeout);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            let last = match request.send().await {
                Ok(resp) => {
                    let code = resp.status().as_u16();
                    let last = SendResult::Status {
                        code,
                        retry_after: retry_after(resp.headers()),
                    };
                    match self.policy.next_delay(retry, last) {
                        Some(delay) => {
                            tracing::debug!("{url} answered {code}, retrying in {delay:?}");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => return Ok(read_response(url, resp).await),
                    }
                }
                Err(e) if e.is_timeout() => {
                    bail!("request to {url} timed out after {timeout:?}");
                }
                Err(e) => {
                    if is_protocol_error(&e) && std::ptr::eq(client, &self.client) {
                        tracing::debug!("{url}: HTTP/2 failure, switching to HTTP/1.1: {e}");
                        client = &self.http1;
                    }
                    match self.policy.next_delay(retry, SendResult::Connect) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            SendResult::Connect
                        }
                        None => return Err(e.into()),
                    }
                }
            };
            tracing::trace!("retry {retry} for {url} after {last:?}");
        }
    }
}

fn is_protocol_error(e: &reqwest::Error) -> bool {
    let text = e.to_string();
    text.contains("http2") || text.contains("protocol") || text.contains("connection closed")
}

async fn read_response(url: &str, resp: reqwest::Response) -> HttpResponse {
    let final_url = resp.url().to_string();
    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .filter(|(k, _)| KEPT_HEADERS.contains(&k.as_str()))
        .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
        .collect();
    let body = resp.text().await.unwrap_or_default();
    HttpResponse {
        url: url.to_string(),
        final_url,
        status,
        headers,
        body,
    }
}
