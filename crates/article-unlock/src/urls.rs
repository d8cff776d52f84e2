//! URL normalization and domain extraction.

use url::Url;

use crate::types::{UnlockError, UnlockResult};

/// Query parameters that only carry tracking state.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref"];

/// Canonical form used as the rate-limit key and in attempt records.
///
/// Lower-cases the host, drops the fragment and tracking parameters, and
/// rejects anything that is not http(s).
pub fn normalize(raw: &str) -> UnlockResult<String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| UnlockError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(UnlockError::InvalidUrl(format!(
            "{raw}: unsupported scheme {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(UnlockError::InvalidUrl(format!("{raw}: missing host")));
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Registrable-looking host of `raw`, in [`canonical_domain`] form.
pub fn extract_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = canonical_domain(url.host_str()?);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Key form shared by every domain-indexed table: trimmed, lower-cased,
/// no trailing dot, no leading `www.`.
pub fn canonical_domain(domain: &str) -> String {
    let d = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    match d.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => d,
    }
}
