//! Stable identities: dedup keys, normalized URLs and derived source names.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{DiscoveryError, Result};

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Case-fold and collapse runs of whitespace.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic fingerprint of `(title, start, venue)`, so the same show
/// reported by two sources collapses onto one record.
pub fn dedup_key(title: &str, start: Option<NaiveDateTime>, venue_name: &str) -> String {
    let start = start
        .map(|dt| dt.format("%Y-%m-%dT%H:%M").to_string())
        .unwrap_or_default();
    let material = format!("{}|{}|{}", normalize_text(title), start, normalize_text(venue_name));
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(&digest[..16])
}

/// Canonical form of a user-supplied URL: http(s) only, lowercase host,
/// no fragment, no tracking parameters, no trailing slash (except the root).
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(DiscoveryError::Parse(format!(
            "unsupported URL scheme '{}' in {}",
            url.scheme(),
            raw
        )));
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && k != "fbclid" && k != "gclid")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    Ok(url.to_string())
}

/// Host without a leading `www.`.
pub fn bare_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.trim_start_matches("www.").to_lowercase())
}

/// Source name derived from the first host label: `https://www.le-poisson-rouge.com`
/// becomes `le_poisson_rouge`.
pub fn source_name_from_url(raw: &str) -> String {
    let host = Url::parse(raw)
        .ok()
        .and_then(|u| bare_host(&u))
        .unwrap_or_else(|| raw.to_lowercase());
    let label = host.split('.').next().unwrap_or_default();
    NON_ALNUM
        .replace_all(&label.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}
