//! Utility functions for URL canonicalization, timestamp parsing, text cleanup,
//! and file system checks.
//!
//! This module provides helpers used throughout the crate:
//! - Canonical URL derivation for the deduplication key
//! - Lenient parsing of the timestamp formats news listings print
//! - Whitespace cleanup and truncation for logging
//! - File system validation for the stats output directory

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{debug, instrument};
use url::Url;

use crate::error::ValidationError;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Naive formats seen in listing bylines, tried in order.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"];

/// Derive the canonical form of an article URL.
///
/// Relative links are resolved against `base`. The result has no fragment,
/// no default port, a lowercase host, no trailing slash on the path (except
/// for the root), and keeps only the query parameters listed in
/// `keep_params`, sorted by name so parameter order never changes the key.
///
/// # Examples
///
/// ```ignore
/// let url = canonicalize_url("/news/articleView.html?idxno=7&page=2#top", Some(&base), &["idxno"])?;
/// assert_eq!(url, "http://www.sisaon.co.kr/news/articleView.html?idxno=7");
/// ```
pub fn canonicalize_url(
    raw: &str,
    base: Option<&Url>,
    keep_params: &[&str],
) -> Result<String, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingUrl);
    }

    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(raw)
                .map_err(|e| ValidationError::InvalidUrl(format!("{raw}: {e}")))?,
            None => return Err(ValidationError::InvalidUrl(raw.to_string())),
        },
        Err(e) => return Err(ValidationError::InvalidUrl(format!("{raw}: {e}"))),
    };

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ValidationError::InvalidUrl(raw.to_string()));
    }

    let mut canonical = parsed.clone();
    canonical.set_fragment(None);
    // `Url` already lowercases hosts and drops default ports on parse.

    let mut kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| keep_params.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort();
    kept.dedup_by(|a, b| a.0 == b.0);

    if kept.is_empty() {
        canonical.set_query(None);
    } else {
        canonical.query_pairs_mut().clear().extend_pairs(kept.iter());
    }

    let path = canonical.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        canonical.set_path(path.trim_end_matches('/'));
    }

    Ok(canonical.to_string())
}

/// Parse a published timestamp as printed by a listing page.
///
/// RFC 3339 strings carry their own offset; naive strings are interpreted in
/// `offset` (the source's local time). Date-only strings map to midnight.
pub fn parse_published(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NAIVE_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn clean_text(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (on a char boundary)
/// with an ellipsis and byte count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure the directory that will hold `file_path` exists and is writable.
///
/// Creates the parent directory if needed, then performs a write test by
/// creating and immediately deleting a probe file.
#[instrument(level = "debug", skip_all, fields(path = %file_path.display()))]
pub async fn ensure_writable_parent(file_path: &Path) -> Result<(), Box<dyn Error>> {
    let dir = match file_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&dir).await?;

    let probe_path = dir.join("..__probe_write__");
    fs::write(&probe_path, b"").await?;
    let _ = fs::remove_file(&probe_path).await;
    debug!(dir = %dir.display(), "Output directory is writable");
    Ok(())
}
