//! Utility functions for text normalization, truncation, URL resolution and date parsing.
//!
//! These helpers enforce the article normalization rules shared by every source
//! adapter:
//! - Titles are whitespace-collapsed and capped at [`MAX_TITLE_CHARS`]
//! - Content is capped at [`MAX_CONTENT_CHARS`] and never empty
//! - Publication dates are parsed best-effort and default to ingestion time

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Maximum stored title length, in characters.
pub const MAX_TITLE_CHARS: usize = 500;

/// Maximum stored content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Stored when extraction yields no article body.
pub const CONTENT_PLACEHOLDER: &str = "본문 없음";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and the number of
/// dropped bytes appended.
///
/// # Arguments
///
/// * `s` - The string to potentially truncate
/// * `max` - Maximum number of characters to keep
///
/// # Returns
///
/// The original string if it has at most `max` characters, otherwise the first
/// `max` characters followed by `"…(+N bytes)"`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Keep at most `max` characters, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => s[..cut].to_string(),
    }
}

/// Collapse every whitespace run into a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Normalize a headline for storage.
pub fn normalize_title(raw: &str) -> String {
    truncate_chars(&collapse_whitespace(raw), MAX_TITLE_CHARS)
}

/// Normalize an article body for storage.
///
/// # Returns
///
/// The trimmed body capped at [`MAX_CONTENT_CHARS`], or [`CONTENT_PLACEHOLDER`]
/// when nothing but whitespace was extracted.
pub fn normalize_content(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        CONTENT_PLACEHOLDER.to_string()
    } else {
        truncate_chars(trimmed, MAX_CONTENT_CHARS)
    }
}

/// Parse a publication timestamp, falling back to `now` when absent or unparseable.
///
/// Accepts RFC 2822 (RSS `pubDate`) and RFC 3339 (JSON-LD, `<time datetime>`).
///
/// # Arguments
///
/// * `raw` - The timestamp text as found in the feed or page, if any
/// * `now` - Ingestion time, used as the fallback
///
/// # Returns
///
/// The parsed instant converted to UTC, or `now`.
pub fn parse_published_at(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return now;
    };
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Resolve a possibly relative or protocol-relative link against `base`.
///
/// # Arguments
///
/// * `base` - URL of the page the link was found on
/// * `href` - Raw `href` or `src` attribute value
///
/// # Returns
///
/// An absolute `http`/`https` URL, or `None` for empty, unparseable or
/// non-web links such as `javascript:` and `mailto:`.
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).ok().map(String::from);
    }
    base.join(href)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
}

/// Mask the password of a connection URL for logging.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
