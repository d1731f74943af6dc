//! Sailthru click-tracking unwrapping.
//!
//! Sailthru marketing links look like
//! `https://link.example.com/click/123.456/<base64>/5f8a...` where the
//! base64 segment is the destination URL in URL-safe, unpadded encoding.
//! Decoding it locally skips a tracking round trip entirely.

use std::sync::LazyLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;
use url::Url;

static SAILTHRU_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://[^/]+/click/\d+\.\d+/([A-Za-z0-9=_-]+)/.+")
        .expect("sailthru pattern failed to compile - this is a bug")
});

/// Extracts the destination URL from a Sailthru click-tracking wrapper.
///
/// Returns `None` when the input does not look like a Sailthru link or the
/// embedded segment does not decode to an absolute http(s) URL.
pub fn unwrap_sailthru_url(raw: &str) -> Option<Url> {
    let captures = SAILTHRU_RE.captures(raw)?;
    let decoded = URL_SAFE_NO_PAD.decode(&captures[1]).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let url = Url::parse(&text).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}
