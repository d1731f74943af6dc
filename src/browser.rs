//! Browser-like request headers.
//!
//! Many sites serve a bare bot response (or none at all) to clients without
//! browser headers. Not very sportsmanlike, but basically effective at
//! letting us fetch page titles.
//!
//! `t.co` is the exception: Twitter's shortener serves its redirect target
//! directly to simple clients, so those requests masquerade as curl instead.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};

const ACCEPT_VALUE: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.5";
const REFERER_VALUE: &str = "https://duckduckgo.com/";
const USER_AGENT_VALUE: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:87.0) Gecko/20100101 Firefox/87.0";

/// User-Agent used for t.co URLs.
pub const CURL_USER_AGENT: &str = "curl/7.64.1";

/// Fills in browser-like headers for any header not already set.
///
/// Accept-Encoding is deliberately left alone: the HTTP client negotiates
/// gzip/deflate/brotli itself and transparently decodes the response body.
pub fn apply_default_headers(headers: &mut HeaderMap) {
    let defaults = [
        (ACCEPT, ACCEPT_VALUE),
        (ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE),
        (REFERER, REFERER_VALUE),
        (USER_AGENT, USER_AGENT_VALUE),
    ];
    for (name, value) in defaults {
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_all_defaults_on_empty_headers() {
        let mut headers = HeaderMap::new();
        apply_default_headers(&mut headers);
        assert_eq!(headers.get(ACCEPT).unwrap(), ACCEPT_VALUE);
        assert_eq!(headers.get(ACCEPT_LANGUAGE).unwrap(), ACCEPT_LANGUAGE_VALUE);
        assert_eq!(headers.get(REFERER).unwrap(), REFERER_VALUE);
        assert_eq!(headers.get(USER_AGENT).unwrap(), USER_AGENT_VALUE);
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn test_existing_headers_are_preserved() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CURL_USER_AGENT));
        apply_default_headers(&mut headers);
        assert_eq!(headers.get(USER_AGENT).unwrap(), CURL_USER_AGENT);
        assert_eq!(headers.get(ACCEPT).unwrap(), ACCEPT_VALUE);
    }

    #[test]
    fn test_accept_encoding_is_not_set() {
        let mut headers = HeaderMap::new();
        apply_default_headers(&mut headers);
        assert!(headers.get(reqwest::header::ACCEPT_ENCODING).is_none());
    }
}
