//! Per-resolve cookie handling.
//!
//! Some redirectors only forward clients that accept and return cookies, so
//! the resolver carries a jar across the hops of a single resolve. The jar
//! never outlives its resolve: cookies must not leak between lookups of
//! unrelated URLs.
//!
//! `Set-Cookie` values whose `Domain` attribute names a bare public suffix
//! (e.g. `Domain=com` or `Domain=co.uk`) are discarded, so a hop on one
//! site cannot plant a supercookie covering every other site under the same
//! suffix.

use std::sync::Arc;

use log::debug;
use publicsuffix::{List, Psl};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, SET_COOKIE};
use url::Url;

/// A cookie jar scoped to a single resolve.
pub struct ResolveJar {
    jar: Jar,
    suffix_list: Arc<List>,
}

impl ResolveJar {
    pub fn new(suffix_list: Arc<List>) -> Self {
        Self {
            jar: Jar::default(),
            suffix_list,
        }
    }

    /// Stores the response's `Set-Cookie` headers, dropping any cookie whose
    /// `Domain` attribute is a bare public suffix.
    pub fn store_response_cookies(&self, response: &reqwest::Response) {
        let url = response.url();
        for value in response.headers().get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            if let Some(domain) = cookie_domain_attribute(raw) {
                if self.suffix_list.domain(domain.as_bytes()).is_none() {
                    debug!("dropping supercookie for domain {domain} from {url}");
                    continue;
                }
            }
            self.jar.add_cookie_str(raw, url);
        }
    }

    /// The `Cookie` header value to send to `url`, if any cookies match.
    pub fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

/// Extracts the `Domain` attribute from a raw `Set-Cookie` value, without
/// any leading dot.
fn cookie_domain_attribute(raw: &str) -> Option<String> {
    for attribute in raw.split(';').skip(1) {
        let attribute = attribute.trim();
        if let Some((name, value)) = attribute.split_once('=') {
            if name.trim().eq_ignore_ascii_case("domain") {
                let domain = value.trim().trim_start_matches('.');
                if !domain.is_empty() {
                    return Some(domain.to_ascii_lowercase());
                }
            }
        }
    }
    None
}
