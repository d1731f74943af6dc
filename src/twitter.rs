//! Tweet resolution via Twitter's oembed endpoint.
//!
//! Tweet URLs are not worth fetching directly: the page is an app shell
//! whose `<title>` says nothing about the tweet. The public oembed endpoint
//! returns the canonical tweet URL plus an HTML snippet we can mine for a
//! usable one-line text.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{Html, Node, Selector};
use serde::Deserialize;
use url::Url;

use crate::browser;

/// Default oembed endpoint.
pub const DEFAULT_OEMBED_URL: &str = "https://publish.twitter.com/oembed";

static TWEET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https://(mobile\.)?twitter\.com/([^/]+/status/\d+|i/web/status/\d+)")
        .expect("tweet pattern failed to compile - this is a bug")
});

static TCO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://t\.co/.+").expect("t.co pattern failed to compile - this is a bug")
});

static PARAGRAPH_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("p").expect("paragraph selector failed to parse - this is a bug")
});

/// A minimal representation of a tweet.
#[derive(Debug, Clone, PartialEq)]
pub struct Tweet {
    pub url: String,
    pub text: String,
}

/// Errors from the oembed endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TweetError {
    #[error("twitter oembed error: GET {url}: HTTP {status}")]
    UpstreamStatus { url: String, status: u16 },
    #[error("invalid twitter oembed response: {0}")]
    Decode(String),
    #[error("error fetching twitter oembed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct OembedResponse {
    #[serde(default)]
    url: String,
    #[serde(default)]
    html: String,
}

/// Matches URLs pointing to tweets. If matched, returns the URL to the
/// tweet after removing extra data (media paths, query params, etc).
///
/// The oembed endpoint does not accept the odd `/i/web/status/XXX` URLs
/// that carry a tweet ID without a username, but it does accept a made-up
/// tweet URL with that same ID, so those are rewritten to a placeholder
/// `__urlresolver__` user.
pub fn match_tweet_url(raw: &str) -> Option<String> {
    let matched = TWEET_RE.find(raw)?.as_str();
    if matched.contains("/i/web/") {
        Some(matched.replace("/i/web/", "/__urlresolver__/"))
    } else {
        Some(matched.to_string())
    }
}

/// Matches t.co shortener URLs.
pub fn is_tco_url(raw: &str) -> bool {
    TCO_RE.is_match(raw)
}

/// Client for Twitter's oembed endpoint.
pub struct TweetFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl TweetFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Returns the canonical URL and text for a tweet by fetching its
    /// metadata from the oembed endpoint.
    ///
    /// # Arguments
    ///
    /// * `tweet_url` - A tweet URL as returned by [`match_tweet_url`]
    ///
    /// # Errors
    ///
    /// Returns `TweetError::UpstreamStatus` for non-200 responses,
    /// `TweetError::Decode` for unusable JSON, and `TweetError::Transport`
    /// when the request itself fails. Callers treat all of these as soft:
    /// the tweet URL is still a useful resolution without its text.
    pub async fn fetch(&self, tweet_url: &str) -> Result<Tweet, TweetError> {
        let oembed_url = Url::parse_with_params(&self.base_url, [("url", tweet_url)])
            .map_err(|e| TweetError::Decode(format!("bad oembed url: {e}")))?;

        let mut headers = HeaderMap::new();
        browser::apply_default_headers(&mut headers);

        debug!("fetching tweet metadata: {oembed_url}");
        let response = self
            .client
            .get(oembed_url.clone())
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(TweetError::UpstreamStatus {
                url: oembed_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let oembed: OembedResponse = serde_json::from_slice(&body)
            .map_err(|e| TweetError::Decode(format!("invalid json: {e}")))?;

        if oembed.url.is_empty() || oembed.html.is_empty() {
            return Err(TweetError::Decode(
                "missing url or html field in oembed response".to_string(),
            ));
        }

        Ok(Tweet {
            url: oembed.url,
            text: extract_tweet_text(&oembed.html),
        })
    }
}

/// Extracts the text content of a tweet from its HTML form in the oembed
/// response: the text of the first `<p>` element, with each nested opening
/// tag replaced by a space and whitespace runs collapsed.
///
/// The goal is not perfect fidelity to the original tweet, but something
/// useful as the sanitized "title" for a tweet URL.
pub fn extract_tweet_text(html: &str) -> String {
    let document = Html::parse_fragment(html);
    let Some(paragraph) = document.select(&PARAGRAPH_SELECTOR).next() else {
        return String::new();
    };

    // Walk the paragraph's subtree in document order. Only an element's
    // opening boundary becomes a space; closing boundaries contribute
    // nothing, so text following a closed tag runs on directly.
    let mut buf = String::new();
    for node in paragraph.descendants().skip(1) {
        match node.value() {
            Node::Element(_) => buf.push(' '),
            Node::Text(text) => buf.push_str(text),
            _ => {}
        }
    }
    buf.split_whitespace().collect::<Vec<_>>().join(" ")
}
