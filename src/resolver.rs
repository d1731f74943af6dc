//! The core resolve pipeline.
//!
//! One resolve issues a GET for the given URL, follows redirects under a
//! strict policy, canonicalizes the final address, and scans HTML responses
//! for a title. Special cases: Sailthru click-wrappers are decoded locally,
//! and tweet URLs are delegated to Twitter's oembed endpoint (both before
//! and after redirects).
//!
//! Errors are deliberately two-channel: whenever any useful URL has been
//! reached, it travels inside the error as a partial [`Resolution`].
//! Downstream callers display a canonicalized URL even when the title fetch
//! fails.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use publicsuffix::List;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, LOCATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};
use url::Url;

use crate::browser;
use crate::canonical::Canonicalizer;
use crate::config::ResolverConfig;
use crate::cookies::ResolveJar;
use crate::html;
use crate::sailthru;
use crate::security::{self, TargetError};
use crate::twitter::{self, TweetError, TweetFetcher};

/// The outcome of resolving a URL.
///
/// `resolved_url` is always populated: the canonical form of the final URL
/// actually fetched, or of the input when fetching never completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved_url: String,
    #[serde(default)]
    pub title: String,
    /// Each redirect hop's URL before following, canonicalized, in order.
    #[serde(default)]
    pub intermediate_urls: Vec<String>,
    /// Set on callers whose resolve was folded into another in-flight one.
    /// Observability only; not persisted.
    #[serde(skip)]
    pub coalesced: bool,
}

impl Resolution {
    pub fn new(resolved_url: String) -> Self {
        Self {
            resolved_url,
            title: String::new(),
            intermediate_urls: Vec::new(),
            coalesced: false,
        }
    }
}

/// Broad classification of resolve failures, used by the HTTP façade to
/// pick a public error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The overall deadline expired.
    Timeout,
    /// The operation was abandoned before completing.
    Canceled,
    /// The target failed the public-host/port policy.
    UnsafeTarget,
    /// Dial, TLS, or read failure.
    Transport,
    /// Content-encoding or body decoding failure.
    Decode,
    /// Twitter's oembed endpoint returned a non-200 response.
    TwitterUpstream,
    /// Twitter's oembed endpoint returned an unusable body.
    TwitterDecode,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "request timed out",
            ErrorKind::Canceled => "request canceled",
            ErrorKind::UnsafeTarget => "unsafe target",
            ErrorKind::Transport => "http request failed",
            ErrorKind::Decode => "error decoding response",
            ErrorKind::TwitterUpstream => "twitter oembed upstream error",
            ErrorKind::TwitterDecode => "invalid twitter oembed response",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolve failure carrying the best-effort partial resolution.
#[derive(Debug, Clone)]
pub struct ResolveError {
    pub kind: ErrorKind,
    pub resolution: Resolution,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ResolveError {
    pub fn new(kind: ErrorKind, resolution: Resolution) -> Self {
        Self {
            kind,
            resolution,
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    fn with_source_arc(mut self, source: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.kind, source),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

pub type ResolveResult = Result<Resolution, ResolveError>;

/// Anything that can resolve a URL. Implemented by the HTTP pipeline and by
/// the coalescing and caching layers that wrap it.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, url: &str) -> ResolveResult;
}

/// Error detail for a failed fetch step, before it is joined with the
/// partial resolution.
struct FetchFailure {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FetchFailure {
    fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    fn with_source(kind: ErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    fn into_error(self, resolution: Resolution) -> ResolveError {
        let err = ResolveError::new(self.kind, resolution);
        match self.source {
            Some(source) => err.with_source_arc(Arc::from(source)),
            None => err,
        }
    }
}

/// Resolves URLs by following redirects, canonicalizing the final URL, and
/// attempting to extract a title from HTML responses.
pub struct HttpResolver {
    client: reqwest::Client,
    config: ResolverConfig,
    canonicalizer: Canonicalizer,
    tweet_fetcher: TweetFetcher,
    suffix_list: Arc<List>,
}

impl HttpResolver {
    /// Creates a resolver on top of the given client. The client is
    /// expected to have automatic redirects disabled; the resolver follows
    /// them itself so it can record and police each hop.
    pub fn new(client: reqwest::Client, config: ResolverConfig) -> Self {
        let tweet_fetcher = TweetFetcher::new(client.clone(), config.oembed_base_url.clone());
        Self {
            client,
            config,
            canonicalizer: Canonicalizer::new(),
            tweet_fetcher,
            suffix_list: Arc::new(List::new()),
        }
    }

    async fn do_resolve(&self, given_url: &str) -> ResolveResult {
        let deadline = Instant::now() + self.config.timeout;

        // Canonicalize up front: a failed fetch should still report a
        // cleaned-up URL, and identical inputs coalesce better.
        let mut given = self.canonicalizer.canonicalize_str(given_url);
        let mut resolution = Resolution::new(given.clone());

        // Sailthru wrappers decode locally; the wrapper still counts as a hop.
        if let Some(target) = sailthru::unwrap_sailthru_url(&given) {
            resolution.intermediate_urls.push(given.clone());
            given = self.canonicalizer.canonicalize(&target);
            resolution.resolved_url = given.clone();
            debug!("unwrapped sailthru link to {given}");
        }

        // Tweet URLs short-circuit to the oembed endpoint.
        if let Some(tweet_url) = twitter::match_tweet_url(&given) {
            return self.resolve_tweet(&tweet_url, resolution, deadline).await;
        }

        let response = match self
            .fetch_following_redirects(&given, &mut resolution, deadline)
            .await
        {
            Ok(response) => response,
            Err(failure) => return Err(failure.into_error(resolution)),
        };

        // At this point the URL is resolved and canonicalized, whether or
        // not a title can be extracted.
        resolution.resolved_url = self.canonicalizer.canonicalize(response.url());

        // Check again for tweet URLs now that redirects are followed.
        if let Some(tweet_url) = twitter::match_tweet_url(&resolution.resolved_url) {
            return self.resolve_tweet(&tweet_url, resolution, deadline).await;
        }

        match self.read_title(response, deadline).await {
            Ok(title) => {
                resolution.title = title;
                Ok(resolution)
            }
            // Title failure is non-fatal: the canonical URL survives in the
            // error's partial resolution.
            Err(failure) => Err(failure.into_error(resolution)),
        }
    }

    async fn resolve_tweet(
        &self,
        tweet_url: &str,
        mut resolution: Resolution,
        deadline: Instant,
    ) -> ResolveResult {
        resolution.resolved_url = tweet_url.to_string();
        match timeout_at(deadline, self.tweet_fetcher.fetch(tweet_url)).await {
            Err(_) => Err(ResolveError::new(ErrorKind::Timeout, resolution)),
            Ok(Err(err)) => {
                // We still have a resolved tweet URL, so the partial result
                // goes back along with the error.
                warn!("tweet fetch failed for {tweet_url}: {err}");
                let kind = tweet_error_kind(&err);
                Err(ResolveError::new(kind, resolution).with_source(err))
            }
            Ok(Ok(tweet)) => {
                resolution.resolved_url = tweet.url;
                resolution.title = tweet.text;
                Ok(resolution)
            }
        }
    }

    async fn fetch_following_redirects(
        &self,
        start: &str,
        resolution: &mut Resolution,
        deadline: Instant,
    ) -> Result<reqwest::Response, FetchFailure> {
        let mut current = match Url::parse(start) {
            Ok(url) => url,
            Err(err) => return Err(FetchFailure::with_source(ErrorKind::Transport, err)),
        };

        // A fresh jar per resolve: cookies accumulated across these hops
        // must not leak into other resolves.
        let jar = ResolveJar::new(Arc::clone(&self.suffix_list));
        let mut hops_followed = 0usize;

        loop {
            if self.config.enforce_public_targets {
                if let Err(err) = security::check_url(&current) {
                    resolution.resolved_url = self.canonicalizer.canonicalize(&current);
                    return Err(FetchFailure::with_source(ErrorKind::UnsafeTarget, err));
                }
            }

            let mut headers = HeaderMap::new();
            // t.co serves its redirect target to simple clients
            if twitter::is_tco_url(current.as_str()) {
                headers.insert(USER_AGENT, HeaderValue::from_static(browser::CURL_USER_AGENT));
            }
            browser::apply_default_headers(&mut headers);
            if let Some(cookie) = jar.cookie_header(&current) {
                headers.insert(COOKIE, cookie);
            }

            debug!("GET {current}");
            let request = self.client.get(current.clone()).headers(headers).send();
            let response = match timeout_at(deadline, request).await {
                Err(_) => {
                    resolution.resolved_url = self.canonicalizer.canonicalize(&current);
                    return Err(FetchFailure::new(ErrorKind::Timeout));
                }
                Ok(Err(err)) => {
                    // Prefer the URL the error is annotated with: it names
                    // the hop that actually failed.
                    let failed = err.url().cloned().unwrap_or_else(|| current.clone());
                    resolution.resolved_url = self.canonicalizer.canonicalize(&failed);
                    let kind = classify_reqwest_error(&err);
                    return Err(FetchFailure::with_source(kind, err));
                }
                Ok(Ok(response)) => response,
            };

            jar.store_response_cookies(&response);

            if !is_redirect_status(response.status().as_u16()) {
                return Ok(response);
            }
            let Some(next) = redirect_target(&response, &current) else {
                return Ok(response);
            };

            // Record the hop we are leaving, then decide whether to follow.
            resolution
                .intermediate_urls
                .push(self.canonicalizer.canonicalize(&current));
            hops_followed += 1;
            if hops_followed >= self.config.max_redirects {
                debug!("redirect cap reached at {current}");
                return Ok(response);
            }
            if is_interstitial(next.as_str()) {
                debug!("refusing to follow interstitial redirect to {next}");
                return Ok(response);
            }
            current = next;
        }
    }

    async fn read_title(
        &self,
        mut response: reqwest::Response,
        deadline: Instant,
    ) -> Result<String, FetchFailure> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !html::should_parse_title(content_type.as_deref()) {
            return Ok(String::new());
        }

        // The client undoes gzip/deflate/brotli transparently; this loop
        // only enforces the read cap and the deadline.
        let mut body: Vec<u8> = Vec::new();
        loop {
            match timeout_at(deadline, response.chunk()).await {
                Err(_) => return Err(FetchFailure::new(ErrorKind::Timeout)),
                Ok(Err(err)) => {
                    let kind = match classify_reqwest_error(&err) {
                        ErrorKind::Transport => ErrorKind::Decode,
                        other => other,
                    };
                    return Err(FetchFailure::with_source(kind, err));
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(chunk))) => {
                    let remaining = self.config.max_body_size - body.len();
                    if chunk.len() >= remaining {
                        body.extend_from_slice(&chunk[..remaining]);
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
            }
        }

        let text = html::decode_body(&body, content_type.as_deref());
        Ok(html::find_title(&text))
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn resolve(&self, url: &str) -> ResolveResult {
        self.do_resolve(url).await
    }
}

/// Returns `true` for the redirect status codes that are followed: 301,
/// 302, 303, 307, 308. Other 3xx responses (300 Multiple Choices, 304 Not
/// Modified) are final even when they carry a stray Location header.
fn is_redirect_status(status_code: u16) -> bool {
    matches!(status_code, 301 | 302 | 303 | 307 | 308)
}

fn redirect_target(response: &reqwest::Response, current: &Url) -> Option<Url> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    Url::parse(location)
        .or_else(|_| current.join(location))
        .ok()
}

/// Redirect destinations that are never followed: auth walls and paywall
/// interstitials that would replace the page the caller asked about.
fn is_interstitial(url: &str) -> bool {
    url.contains("instagram.com/accounts/login/") || url.contains("forbes.com/forbes/welcome")
}

fn classify_reqwest_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if source_chain_has_target_error(err) {
        ErrorKind::UnsafeTarget
    } else if err.is_decode() || err.is_body() {
        ErrorKind::Decode
    } else {
        ErrorKind::Transport
    }
}

fn source_chain_has_target_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<TargetError>().is_some() {
            return true;
        }
        current = e.source();
    }
    false
}

fn tweet_error_kind(err: &TweetError) -> ErrorKind {
    match err {
        TweetError::UpstreamStatus { .. } => ErrorKind::TwitterUpstream,
        TweetError::Decode(_) => ErrorKind::TwitterDecode,
        TweetError::Transport(e) => classify_reqwest_error(e),
    }
}
