//! End-to-end resolver tests against local mock servers.
//!
//! These exercise the full pipeline: redirect following and recording,
//! canonicalization of the final URL, title extraction and charset
//! handling, tweet and Sailthru short-circuits, coalescing, and caching.
//!
//! The public-target policy is disabled here (the fixtures live on
//! loopback); its enforcement has its own tests at the bottom.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use link_resolver::{
    CachedResolver, ErrorKind, HttpResolver, MemoryCache, Resolver, ResolverConfig,
    SingleflightResolver,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build test client")
}

fn test_config() -> ResolverConfig {
    ResolverConfig {
        enforce_public_targets: false,
        timeout: Duration::from_secs(5),
        ..ResolverConfig::default()
    }
}

fn test_resolver(config: ResolverConfig) -> HttpResolver {
    HttpResolver::new(test_client(), config)
}

fn html_page(title: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head><title>{title}</title></head><body></body></html>"),
        "text/html; charset=utf-8",
    )
}

#[tokio::test]
async fn test_redirect_chain_records_intermediate_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/c"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(html_page("Success"))
        .mount(&server)
        .await;

    let resolver = test_resolver(test_config());
    let resolution = resolver
        .resolve(&format!("{}/a", server.uri()))
        .await
        .expect("resolve should succeed");

    assert_eq!(resolution.resolved_url, format!("{}/c", server.uri()));
    assert_eq!(resolution.title, "Success");
    assert_eq!(
        resolution.intermediate_urls,
        vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())]
    );
}

#[tokio::test]
async fn test_redirect_cap_stops_infinite_chains() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let config = ResolverConfig {
        max_redirects: 3,
        ..test_config()
    };
    let resolution = test_resolver(config)
        .resolve(&format!("{}/loop", server.uri()))
        .await
        .expect("capped chain still resolves");

    // The last fetched URL is the result, and exactly max_redirects
    // requests went out.
    assert_eq!(resolution.resolved_url, format!("{}/loop", server.uri()));
    assert_eq!(resolution.intermediate_urls.len(), 3);
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_304_with_location_is_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(ResponseTemplate::new(304).insert_header("Location", "/elsewhere"))
        .mount(&server)
        .await;

    let resolution = test_resolver(test_config())
        .resolve(&format!("{}/cached", server.uri()))
        .await
        .expect("304 is a final response, not a redirect");

    assert_eq!(resolution.resolved_url, format!("{}/cached", server.uri()));
    assert!(resolution.intermediate_urls.is_empty());
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1, "the Location header must be ignored");
}

#[tokio::test]
async fn test_tracking_params_stripped_from_resolved_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/foo"))
        .respond_with(html_page("Clean"))
        .mount(&server)
        .await;

    let resolution = test_resolver(test_config())
        .resolve(&format!("{}/foo?utm_source=x&a=1", server.uri()))
        .await
        .expect("resolve should succeed");

    assert_eq!(resolution.resolved_url, format!("{}/foo?a=1", server.uri()));
    assert_eq!(resolution.title, "Clean");
}

#[tokio::test]
async fn test_interstitial_redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ig"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "https://instagram.com/accounts/login/?next=/p/x/"),
        )
        .mount(&server)
        .await;

    let resolution = test_resolver(test_config())
        .resolve(&format!("{}/ig", server.uri()))
        .await
        .expect("resolve should succeed");

    // The chain stops on our side of the interstitial; instagram itself is
    // never contacted.
    assert_eq!(resolution.resolved_url, format!("{}/ig", server.uri()));
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_cookies_are_carried_across_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/landing")
                .insert_header("Set-Cookie", "session=abc; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .and(header("cookie", "session=abc"))
        .respond_with(html_page("WithCookie"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(html_page("NoCookie"))
        .mount(&server)
        .await;

    let resolution = test_resolver(test_config())
        .resolve(&format!("{}/start", server.uri()))
        .await
        .expect("resolve should succeed");

    assert_eq!(resolution.title, "WithCookie");
}

#[tokio::test]
async fn test_latin1_body_is_transcoded_before_title_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latin1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            b"<html><head><title>caf\xe9</title></head></html>".to_vec(),
            "text/html; charset=iso-8859-1",
        ))
        .mount(&server)
        .await;

    let resolution = test_resolver(test_config())
        .resolve(&format!("{}/latin1", server.uri()))
        .await
        .expect("resolve should succeed");

    assert_eq!(resolution.title, "café");
}

#[tokio::test]
async fn test_non_html_responses_get_no_title() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"title": "not this"}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let resolution = test_resolver(test_config())
        .resolve(&format!("{}/data", server.uri()))
        .await
        .expect("resolve should succeed");

    assert_eq!(resolution.resolved_url, format!("{}/data", server.uri()));
    assert_eq!(resolution.title, "");
}

#[tokio::test]
async fn test_body_read_is_capped() {
    let server = MockServer::start().await;
    let mut body = "x".repeat(100);
    body.push_str("<title>Too Late</title>");
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(&server)
        .await;

    let config = ResolverConfig {
        max_body_size: 64,
        ..test_config()
    };
    let resolution = test_resolver(config)
        .resolve(&format!("{}/big", server.uri()))
        .await
        .expect("resolve should succeed");

    // The title sits beyond the read cap, so none is found.
    assert_eq!(resolution.title, "");
}

#[tokio::test]
async fn test_sailthru_wrapper_is_unwrapped_locally() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t"))
        .respond_with(html_page("Target"))
        .mount(&server)
        .await;

    let target = format!("{}/t?utm_campaign=foo", server.uri());
    let wrapped = format!(
        "{}/click/123.456/{}/abcdef0123456789",
        server.uri(),
        URL_SAFE_NO_PAD.encode(&target)
    );

    let resolution = test_resolver(test_config())
        .resolve(&wrapped)
        .await
        .expect("resolve should succeed");

    assert_eq!(resolution.resolved_url, format!("{}/t", server.uri()));
    assert_eq!(resolution.title, "Target");
    // The wrapper itself is recorded as the first hop.
    assert_eq!(resolution.intermediate_urls.len(), 1);
    assert!(resolution.intermediate_urls[0].contains("/click/123.456/"));
    // Only the unwrapped target was fetched.
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_tweet_short_circuit_uses_oembed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oembed"))
        .and(query_param(
            "url",
            "https://twitter.com/__urlresolver__/status/1595160647238844416",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{
                "url": "https://twitter.com/someone/status/1595160647238844416",
                "html": "<blockquote><p>Hello <a href=\"https://t.co/x\">world</a>!</p>&mdash; someone</blockquote>"
            }"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let config = ResolverConfig {
        oembed_base_url: format!("{}/oembed", server.uri()),
        ..test_config()
    };
    let resolution = test_resolver(config)
        .resolve("https://twitter.com/i/web/status/1595160647238844416?foo=bar")
        .await
        .expect("resolve should succeed");

    assert_eq!(
        resolution.resolved_url,
        "https://twitter.com/someone/status/1595160647238844416"
    );
    assert_eq!(resolution.title, "Hello world!");
}

#[tokio::test]
async fn test_tweet_fetch_failure_returns_partial_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oembed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = ResolverConfig {
        oembed_base_url: format!("{}/oembed", server.uri()),
        ..test_config()
    };
    let err = test_resolver(config)
        .resolve("https://twitter.com/i/web/status/42")
        .await
        .expect_err("oembed outage should surface as an error");

    assert_eq!(err.kind, ErrorKind::TwitterUpstream);
    // The rewritten tweet URL still comes back as a partial result.
    assert_eq!(
        err.resolution.resolved_url,
        "https://twitter.com/__urlresolver__/status/42"
    );
    assert_eq!(err.resolution.title, "");
}

#[tokio::test]
async fn test_connect_failure_returns_partial_result() {
    // Grab a port that nothing is listening on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let err = test_resolver(test_config())
        .resolve(&format!("http://127.0.0.1:{port}/gone?utm_source=x"))
        .await
        .expect_err("connect should fail");

    assert_eq!(err.kind, ErrorKind::Transport);
    // Partial result: canonicalized even though the fetch never happened.
    assert_eq!(
        err.resolution.resolved_url,
        format!("http://127.0.0.1:{port}/gone")
    );
}

#[tokio::test]
async fn test_midchain_failure_keeps_redirect_progress() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let dead_port = listener.local_addr().expect("addr").port();
    drop(listener);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hop"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("http://127.0.0.1:{dead_port}/next").as_str()),
        )
        .mount(&server)
        .await;

    let err = test_resolver(test_config())
        .resolve(&format!("{}/hop", server.uri()))
        .await
        .expect_err("second hop should fail");

    assert_eq!(err.kind, ErrorKind::Transport);
    // The URL that failed to load is the resolved URL, and the hop that
    // got us there is recorded.
    assert_eq!(
        err.resolution.resolved_url,
        format!("http://127.0.0.1:{dead_port}/next")
    );
    assert_eq!(
        err.resolution.intermediate_urls,
        vec![format!("{}/hop", server.uri())]
    );
}

#[tokio::test]
async fn test_overall_deadline_applies_across_hops() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html_page("Slow").set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let config = ResolverConfig {
        timeout: Duration::from_millis(200),
        ..test_config()
    };
    let err = test_resolver(config)
        .resolve(&format!("{}/slow", server.uri()))
        .await
        .expect_err("deadline should expire");

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.resolution.resolved_url, format!("{}/slow", server.uri()));
}

#[tokio::test]
async fn test_concurrent_duplicates_issue_one_upstream_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html_page("Shared").set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let resolver = Arc::new(SingleflightResolver::new(test_resolver(test_config())));
    let url = format!("{}/slow?utm_source=burst", server.uri());

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            let url = url.clone();
            async move { resolver.resolve(&url).await }
        })
        .collect();
    let results = futures::future::join_all(tasks).await;

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1, "duplicates must coalesce into one GET");

    let coalesced = results
        .iter()
        .filter(|r| r.as_ref().unwrap().coalesced)
        .count();
    assert_eq!(coalesced, 5);
    for result in results {
        let resolution = result.unwrap();
        assert_eq!(resolution.resolved_url, format!("{}/slow", server.uri()));
        assert_eq!(resolution.title, "Shared");
    }
}

#[tokio::test]
async fn test_cache_hit_issues_no_upstream_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html_page("Cached"))
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new(16, Duration::from_secs(60)));
    let resolver = CachedResolver::new(
        SingleflightResolver::new(test_resolver(test_config())),
        cache,
    );
    let url = format!("{}/page?utm_source=first", server.uri());

    let first = resolver.resolve(&url).await.expect("first resolve");
    // Same page, different tracking params: still a hit.
    let second = resolver
        .resolve(&format!("{}/page", server.uri()))
        .await
        .expect("second resolve");

    assert_eq!(first, second);
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1, "second resolve must be served from cache");
}

#[tokio::test]
async fn test_requests_carry_browser_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html_page("Hi"))
        .mount(&server)
        .await;

    test_resolver(test_config())
        .resolve(&format!("{}/x", server.uri()))
        .await
        .expect("resolve should succeed");

    let requests = server.received_requests().await.expect("recording enabled");
    let ua = requests[0]
        .headers
        .get("user-agent")
        .expect("user-agent set")
        .to_str()
        .unwrap();
    assert!(ua.starts_with("Mozilla/5.0"), "got {ua}");
    assert!(requests[0].headers.get("referer").is_some());
    assert!(requests[0].headers.get("accept-language").is_some());
}

#[tokio::test]
async fn test_unsafe_targets_are_rejected_without_io() {
    // Default config enforces the public-target policy. The same check
    // runs before every redirect hop, so a public page redirecting into
    // private address space is cut off the same way.
    let resolver = HttpResolver::new(
        test_client(),
        ResolverConfig {
            timeout: Duration::from_secs(5),
            ..ResolverConfig::default()
        },
    );

    let cases = [
        ("http://169.254.169.254/latest/meta-data/", "metadata IP"),
        ("http://127.0.0.1/admin", "loopback"),
        ("http://10.0.0.8/internal", "rfc1918"),
        ("http://example.com:8080/", "unsafe port"),
        ("http://[::1]/", "ipv6 loopback"),
    ];
    for (url, label) in cases {
        let err = resolver
            .resolve(url)
            .await
            .expect_err("unsafe target must be rejected");
        assert_eq!(err.kind, ErrorKind::UnsafeTarget, "{label}");
        assert!(!err.resolution.resolved_url.is_empty(), "{label}");
    }
}
