//! HTTP lookup façade.
//!
//! A single endpoint, `GET /lookup?url=<absolute-url>`, returning JSON:
//!
//! ```json
//! { "given_url": "...", "resolved_url": "...", "title": "..." }
//! ```
//!
//! A resolve can fail while still producing a useful canonicalized URL
//! (say, a short URL that expanded fine but whose title fetch timed out).
//! Those partial results are served with `203 Non-Authoritative
//! Information` and an additional `error` field; only inputs that cannot
//! be resolved at all are rejected outright with `400`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{error, info};
use serde::Serialize;
use url::Url;

use crate::resolver::{ErrorKind, Resolver};

// Successful lookups are immutable for practical purposes and may be
// cached aggressively; errors and partial results only briefly.
const CACHE_CONTROL_OK: &str = "public,max-age=31536000";
const CACHE_CONTROL_ERR: &str = "public,max-age=300";

/// Public error strings; internal detail stays in the logs.
pub const ERR_REQUEST_TIMEOUT: &str = "request timeout";
pub const ERR_UNSAFE_URL: &str = "unsafe URL";
pub const ERR_RESOLVE: &str = "resolve error";

/// Non-standard status reported when the client went away mid-resolve.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Shared state for the lookup router.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<dyn Resolver>,
}

#[derive(Debug, Serialize)]
struct LookupResponse {
    given_url: String,
    resolved_url: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Builds the lookup router. Unmatched methods on `/lookup` get axum's
/// default `405 Method Not Allowed`; `HEAD` is served from the `GET`
/// handler for liveness probes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/lookup", get(lookup))
        .with_state(state)
}

async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let start = Instant::now();

    let Some(given_url) = params.get("url").cloned() else {
        return send_error(StatusCode::BAD_REQUEST, "Missing arg url");
    };
    if !is_valid_input(&given_url) {
        return send_error(StatusCode::BAD_REQUEST, "Invalid url");
    }

    // An error can come back alongside a useful result, so the error is
    // always logged but only shapes the response when it exists.
    match state.resolver.resolve(&given_url).await {
        Ok(resolution) => {
            info!(
                "resolved {given_url} -> {} in {:.3}s",
                resolution.resolved_url,
                start.elapsed().as_secs_f64()
            );
            send_json(
                StatusCode::OK,
                &LookupResponse {
                    given_url,
                    resolved_url: resolution.resolved_url,
                    title: resolution.title,
                    error: None,
                },
            )
        }
        Err(err) => {
            if err.kind == ErrorKind::Canceled {
                // The caller is gone; the status code exists only for our
                // own instrumentation.
                error!("client closed connection while resolving {given_url}");
                return StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    .into_response();
            }

            error!(
                "error resolving {given_url}: {err} (after {:.3}s)",
                start.elapsed().as_secs_f64()
            );
            // A slight abuse of 203 Non-Authoritative Information to signal
            // a partial result.
            send_json(
                StatusCode::NON_AUTHORITATIVE_INFORMATION,
                &LookupResponse {
                    given_url,
                    resolved_url: err.resolution.resolved_url.clone(),
                    title: err.resolution.title.clone(),
                    error: Some(public_error(err.kind).to_string()),
                },
            )
        }
    }
}

fn is_valid_input(given_url: &str) -> bool {
    // Separate conditionals instead of a one-liner so code coverage shows
    // which rejection cases are exercised.
    let Ok(parsed) = Url::parse(given_url) else {
        return false;
    };
    match parsed.host_str() {
        Some(host) => !host.is_empty(),
        None => false,
    }
}

/// Maps internal error kinds onto the public error vocabulary.
fn public_error(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timeout | ErrorKind::Canceled => ERR_REQUEST_TIMEOUT,
        ErrorKind::UnsafeTarget => ERR_UNSAFE_URL,
        ErrorKind::Transport
        | ErrorKind::Decode
        | ErrorKind::TwitterUpstream
        | ErrorKind::TwitterDecode => ERR_RESOLVE,
    }
}

fn send_json<T: Serialize>(code: StatusCode, body: &T) -> Response {
    let cache_control = if code == StatusCode::OK {
        CACHE_CONTROL_OK
    } else {
        CACHE_CONTROL_ERR
    };
    let payload = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    (
        code,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, cache_control),
        ],
        payload,
    )
        .into_response()
}

fn send_error(code: StatusCode, message: &str) -> Response {
    send_json(
        code,
        &ErrorResponse {
            error: message.to_string(),
        },
    )
}
