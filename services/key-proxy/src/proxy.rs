//! Forwarding with a rotated upstream key
//!
//! Checks the client's access token, claims a credential for the model named
//! in the path, and forwards method, path, query, body and content type with
//! the claimed key in the API key header. The upstream status decides the
//! recorded outcome before the body is streamed back; the claim guard records
//! it on every path, including when the client disconnects mid-flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use common::Secret;
use key_pool::{ClaimGuard, Error as PoolError, KeyPool, Outcome};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics;

/// Headers to strip from the upstream response (hop-by-hop per RFC 2616
/// Section 13.5.1), plus `content-encoding`.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-encoding",
];

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub timeout: Duration,
    /// Carries the access token inbound and the upstream key outbound.
    pub api_key_header: HeaderName,
    pub access_tokens: Arc<HashSet<Secret<String>>>,
    pub pool: KeyPool,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Model named in a `.../models/{model}:{method}` path, else `unknown`.
pub fn model_from_path(path: &str) -> &str {
    path.split_once("models/")
        .map(|(_, rest)| rest.split([':', '/']).next().unwrap_or_default())
        .filter(|m| !m.is_empty())
        .unwrap_or("unknown")
}

/// Proxy an inbound request upstream using a credential from the pool.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let model_name = model_from_path(request.uri().path()).to_string();
    let model = model_name.as_str();

    let Some(token) = request.headers().get(&state.api_key_header) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            &format!("missing {} header", state.api_key_header),
            &request_id,
        );
    };
    let token = Secret::new(token.to_str().unwrap_or_default().to_string());
    if !state.access_tokens.contains(&token) {
        warn!(model, "rejected request with unknown access token");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "Unauthorized",
            &request_id,
        );
    }

    let method = request.method().clone();
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };
    let content_type = request.headers().get(header::CONTENT_TYPE).cloned();

    // Read the body before claiming so a bad body does not spend a credential.
    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                &format!("invalid request body: {e}"),
                &request_id,
            );
        }
    };

    let guard = match state.pool.checkout(model, Utc::now()).await {
        Ok(guard) => guard,
        Err(PoolError::NoEligibleCredential { .. }) => {
            return rate_limited(&state.pool, model, &request_id);
        }
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(model, error = %e, "credential checkout failed");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "proxy_error",
                &e.to_string(),
                &request_id,
            );
        }
    };

    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(ct) = content_type {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    match HeaderValue::from_str(guard.credential().expose()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(state.api_key_header.clone(), value);
        }
        Err(_) => {
            error!(model, credential = %guard.credential(), "credential is not a valid header value");
            guard.complete(Outcome::OtherFailure).await;
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                "configured credential is not a valid header value",
                &request_id,
            );
        }
    }
    debug!(model, credential = %guard.credential(), "forwarding with claimed credential");

    // Only the wait for response headers is bounded; a streamed body may
    // outlast the timeout.
    let send = state
        .client
        .request(method, &upstream_url)
        .headers(headers)
        .body(body_bytes)
        .send();

    match tokio::time::timeout(state.timeout, send).await {
        Ok(Ok(upstream_response)) => relay(state, guard, upstream_response, model, &request_id).await,
        Ok(Err(e)) if !e.is_timeout() => {
            guard.complete(Outcome::OtherFailure).await;
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_upstream_error("connection");
            error!(model, error = %e, "upstream request failed");
            error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &format!("upstream error: {e}"),
                &request_id,
            )
        }
        Ok(Err(_)) | Err(_) => {
            guard.complete(Outcome::OtherFailure).await;
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_upstream_error("timeout");
            error!(model, timeout_secs = state.timeout.as_secs(), "upstream timeout");
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "proxy_error",
                &format!("upstream timeout after {}s", state.timeout.as_secs()),
                &request_id,
            )
        }
    }
}

/// 429 with a retry hint equal to the model's cooldown.
fn rate_limited(pool: &KeyPool, model: &str, request_id: &str) -> Response {
    let retry_after = pool.policy(model).cooldown_secs;
    info!(model, retry_after, "all credentials unavailable");
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limit_error",
        &format!("All keys for {model} are rate-limited. Try again later."),
        request_id,
    );
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Record the outcome from the upstream status, then stream the body through.
async fn relay(
    state: &ProxyState,
    guard: ClaimGuard,
    upstream_response: reqwest::Response,
    model: &str,
    request_id: &str,
) -> Response {
    let status = upstream_response.status();

    let outcome = Outcome::from_status(status.as_u16());
    if outcome == Outcome::Throttled {
        warn!(model, credential = %guard.credential(), "upstream throttled credential");
    }
    guard.complete(outcome).await;

    let mut response = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if !is_stripped(name.as_str()) {
            response = response.header(name, value);
        }
    }

    // Status and headers are already sent when a chunk fails, so the error
    // can only be counted and the connection cut.
    let errors_total = state.errors_total.clone();
    let model_name = model.to_string();
    let body = upstream_response.bytes_stream().map(move |chunk| {
        if let Err(e) = &chunk {
            errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_upstream_error("body");
            error!(model = %model_name, error = %e, "upstream response body failed mid-stream");
        }
        chunk
    });

    response
        .header(header::REFERRER_POLICY, "no-referrer")
        .body(axum::body::Body::from_stream(body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Check if a response header is dropped before relaying
pub fn is_stripped(name: &str) -> bool {
    STRIPPED_RESPONSE_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
