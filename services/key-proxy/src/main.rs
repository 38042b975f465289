//! Key Rotation Proxy
//!
//! Single-binary Rust service that:
//! 1. Accepts client requests authenticated by a shared access token
//! 2. Claims an upstream API key for the requested model from the key pool
//! 3. Forwards the request with that key and records the outcome
//! 4. Serves usage statistics and a streamed key health check

mod backend;
mod config;
mod error;
mod metrics;
mod proxy;
mod service;
mod stats_page;
mod verify;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use key_pool::KeyPool;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::proxy::ProxyState;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics};
use crate::verify::VerifyState;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
    verify: VerifyState,
}

/// Build the axum router with all routes and shared state.
///
/// Anything that is not a local route is forwarded upstream. The concurrency
/// limit queues requests beyond `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/index.html", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .route("/stats.json", get(stats_json_handler))
        .route("/verify", post(verify_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting key-rotation-proxy");

    // Install before the pool emits anything
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        credentials = config.keys.len(),
        access_tokens = config.access_tokens.len(),
        models = config.models.len(),
        "configuration loaded"
    );

    let store = backend::connect(&config.store)
        .await
        .context("failed to connect state store")?;
    let pool = KeyPool::new(
        config.keys.clone(),
        config.policy_table(),
        &config.pool,
        store,
    )
    .context("failed to build key pool")?;

    // Validated by Config::load
    let api_key_header = HeaderName::from_bytes(config.proxy.api_key_header.as_bytes())
        .context("invalid api_key_header")?;
    let timeout = Duration::from_secs(config.proxy.timeout_secs);
    let client = reqwest::Client::new();
    let metrics = ServiceMetrics::new();

    let proxy_state = ProxyState {
        client: client.clone(),
        upstream_url: config.proxy.upstream_url.clone(),
        timeout,
        api_key_header: api_key_header.clone(),
        access_tokens: Arc::new(config.access_tokens.iter().cloned().collect::<HashSet<_>>()),
        pool: pool.clone(),
        requests_total: metrics.requests_total.clone(),
        errors_total: metrics.errors_total.clone(),
    };

    let verify_state = VerifyState {
        client,
        url: config.verify.url.clone(),
        api_key_header,
        timeout,
        delay: Duration::from_millis(config.verify.delay_ms),
        credentials: pool.credentials().into(),
    };

    let app_state = AppState {
        proxy: proxy_state,
        metrics: metrics.clone(),
        prometheus: prometheus_handle,
        verify: verify_state,
    };

    let app = build_router(app_state, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, store = pool.backend(), "accepting requests");

    let in_flight = metrics.in_flight.clone();

    // The drain timeout starts at signal receipt, not at server start: the
    // server is told to drain, then the drain races the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness banner.
async fn root_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Proxy is Running!",
    )
}

/// Health endpoint: JSON with status, store backend, pool size, uptime and
/// request counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "store": state.proxy.pool.backend(),
        "credentials": state.proxy.pool.credentials().len(),
        "uptime_seconds": state.metrics.uptime().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    let report = state.proxy.pool.report(Utc::now()).await;
    match stats_page::render(&report) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render stats page");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render stats page").into_response()
        }
    }
}

async fn stats_json_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.proxy.pool.report(Utc::now()).await)
}

async fn verify_handler(State(state): State<AppState>) -> Response {
    verify::stream(state.verify.clone()).into_response()
}

/// Catch-all handler that forwards everything else upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let _in_flight = state.metrics.track_in_flight();
    let started = Instant::now();
    let method = request.method().to_string();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let response = proxy::proxy_request(&state.proxy, request, request_id).await;

    metrics::record_request(
        response.status().as_u16(),
        &method,
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A handler that cannot be installed never fires; the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
