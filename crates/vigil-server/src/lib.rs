//! # vigil-server
//!
//! HTTP API for the Vigil service. Provides:
//!
//! - Website and desktop-app evaluation for enforcement points
//! - Appeal submission and escalation for the child
//! - Pending appeals, verdicts, list edits and settings for the oversight console
//! - Health and Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ratelimit;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vigil_config::ServerConfig;
use vigil_core::VigilError;
use vigil_engine::Engine;
use vigil_store::ScreenshotStore;

pub use error::ApiError;

/// Shared server state.
pub struct AppState {
    pub config: ServerConfig,
    pub engine: Engine,
    pub screenshots: Option<ScreenshotStore>,
    /// Rows returned by `/audit` when no limit is given.
    pub audit_page_size: usize,
    pub metrics: metrics::Metrics,
    pub limiter: ratelimit::RateLimiter,
}

impl AppState {
    pub fn new(config: ServerConfig, engine: Engine, screenshots: Option<ScreenshotStore>) -> Self {
        let limiter = ratelimit::RateLimiter::new(ratelimit::RateLimitConfig::from(&config));
        Self {
            config,
            engine,
            screenshots,
            audit_page_size: 100,
            metrics: metrics::Metrics::new(),
            limiter,
        }
    }

    pub fn with_audit_page_size(mut self, size: usize) -> Self {
        self.audit_page_size = size;
        self
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

/// Build the Axum router.
pub fn build_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let api_routes = handlers::api_routes();

    let api_routes = if state.config.api_key.is_some() {
        api_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
    } else {
        api_routes
    };

    // Rate limiting wraps auth so rejected keys still spend tokens.
    let api_routes = api_routes.layer(middleware::from_fn_with_state(
        state.clone(),
        ratelimit::rate_limit_middleware,
    ));
    let link_routes = handlers::link_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        ratelimit::rate_limit_middleware,
    ));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_routes)
        .merge(link_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    if state.config.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Checks the `Authorization: Bearer` header against the configured API key.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(ref expected_key) = state.config.api_key {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        if provided != Some(expected_key.as_str()) {
            warn!("unauthorized API request, invalid or missing API key");
            return ApiError::unauthorized().into_response();
        }
    }
    next.run(request).await
}

async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    state.metrics.inc_http_requests();
    let resp = next.run(request).await;
    if resp.status().is_client_error() || resp.status().is_server_error() {
        state.metrics.inc_http_errors();
    }
    resp
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.metrics.uptime_secs(),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (
    StatusCode,
    [(axum::http::header::HeaderName, &'static str); 1],
    String,
) {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render_prometheus(),
    )
}

/// Bind and serve until the process is stopped.
pub async fn start_server(state: AppState) -> vigil_core::Result<()> {
    let listen = state.config.listen.clone();
    let limiter = state.limiter.clone();

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            limiter.cleanup();
        }
    });

    let router = build_router(state);
    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| VigilError::Transport(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| VigilError::Transport(format!("server error: {e}")))?;

    Ok(())
}
