use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::cache::{CacheManager, CacheManagerStats, CdnProfile};
use crate::config::AppConfig;
use crate::metrics::render_metrics;
use crate::middleware::{CdnProfileState, cdn_profile};

/// Shared state for the operational endpoints.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheManager>,
}

impl AppState {
    #[must_use]
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache: CacheHealth,
}

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub memory: &'static str,
    pub redis: &'static str,
}

/// Build the operational router.
///
/// Every route is served with the `private` CDN profile; cache internals
/// must never land in a shared cache.
pub fn build_router(state: AppState) -> Router {
    let cdn = CdnProfileState::new(CdnProfile::Private, state.cache.settings().cdn.clone());

    Router::new()
        .route("/health", get(health))
        .route("/cache/stats", get(cache_stats))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(middleware::from_fn_with_state(cdn, cdn_profile))
        .layer(TraceLayer::new_for_http())
}

/// Liveness plus tier status. Always 200: a missing Redis only degrades.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.cache.stats().await;
    let redis = match (stats.redis.enabled, stats.redis.connected) {
        (false, _) => "disabled",
        (true, true) => "connected",
        (true, false) => "disconnected",
    };
    let status = if redis == "disconnected" { "degraded" } else { "ok" };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            cache: CacheHealth {
                memory: "up",
                redis,
            },
        }),
    )
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheManagerStats> {
    Json(state.cache.stats().await)
}

async fn metrics() -> Response {
    match render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

/// Serve the router until a shutdown signal arrives.
pub async fn serve(cfg: &AppConfig, cache: Arc<CacheManager>) -> anyhow::Result<()> {
    let addr = cfg.addr();
    let app = build_router(AppState::new(cache));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
