//! Axum server exposing the watchdog over HTTP.

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::routes;
use crate::core::watchdog::Watchdog;

/// Build the router. The dashboard is served from elsewhere, so any origin
/// may call the API.
pub fn build_router(watchdog: Arc<Watchdog>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/test-all", post(routes::test_all))
        .route("/api/test/{id}", post(routes::test_one))
        .route("/api/reset-quotas", post(routes::reset_quotas))
        .route("/api/best-provider", get(routes::best_provider))
        .route("/api/health", get(routes::get_health))
        .fallback(routes::not_found)
        .layer(cors)
        .with_state(watchdog)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(bind: &str, watchdog: Arc<Watchdog>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(watchdog);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Watchdog API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server failed")?;
    Ok(())
}
