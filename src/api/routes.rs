//! Handlers for the watchdog API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::watchdog::{StatusReport, Watchdog};

/// GET /api/status: everything the dashboard renders.
pub async fn get_status(State(watchdog): State<Arc<Watchdog>>) -> Json<StatusReport> {
    Json(watchdog.status_report())
}

/// POST /api/test-all: run one batch now. Succeeds even when every
/// provider reports a failure; the batch itself completed.
pub async fn test_all(State(watchdog): State<Arc<Watchdog>>) -> Json<Value> {
    let outcome = watchdog.run_batch().await;
    Json(json!({
        "success": true,
        "coalesced": outcome.was_coalesced(),
        "results": outcome.results(),
    }))
}

/// POST /api/test/{id}: probe one provider.
pub async fn test_one(State(watchdog): State<Arc<Watchdog>>, Path(id): Path<String>) -> Response {
    match watchdog.test_one(&id).await {
        Some(status) => Json(status).into_response(),
        None => not_found().await.into_response(),
    }
}

/// POST /api/reset-quotas: zero all counters.
pub async fn reset_quotas(State(watchdog): State<Arc<Watchdog>>) -> Json<Value> {
    let done = tokio::task::spawn_blocking(move || watchdog.reset_quotas()).await;
    Json(json!({ "success": done.is_ok() }))
}

/// GET /api/best-provider: the single best pick, or `null`.
pub async fn best_provider(State(watchdog): State<Arc<Watchdog>>) -> Json<Value> {
    Json(json!({ "best": watchdog.best_provider() }))
}

/// GET /api/health
pub async fn get_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
