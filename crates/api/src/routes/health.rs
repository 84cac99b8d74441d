use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use spool_db::StateStore;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// `postgres` or `memory`.
    pub store: &'static str,
    pub store_healthy: bool,
}

/// GET /health -- returns service and state store health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_healthy = state.engine.store.list_workers().await.is_ok();
    let status = if store_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store: state.store_kind,
        store_healthy,
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
