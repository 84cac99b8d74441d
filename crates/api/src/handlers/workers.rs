use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use spool_core::status::LockState;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub endpoint: String,
    pub state: LockState,
}

/// GET /api/v1/workers
pub async fn list_workers(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let workers = state.engine.workers.list().await?;
    Ok(Json(DataResponse { data: workers }))
}

/// POST /api/v1/workers/_lock
///
/// A locked worker gets no new tasks; what it is running finishes normally.
pub async fn set_lock(
    State(state): State<AppState>,
    Json(input): Json<LockRequest>,
) -> AppResult<impl IntoResponse> {
    let worker = state.engine.workers.set_lock(&input.endpoint, input.state).await?;
    tracing::info!(endpoint = %worker.endpoint, state = ?input.state, "Worker lock changed");
    Ok(Json(DataResponse { data: worker }))
}
