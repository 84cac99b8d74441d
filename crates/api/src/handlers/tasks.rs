//! Handlers for the `/tasks` resource.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use spool_core::error::CoreError;
use spool_core::types::DbId;
use spool_db::models::task_error::TaskErrorFilter;
use spool_db::StateStore;
use spool_engine::EngineError;

use crate::error::AppResult;
use crate::handlers::jobs::{clamp_limit, CredentialsRequest, ErrorListQuery};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let task = state.engine.jobs.require_task(task_id).await?;
    Ok(Json(DataResponse { data: task }))
}

/// GET /api/v1/tasks/{id}/script
pub async fn get_script(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let script = state
        .engine
        .store
        .get_task_script(task_id)
        .await
        .map_err(EngineError::from)?
        .ok_or(CoreError::NotFound {
            entity: "task",
            id: task_id,
        })?;
    Ok(Json(DataResponse { data: script }))
}

/// POST /api/v1/tasks/{id}/_retry
///
/// A dispatched task is killed on its worker and comes back as `Waiting`.
pub async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let changed = state.engine.dispatcher.retry_task(task_id).await?;
    tracing::info!(task_id = %task_id, changed, "Task retry requested");
    Ok(Json(DataResponse::changed(changed)))
}

/// POST /api/v1/tasks/{id}/_skip
pub async fn skip_task(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let changed = state.engine.dispatcher.skip_task(task_id).await?;
    tracing::info!(task_id = %task_id, changed, "Task skip requested");
    Ok(Json(DataResponse::changed(changed)))
}

/// PUT /api/v1/tasks/{id}/_credentials
pub async fn set_credentials(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
    Json(input): Json<CredentialsRequest>,
) -> AppResult<impl IntoResponse> {
    let changed = state
        .engine
        .jobs
        .set_task_credentials(task_id, &input.names)
        .await?;
    Ok(Json(DataResponse::changed(changed)))
}

/// GET /api/v1/tasks/{id}/errors
pub async fn list_errors(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
    Query(params): Query<ErrorListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = TaskErrorFilter {
        job_id: None,
        task_id: Some(task_id),
        limit: clamp_limit(params.limit),
    };
    let errors = state.engine.jobs.list_task_errors(&filter).await?;
    Ok(Json(DataResponse { data: errors }))
}
