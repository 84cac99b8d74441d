//! Handlers for the worker protocol: heartbeat, poll and event report.
//!
//! Workers are not project-scoped; every task they touch already carries
//! its project.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use spool_core::protocol::TaskEvent;
use spool_core::worker::WorkerPing;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /cluster/_next`.
#[derive(Debug, Deserialize)]
pub struct NextTaskRequest {
    pub endpoint: String,
}

/// POST /api/v1/cluster/_ping
///
/// Record a worker heartbeat and return the worker row.
pub async fn ping(
    State(state): State<AppState>,
    Json(input): Json<WorkerPing>,
) -> AppResult<impl IntoResponse> {
    let worker = state.engine.workers.ping(&input).await?;
    Ok(Json(DataResponse { data: worker }))
}

/// POST /api/v1/cluster/_next
///
/// Hand the calling worker its next task. Returns 204 when there is
/// nothing for it to run.
pub async fn next_task(
    State(state): State<AppState>,
    Json(input): Json<NextTaskRequest>,
) -> AppResult<Response> {
    match state.engine.queue.get_next(&input.endpoint).await? {
        Some(task) => {
            tracing::info!(
                task_id = %task.id,
                job_id = %task.job_id,
                endpoint = %input.endpoint,
                "Task handed to worker",
            );
            Ok(Json(DataResponse { data: task }).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /api/v1/cluster/_event
pub async fn report_event(
    State(state): State<AppState>,
    Json(event): Json<TaskEvent>,
) -> AppResult<StatusCode> {
    tracing::debug!(task_id = %event.task_id, kind = event.event.kind(), "Task event");
    state.engine.dispatcher.handle_event(event).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/cluster/_metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(DataResponse {
        data: state.engine.metrics.snapshot(),
    })
}

/// POST /api/v1/cluster/_sweep
///
/// Run one maintenance sweep now instead of waiting for the next tick.
pub async fn sweep(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = state.engine.sweeper.sweep_once().await?;
    Ok(Json(DataResponse { data: report }))
}
