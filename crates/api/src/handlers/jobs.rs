//! Handlers for the `/jobs` resource.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use spool_core::job_spec::JobSpec;
use spool_core::status::{JobState, TaskState};
use spool_core::types::DbId;
use spool_db::models::job::JobFilter;
use spool_db::models::task_error::TaskErrorFilter;

use crate::error::AppResult;
use crate::extract::ProjectId;
use crate::response::DataResponse;
use crate::state::AppState;

/// Upper bound on rows a list endpoint returns.
const MAX_LIST_LIMIT: i64 = 1000;

pub(crate) fn clamp_limit(limit: Option<i64>) -> Option<i64> {
    limit.map(|l| l.clamp(1, MAX_LIST_LIMIT))
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListQuery {
    pub project_id: Option<DbId>,
    pub state: Option<JobState>,
    pub name: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub state: Option<TaskState>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequest {
    /// Resume automatically after this many seconds.
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

/// Request body for the `_credentials` endpoints.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetriedCount {
    pub retried: u64,
}

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Create a job for the project in `X-Project-Id`. Returns 201 with the
/// job and its per-state task counts.
pub async fn create_job(
    ProjectId(project_id): ProjectId,
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.jobs.create_job(project_id, spec).await?;
    let detail = state.engine.jobs.job_detail(job.id).await?;

    tracing::info!(job_id = %job.id, project_id = %project_id, name = %job.name, "Job created");

    Ok((StatusCode::CREATED, Json(DataResponse { data: detail })))
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = JobFilter {
        project_id: params.project_id,
        states: params.state.into_iter().collect(),
        name: params.name,
        limit: clamp_limit(params.limit),
        offset: params.offset.map(|o| o.max(0)),
    };
    let jobs = state.engine.jobs.list_jobs(&filter).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let detail = state.engine.jobs.job_detail(job_id).await?;
    Ok(Json(DataResponse { data: detail }))
}

/// DELETE /api/v1/jobs/{id}
///
/// Delete a job with its tasks, depends and errors. Returns 204.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.engine.jobs.require_job(job_id).await?;
    state.engine.jobs.delete_job(job_id).await?;
    tracing::info!(job_id = %job_id, "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// State changes
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/_cancel
///
/// Running tasks are killed in the background.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.engine.jobs.require_job(job_id).await?;
    let changed = state.engine.jobs.cancel_job(job_id).await?;
    Ok(Json(DataResponse::changed(changed)))
}

/// POST /api/v1/jobs/{id}/_restart
pub async fn restart_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.engine.jobs.require_job(job_id).await?;
    let changed = state.engine.jobs.restart_job(job_id).await?;
    Ok(Json(DataResponse::changed(changed)))
}

/// POST /api/v1/jobs/{id}/_retryAllFailures
pub async fn retry_all_failures(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let retried = state.engine.jobs.retry_all_failures(job_id).await?;
    Ok(Json(DataResponse {
        data: RetriedCount { retried },
    }))
}

/// POST /api/v1/jobs/{id}/_pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(input): Json<PauseRequest>,
) -> AppResult<impl IntoResponse> {
    let duration = input.duration_secs.map(Duration::from_secs);
    let changed = state.engine.jobs.pause_job(job_id, duration).await?;
    Ok(Json(DataResponse::changed(changed)))
}

/// POST /api/v1/jobs/{id}/_resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let changed = state.engine.jobs.resume_job(job_id).await?;
    Ok(Json(DataResponse::changed(changed)))
}

/// PUT /api/v1/jobs/{id}/_credentials
pub async fn set_credentials(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(input): Json<CredentialsRequest>,
) -> AppResult<impl IntoResponse> {
    let changed = state
        .engine
        .jobs
        .set_job_credentials(job_id, &input.names)
        .await?;
    Ok(Json(DataResponse::changed(changed)))
}

// ---------------------------------------------------------------------------
// Children
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Query(params): Query<TaskListQuery>,
) -> AppResult<impl IntoResponse> {
    state.engine.jobs.require_job(job_id).await?;
    let tasks = state.engine.jobs.list_tasks(job_id, params.state).await?;
    Ok(Json(DataResponse { data: tasks }))
}

/// GET /api/v1/jobs/{id}/errors
pub async fn list_errors(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Query(params): Query<ErrorListQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = TaskErrorFilter {
        job_id: Some(job_id),
        task_id: None,
        limit: clamp_limit(params.limit),
    };
    let errors = state.engine.jobs.list_task_errors(&filter).await?;
    Ok(Json(DataResponse { data: errors }))
}

/// GET /api/v1/jobs/{id}/depends
pub async fn list_depends(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.engine.jobs.require_job(job_id).await?;
    let depends = state.engine.depends.list_depends(job_id).await?;
    Ok(Json(DataResponse { data: depends }))
}
