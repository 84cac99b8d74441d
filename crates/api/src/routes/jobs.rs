//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                        -> list_jobs
/// POST   /                        -> create_job
/// GET    /{id}                    -> get_job
/// DELETE /{id}                    -> delete_job
/// POST   /{id}/_cancel            -> cancel_job
/// POST   /{id}/_restart           -> restart_job
/// POST   /{id}/_retryAllFailures  -> retry_all_failures
/// POST   /{id}/_pause             -> pause_job
/// POST   /{id}/_resume            -> resume_job
/// PUT    /{id}/_credentials       -> set_credentials
/// GET    /{id}/tasks              -> list_tasks
/// GET    /{id}/errors             -> list_errors
/// GET    /{id}/depends            -> list_depends
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/{id}/_cancel", post(jobs::cancel_job))
        .route("/{id}/_restart", post(jobs::restart_job))
        .route("/{id}/_retryAllFailures", post(jobs::retry_all_failures))
        .route("/{id}/_pause", post(jobs::pause_job))
        .route("/{id}/_resume", post(jobs::resume_job))
        .route("/{id}/_credentials", put(jobs::set_credentials))
        .route("/{id}/tasks", get(jobs::list_tasks))
        .route("/{id}/errors", get(jobs::list_errors))
        .route("/{id}/depends", get(jobs::list_depends))
}
