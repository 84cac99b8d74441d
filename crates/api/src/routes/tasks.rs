//! Route definitions for the `/tasks` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// GET    /{id}                -> get_task
/// GET    /{id}/script         -> get_script
/// POST   /{id}/_retry         -> retry_task
/// POST   /{id}/_skip          -> skip_task
/// PUT    /{id}/_credentials   -> set_credentials
/// GET    /{id}/errors         -> list_errors
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(tasks::get_task))
        .route("/{id}/script", get(tasks::get_script))
        .route("/{id}/_retry", post(tasks::retry_task))
        .route("/{id}/_skip", post(tasks::skip_task))
        .route("/{id}/_credentials", put(tasks::set_credentials))
        .route("/{id}/errors", get(tasks::list_errors))
}
