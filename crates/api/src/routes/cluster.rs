//! Route definitions for the worker-facing `/cluster` protocol.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::cluster;
use crate::state::AppState;

/// Routes mounted at `/cluster`.
///
/// ```text
/// POST   /_ping       -> ping
/// POST   /_next       -> next_task
/// POST   /_event      -> report_event
/// GET    /_metrics    -> metrics
/// POST   /_sweep      -> sweep
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/_ping", post(cluster::ping))
        .route("/_next", post(cluster::next_task))
        .route("/_event", post(cluster::report_event))
        .route("/_metrics", get(cluster::metrics))
        .route("/_sweep", post(cluster::sweep))
}
