use axum::routing::{get, post};
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`.
///
/// ```text
/// GET    /        -> list_workers
/// POST   /_lock   -> set_lock
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workers::list_workers))
        .route("/_lock", post(workers::set_lock))
}
