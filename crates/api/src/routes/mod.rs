pub mod cluster;
pub mod health;
pub mod jobs;
pub mod tasks;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /cluster/_ping                      worker heartbeat (POST)
/// /cluster/_next                      worker poll (POST)
/// /cluster/_event                     worker event report (POST)
/// /cluster/_metrics                   dispatch metrics (GET)
/// /cluster/_sweep                     run one maintenance sweep (POST)
///
/// /jobs                               list, create
/// /jobs/{id}                          get, delete
/// /jobs/{id}/_cancel                  cancel (POST)
/// /jobs/{id}/_restart                 restart (POST)
/// /jobs/{id}/_retryAllFailures        retry failed tasks (POST)
/// /jobs/{id}/_pause                   pause (POST)
/// /jobs/{id}/_resume                  resume (POST)
/// /jobs/{id}/_credentials             set credentials (PUT)
/// /jobs/{id}/tasks                    list tasks
/// /jobs/{id}/errors                   list task errors
/// /jobs/{id}/depends                  list depends
///
/// /tasks/{id}                         get
/// /tasks/{id}/script                  get script
/// /tasks/{id}/_retry                  retry (POST)
/// /tasks/{id}/_skip                   skip (POST)
/// /tasks/{id}/_credentials            set credentials (PUT)
/// /tasks/{id}/errors                  list errors
///
/// /workers                            list
/// /workers/_lock                      lock or unlock (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/cluster", cluster::router())
        .nest("/jobs", jobs::router())
        .nest("/tasks", tasks::router())
        .nest("/workers", workers::router())
}
