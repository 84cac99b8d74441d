//! Task entity models and DTOs.

use serde::Serialize;
use sqlx::FromRow;
use spool_core::script::TaskScript;
use spool_core::status::TaskState;
use spool_core::types::{DbId, Timestamp};

/// A row from the `tasks` table. The script is loaded separately.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub job_id: DbId,
    pub project_id: DbId,
    pub parent_id: Option<DbId>,
    pub name: String,
    #[sqlx(try_from = "i16")]
    pub state: TaskState,
    pub host_endpoint: Option<String>,
    pub exit_status: Option<i32>,
    pub run_count: i32,
    pub progress: i32,
    pub status: Option<String>,
    /// Active incoming TaskOnTask depends.
    pub depend_count: i32,
    pub credentials: Vec<String>,
    pub asset_total_count: i64,
    pub asset_error_count: i64,
    pub time_created: Timestamp,
    pub time_started: Option<Timestamp>,
    pub time_stopped: Option<Timestamp>,
    pub time_ping: Option<Timestamp>,
    pub time_modified: Timestamp,
}

/// DTO for inserting a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub job_id: DbId,
    pub project_id: DbId,
    pub parent_id: Option<DbId>,
    pub name: String,
    /// `Waiting`, or `Depend` when the task is blocked at creation.
    pub state: TaskState,
    pub script: TaskScript,
}
