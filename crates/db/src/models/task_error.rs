//! TaskError entity models and DTOs.

use serde::Serialize;
use sqlx::FromRow;
use spool_core::types::{DbId, Timestamp};

/// A row from the `task_errors` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskError {
    pub id: DbId,
    pub task_id: DbId,
    pub job_id: DbId,
    pub asset_id: Option<String>,
    pub path: Option<String>,
    pub message: String,
    pub processor: Option<String>,
    pub fatal: bool,
    pub phase: String,
    pub time_created: Timestamp,
}

/// DTO for appending a task error.
#[derive(Debug, Clone)]
pub struct NewTaskError {
    pub task_id: DbId,
    pub job_id: DbId,
    pub asset_id: Option<String>,
    pub path: Option<String>,
    pub message: String,
    pub processor: Option<String>,
    pub fatal: bool,
    pub phase: String,
}

/// Filter for listing task errors.
#[derive(Debug, Clone, Default)]
pub struct TaskErrorFilter {
    pub job_id: Option<DbId>,
    pub task_id: Option<DbId>,
    pub limit: Option<i64>,
}
