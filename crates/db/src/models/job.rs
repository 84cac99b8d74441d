//! Job entity models and DTOs.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::FromRow;
use spool_core::status::{JobState, TaskState};
use spool_core::types::{DbId, Timestamp};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub project_id: DbId,
    pub name: String,
    #[sqlx(try_from = "i16")]
    pub state: JobState,
    pub priority: i32,
    pub max_running_tasks: i32,
    pub paused: bool,
    pub time_pause_expired: Option<Timestamp>,
    /// Active incoming JobOnJob depends.
    pub depend_count: i32,
    #[sqlx(json)]
    pub args: Map<String, Value>,
    #[sqlx(json)]
    pub env: BTreeMap<String, String>,
    pub credentials: Vec<String>,
    pub asset_total_count: i64,
    pub asset_error_count: i64,
    pub time_created: Timestamp,
    pub time_started: Option<Timestamp>,
    pub time_stopped: Option<Timestamp>,
    pub time_modified: Timestamp,
}

/// DTO for inserting a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub project_id: DbId,
    pub name: String,
    pub priority: i32,
    pub max_running_tasks: i32,
    pub paused: bool,
    pub time_pause_expired: Option<Timestamp>,
    pub args: Map<String, Value>,
    pub env: BTreeMap<String, String>,
    pub credentials: Vec<String>,
}

/// Filter for listing jobs. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub project_id: Option<DbId>,
    pub states: Vec<JobState>,
    pub name: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Per-state task counts for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStateCounts {
    pub depend: i64,
    pub waiting: i64,
    pub queued: i64,
    pub running: i64,
    pub success: i64,
    pub failure: i64,
    pub skipped: i64,
}

impl TaskStateCounts {
    pub fn add(&mut self, state: TaskState, n: i64) {
        match state {
            TaskState::Depend => self.depend += n,
            TaskState::Waiting => self.waiting += n,
            TaskState::Queued => self.queued += n,
            TaskState::Running => self.running += n,
            TaskState::Success => self.success += n,
            TaskState::Failure => self.failure += n,
            TaskState::Skipped => self.skipped += n,
        }
    }

    /// Tasks not yet in a terminal state.
    pub fn pending(&self) -> i64 {
        self.depend + self.waiting + self.queued + self.running
    }

    pub fn total(&self) -> i64 {
        self.pending() + self.success + self.failure + self.skipped
    }
}

/// A job together with its task counts, as returned by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub task_counts: TaskStateCounts,
}
