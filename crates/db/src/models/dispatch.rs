//! Dispatch query results.

use serde::Serialize;
use sqlx::FromRow;
use spool_core::types::{DbId, Timestamp};

/// A Waiting task eligible for dispatch.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DispatchCandidate {
    pub task_id: DbId,
    pub job_id: DbId,
    pub project_id: DbId,
    pub priority: i32,
    pub time_created: Timestamp,
}

/// Which candidates to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateFilter {
    /// Across all projects, jobs at or above this priority.
    MinPriority(i32),
    /// Any priority, one project.
    Project(DbId),
}

/// A project's place in the dispatch fairness ranking. Not persisted.
#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct DispatchPriority {
    pub project_id: DbId,
    /// Queued plus Running tasks across the project's in-progress jobs.
    pub running_count: i64,
}
