//! Depend entity models and DTOs.

use serde::Serialize;
use sqlx::FromRow;
use spool_core::status::{DependState, DependType};
use spool_core::types::{DbId, Timestamp};

/// A row from the `depends` table.
///
/// JobOnJob edges leave the task columns empty. TaskOnTask edges carry the
/// tasks and their parent jobs.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Depend {
    pub id: DbId,
    #[sqlx(try_from = "i16")]
    pub depend_type: DependType,
    #[sqlx(try_from = "i16")]
    pub state: DependState,
    pub depend_er_job_id: DbId,
    pub depend_on_job_id: DbId,
    pub depend_er_task_id: Option<DbId>,
    pub depend_on_task_id: Option<DbId>,
    pub time_created: Timestamp,
    pub time_modified: Timestamp,
}

impl Depend {
    /// The blocked entity.
    pub fn depend_er_id(&self) -> DbId {
        match self.depend_type {
            DependType::JobOnJob => self.depend_er_job_id,
            DependType::TaskOnTask => self.depend_er_task_id.unwrap_or(self.depend_er_job_id),
        }
    }

    /// The blocking entity.
    pub fn depend_on_id(&self) -> DbId {
        match self.depend_type {
            DependType::JobOnJob => self.depend_on_job_id,
            DependType::TaskOnTask => self.depend_on_task_id.unwrap_or(self.depend_on_job_id),
        }
    }
}

/// DTO for inserting a depend edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDepend {
    pub depend_type: DependType,
    pub depend_er_job_id: DbId,
    pub depend_on_job_id: DbId,
    pub depend_er_task_id: Option<DbId>,
    pub depend_on_task_id: Option<DbId>,
}

impl NewDepend {
    pub fn job_on_job(depend_er_job_id: DbId, depend_on_job_id: DbId) -> Self {
        Self {
            depend_type: DependType::JobOnJob,
            depend_er_job_id,
            depend_on_job_id,
            depend_er_task_id: None,
            depend_on_task_id: None,
        }
    }

    /// `(task id, job id)` of the blocked task, then of the blocking task.
    pub fn task_on_task(depend_er: (DbId, DbId), depend_on: (DbId, DbId)) -> Self {
        Self {
            depend_type: DependType::TaskOnTask,
            depend_er_job_id: depend_er.1,
            depend_on_job_id: depend_on.1,
            depend_er_task_id: Some(depend_er.0),
            depend_on_task_id: Some(depend_on.0),
        }
    }

    pub fn depend_er_id(&self) -> DbId {
        match self.depend_type {
            DependType::JobOnJob => self.depend_er_job_id,
            DependType::TaskOnTask => self.depend_er_task_id.unwrap_or(self.depend_er_job_id),
        }
    }

    pub fn depend_on_id(&self) -> DbId {
        match self.depend_type {
            DependType::JobOnJob => self.depend_on_job_id,
            DependType::TaskOnTask => self.depend_on_task_id.unwrap_or(self.depend_on_job_id),
        }
    }
}

/// Outcome of resolving every Active depend on one blocking entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedDepends {
    /// Depends flipped to Inactive.
    pub resolved: u64,
    /// Tasks moved from `Depend` to `Waiting` because nothing blocks them now.
    pub released_tasks: Vec<DbId>,
}
