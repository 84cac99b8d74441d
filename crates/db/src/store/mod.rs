//! The [`StateStore`] seam between the engine and durable state.
//!
//! Every state change that guards against concurrent dispatch is a single
//! conditional write: `set_task_state` and `set_job_state` return `false`
//! instead of an error when the precondition does not hold.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use spool_core::script::TaskScript;
use spool_core::status::{DependType, JobState, LockState, TaskState};
use spool_core::types::{DbId, Timestamp};
use spool_core::worker::WorkerPing;

use crate::error::StoreResult;
use crate::models::depend::{Depend, NewDepend, ResolvedDepends};
use crate::models::dispatch::{CandidateFilter, DispatchCandidate, DispatchPriority};
use crate::models::job::{Job, JobFilter, NewJob, TaskStateCounts};
use crate::models::task::{NewTask, Task};
use crate::models::task_error::{NewTaskError, TaskError, TaskErrorFilter};
use crate::models::worker::Worker;

#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    // ── Jobs ─────────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &NewJob) -> StoreResult<Job>;

    async fn get_job(&self, id: DbId) -> StoreResult<Option<Job>>;

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;

    /// Conditional job transition. No-op (`false`) if the job is already in
    /// `new_state` or, when given, not in `expected_old`.
    async fn set_job_state(
        &self,
        id: DbId,
        new_state: JobState,
        expected_old: Option<JobState>,
    ) -> StoreResult<bool>;

    async fn mark_job_started(&self, id: DbId) -> StoreResult<bool>;

    async fn set_job_paused(
        &self,
        id: DbId,
        paused: bool,
        expires: Option<Timestamp>,
    ) -> StoreResult<bool>;

    async fn resume_expired_pauses(&self, now: Timestamp) -> StoreResult<u64>;

    async fn set_job_credentials(&self, id: DbId, names: &[String]) -> StoreResult<bool>;

    /// Add to the asset counters of a job and optionally one of its tasks.
    async fn increment_asset_counts(
        &self,
        job_id: DbId,
        task_id: Option<DbId>,
        total: i64,
        errors: i64,
    ) -> StoreResult<()>;

    async fn job_task_counts(&self, job_id: DbId) -> StoreResult<TaskStateCounts>;

    async fn expired_jobs(&self, cutoff: Timestamp, limit: i64) -> StoreResult<Vec<Job>>;

    /// Delete a job with its tasks, depends and task errors.
    async fn delete_job(&self, id: DbId) -> StoreResult<bool>;

    // ── Tasks ────────────────────────────────────────────────────────────

    async fn insert_task(&self, task: &NewTask) -> StoreResult<Task>;

    async fn get_task(&self, id: DbId) -> StoreResult<Option<Task>>;

    async fn get_task_script(&self, id: DbId) -> StoreResult<Option<TaskScript>>;

    async fn list_tasks(&self, job_id: DbId, state: Option<TaskState>) -> StoreResult<Vec<Task>>;

    /// Conditional task transition, applying the new state's side effects in
    /// the same write. Only transitions allowed by
    /// [`TaskState::allowed_sources`] can match.
    async fn set_task_state(
        &self,
        id: DbId,
        new_state: TaskState,
        expected_old: Option<TaskState>,
    ) -> StoreResult<bool>;

    async fn set_task_host(&self, id: DbId, endpoint: &str) -> StoreResult<()>;

    async fn set_task_exit_status(&self, id: DbId, exit_status: i32) -> StoreResult<()>;

    async fn set_task_progress(&self, id: DbId, progress: i32) -> StoreResult<()>;

    async fn set_task_status(&self, id: DbId, status: &str) -> StoreResult<()>;

    async fn set_task_credentials(&self, id: DbId, names: &[String]) -> StoreResult<bool>;

    /// Advance the heartbeat of a task `Running` on `endpoint`.
    async fn update_task_ping(&self, id: DbId, endpoint: &str) -> StoreResult<bool>;

    async fn orphan_tasks(&self, cutoff: Timestamp, limit: i64) -> StoreResult<Vec<Task>>;

    /// Tasks in `task_state` whose job is in `job_state`, oldest change
    /// first.
    async fn tasks_of_jobs_in_state(
        &self,
        job_state: JobState,
        task_state: TaskState,
        limit: i64,
    ) -> StoreResult<Vec<Task>>;

    async fn dispatch_candidates(
        &self,
        filter: CandidateFilter,
        limit: i64,
    ) -> StoreResult<Vec<DispatchCandidate>>;

    async fn dispatch_priority(&self) -> StoreResult<Vec<DispatchPriority>>;

    // ── Depends ──────────────────────────────────────────────────────────

    /// Insert an Active depend and increment the blocked entity's count.
    ///
    /// Returns `None` without touching anything when the blocking entity
    /// has already succeeded. The check and the insert are atomic with
    /// respect to the blocker's state changes.
    async fn insert_depend(&self, depend: &NewDepend) -> StoreResult<Option<Depend>>;

    /// Make `job_id` wait on each listed job that has not succeeded, in one
    /// atomic step. Duplicates collapse to one edge.
    async fn insert_job_depends(
        &self,
        job_id: DbId,
        depend_on_job_ids: &[DbId],
    ) -> StoreResult<Vec<Depend>>;

    /// Entities `depend_er_id` is actively waiting on.
    async fn active_depend_on_ids(
        &self,
        depend_type: DependType,
        depend_er_id: DbId,
    ) -> StoreResult<Vec<DbId>>;

    async fn list_depends(&self, job_id: DbId) -> StoreResult<Vec<Depend>>;

    async fn resolve_depends(
        &self,
        depend_type: DependType,
        depend_on_id: DbId,
    ) -> StoreResult<ResolvedDepends>;

    /// Move the job's `Depend` tasks to `Waiting` where neither the task
    /// nor the job has outstanding depends.
    async fn release_job_tasks(&self, job_id: DbId) -> StoreResult<Vec<DbId>>;

    // ── Workers ──────────────────────────────────────────────────────────

    async fn ping_worker(&self, ping: &WorkerPing) -> StoreResult<Worker>;

    async fn get_worker(&self, endpoint: &str) -> StoreResult<Option<Worker>>;

    async fn list_workers(&self) -> StoreResult<Vec<Worker>>;

    async fn set_worker_lock(&self, endpoint: &str, lock: LockState) -> StoreResult<bool>;

    /// Bind a task to the worker if it holds none.
    async fn assign_worker_task(&self, endpoint: &str, task_id: DbId) -> StoreResult<bool>;

    async fn clear_worker_task(&self, task_id: DbId) -> StoreResult<u64>;

    async fn mark_workers_down(&self, cutoff: Timestamp) -> StoreResult<Vec<Worker>>;

    async fn remove_down_workers(&self, cutoff: Timestamp) -> StoreResult<u64>;

    // ── Task errors ──────────────────────────────────────────────────────

    async fn insert_task_errors(&self, errors: &[NewTaskError]) -> StoreResult<u64>;

    async fn list_task_errors(&self, filter: &TaskErrorFilter) -> StoreResult<Vec<TaskError>>;

    async fn clear_task_errors(&self, task_id: DbId) -> StoreResult<u64>;
}
