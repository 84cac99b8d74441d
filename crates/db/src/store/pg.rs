use async_trait::async_trait;
use sqlx::PgPool;
use spool_core::script::TaskScript;
use spool_core::status::{DependType, JobState, LockState, TaskState};
use spool_core::types::{DbId, Timestamp};
use spool_core::worker::WorkerPing;

use super::StateStore;
use crate::error::StoreResult;
use crate::models::depend::{Depend, NewDepend, ResolvedDepends};
use crate::models::dispatch::{CandidateFilter, DispatchCandidate, DispatchPriority};
use crate::models::job::{Job, JobFilter, NewJob, TaskStateCounts};
use crate::models::task::{NewTask, Task};
use crate::models::task_error::{NewTaskError, TaskError, TaskErrorFilter};
use crate::models::worker::Worker;
use crate::repositories::{DependRepo, JobRepo, TaskErrorRepo, TaskRepo, WorkerRepo};

/// Postgres-backed store. Each call maps onto one repository query.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for PgStore {
    async fn insert_job(&self, job: &NewJob) -> StoreResult<Job> {
        Ok(JobRepo::insert(&self.pool, job).await?)
    }

    async fn get_job(&self, id: DbId) -> StoreResult<Option<Job>> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        Ok(JobRepo::list(&self.pool, filter).await?)
    }

    async fn set_job_state(
        &self,
        id: DbId,
        new_state: JobState,
        expected_old: Option<JobState>,
    ) -> StoreResult<bool> {
        Ok(JobRepo::set_state(&self.pool, id, new_state, expected_old).await?)
    }

    async fn mark_job_started(&self, id: DbId) -> StoreResult<bool> {
        Ok(JobRepo::mark_started(&self.pool, id).await?)
    }

    async fn set_job_paused(
        &self,
        id: DbId,
        paused: bool,
        expires: Option<Timestamp>,
    ) -> StoreResult<bool> {
        Ok(JobRepo::set_paused(&self.pool, id, paused, expires).await?)
    }

    async fn resume_expired_pauses(&self, now: Timestamp) -> StoreResult<u64> {
        Ok(JobRepo::resume_expired_pauses(&self.pool, now).await?)
    }

    async fn set_job_credentials(&self, id: DbId, names: &[String]) -> StoreResult<bool> {
        Ok(JobRepo::set_credentials(&self.pool, id, names).await?)
    }

    async fn increment_asset_counts(
        &self,
        job_id: DbId,
        task_id: Option<DbId>,
        total: i64,
        errors: i64,
    ) -> StoreResult<()> {
        JobRepo::increment_asset_counts(&self.pool, job_id, total, errors).await?;
        if let Some(task_id) = task_id {
            TaskRepo::increment_asset_counts(&self.pool, task_id, total, errors).await?;
        }
        Ok(())
    }

    async fn job_task_counts(&self, job_id: DbId) -> StoreResult<TaskStateCounts> {
        Ok(JobRepo::task_counts(&self.pool, job_id).await?)
    }

    async fn expired_jobs(&self, cutoff: Timestamp, limit: i64) -> StoreResult<Vec<Job>> {
        Ok(JobRepo::list_expired(&self.pool, cutoff, limit).await?)
    }

    async fn delete_job(&self, id: DbId) -> StoreResult<bool> {
        Ok(JobRepo::delete(&self.pool, id).await?)
    }

    async fn insert_task(&self, task: &NewTask) -> StoreResult<Task> {
        Ok(TaskRepo::insert(&self.pool, task).await?)
    }

    async fn get_task(&self, id: DbId) -> StoreResult<Option<Task>> {
        Ok(TaskRepo::find_by_id(&self.pool, id).await?)
    }

    async fn get_task_script(&self, id: DbId) -> StoreResult<Option<TaskScript>> {
        Ok(TaskRepo::find_script(&self.pool, id).await?)
    }

    async fn list_tasks(&self, job_id: DbId, state: Option<TaskState>) -> StoreResult<Vec<Task>> {
        Ok(TaskRepo::list_by_job(&self.pool, job_id, state).await?)
    }

    async fn set_task_state(
        &self,
        id: DbId,
        new_state: TaskState,
        expected_old: Option<TaskState>,
    ) -> StoreResult<bool> {
        Ok(TaskRepo::set_state(&self.pool, id, new_state, expected_old).await?)
    }

    async fn set_task_host(&self, id: DbId, endpoint: &str) -> StoreResult<()> {
        Ok(TaskRepo::set_host(&self.pool, id, endpoint).await?)
    }

    async fn set_task_exit_status(&self, id: DbId, exit_status: i32) -> StoreResult<()> {
        Ok(TaskRepo::set_exit_status(&self.pool, id, exit_status).await?)
    }

    async fn set_task_progress(&self, id: DbId, progress: i32) -> StoreResult<()> {
        Ok(TaskRepo::set_progress(&self.pool, id, progress).await?)
    }

    async fn set_task_status(&self, id: DbId, status: &str) -> StoreResult<()> {
        Ok(TaskRepo::set_status(&self.pool, id, status).await?)
    }

    async fn set_task_credentials(&self, id: DbId, names: &[String]) -> StoreResult<bool> {
        Ok(TaskRepo::set_credentials(&self.pool, id, names).await?)
    }

    async fn update_task_ping(&self, id: DbId, endpoint: &str) -> StoreResult<bool> {
        Ok(TaskRepo::update_ping(&self.pool, id, endpoint).await?)
    }

    async fn orphan_tasks(&self, cutoff: Timestamp, limit: i64) -> StoreResult<Vec<Task>> {
        Ok(TaskRepo::list_orphans(&self.pool, cutoff, limit).await?)
    }

    async fn tasks_of_jobs_in_state(
        &self,
        job_state: JobState,
        task_state: TaskState,
        limit: i64,
    ) -> StoreResult<Vec<Task>> {
        Ok(TaskRepo::list_by_job_state(&self.pool, job_state, task_state, limit).await?)
    }

    async fn dispatch_candidates(
        &self,
        filter: CandidateFilter,
        limit: i64,
    ) -> StoreResult<Vec<DispatchCandidate>> {
        Ok(TaskRepo::list_candidates(&self.pool, filter, limit).await?)
    }

    async fn dispatch_priority(&self) -> StoreResult<Vec<DispatchPriority>> {
        Ok(TaskRepo::dispatch_priority(&self.pool).await?)
    }

    async fn insert_depend(&self, depend: &NewDepend) -> StoreResult<Option<Depend>> {
        Ok(DependRepo::insert(&self.pool, depend).await?)
    }

    async fn insert_job_depends(
        &self,
        job_id: DbId,
        depend_on_job_ids: &[DbId],
    ) -> StoreResult<Vec<Depend>> {
        Ok(DependRepo::insert_job_depends(&self.pool, job_id, depend_on_job_ids).await?)
    }

    async fn active_depend_on_ids(
        &self,
        depend_type: DependType,
        depend_er_id: DbId,
    ) -> StoreResult<Vec<DbId>> {
        Ok(DependRepo::list_active_depend_on_ids(&self.pool, depend_type, depend_er_id).await?)
    }

    async fn list_depends(&self, job_id: DbId) -> StoreResult<Vec<Depend>> {
        Ok(DependRepo::list_by_job(&self.pool, job_id).await?)
    }

    async fn resolve_depends(
        &self,
        depend_type: DependType,
        depend_on_id: DbId,
    ) -> StoreResult<ResolvedDepends> {
        Ok(DependRepo::resolve(&self.pool, depend_type, depend_on_id).await?)
    }

    async fn release_job_tasks(&self, job_id: DbId) -> StoreResult<Vec<DbId>> {
        Ok(DependRepo::release_job_tasks(&self.pool, job_id).await?)
    }

    async fn ping_worker(&self, ping: &WorkerPing) -> StoreResult<Worker> {
        Ok(WorkerRepo::ping(&self.pool, ping).await?)
    }

    async fn get_worker(&self, endpoint: &str) -> StoreResult<Option<Worker>> {
        Ok(WorkerRepo::find_by_endpoint(&self.pool, endpoint).await?)
    }

    async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
        Ok(WorkerRepo::list(&self.pool).await?)
    }

    async fn set_worker_lock(&self, endpoint: &str, lock: LockState) -> StoreResult<bool> {
        Ok(WorkerRepo::set_lock(&self.pool, endpoint, lock).await?)
    }

    async fn assign_worker_task(&self, endpoint: &str, task_id: DbId) -> StoreResult<bool> {
        Ok(WorkerRepo::assign_task(&self.pool, endpoint, task_id).await?)
    }

    async fn clear_worker_task(&self, task_id: DbId) -> StoreResult<u64> {
        Ok(WorkerRepo::clear_task(&self.pool, task_id).await?)
    }

    async fn mark_workers_down(&self, cutoff: Timestamp) -> StoreResult<Vec<Worker>> {
        Ok(WorkerRepo::mark_down(&self.pool, cutoff).await?)
    }

    async fn remove_down_workers(&self, cutoff: Timestamp) -> StoreResult<u64> {
        Ok(WorkerRepo::delete_down(&self.pool, cutoff).await?)
    }

    async fn insert_task_errors(&self, errors: &[NewTaskError]) -> StoreResult<u64> {
        Ok(TaskErrorRepo::insert_batch(&self.pool, errors).await?)
    }

    async fn list_task_errors(&self, filter: &TaskErrorFilter) -> StoreResult<Vec<TaskError>> {
        Ok(TaskErrorRepo::list(&self.pool, filter).await?)
    }

    async fn clear_task_errors(&self, task_id: DbId) -> StoreResult<u64> {
        Ok(TaskErrorRepo::delete_by_task(&self.pool, task_id).await?)
    }
}
