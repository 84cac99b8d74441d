//! Job and task lifecycle.
//!
//! Every state change goes through [`JobService::set_task_state`] or
//! [`JobService::set_job_state`]. Both are conditional writes: a `false`
//! return means another actor got there first and is not an error. On a
//! successful change they publish an [`EngineEvent`], release dependents
//! and check whether the job is finished.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use spool_core::error::CoreError;
use spool_core::job_spec::{validate_job_spec, JobSpec};
use spool_core::script::TaskScript;
use spool_core::status::{JobState, TaskState};
use spool_core::types::DbId;
use spool_db::models::depend::NewDepend;
use spool_db::models::job::{Job, JobDetail, JobFilter, NewJob};
use spool_db::models::task::{NewTask, Task};
use spool_db::models::task_error::{NewTaskError, TaskError, TaskErrorFilter};
use spool_db::StateStore;
use spool_events::{EngineEvent, EventBus};

use crate::depend::DependService;
use crate::error::EngineResult;
use crate::ports::PipelineResolver;

/// Upper bound on same-named jobs a `replace` submission cancels.
const REPLACE_SCAN_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn StateStore>,
    depends: DependService,
    bus: Arc<EventBus>,
    pipeline: Arc<dyn PipelineResolver>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn StateStore>,
        depends: DependService,
        bus: Arc<EventBus>,
        pipeline: Arc<dyn PipelineResolver>,
    ) -> Self {
        Self {
            store,
            depends,
            bus,
            pipeline,
        }
    }

    // ── Creation ─────────────────────────────────────────────────────────

    /// Persist a job, its job-level depends and a task tree per script.
    ///
    /// Tasks start in `Depend` when the job waits on another job, otherwise
    /// in `Waiting`. With `replace`, in-progress jobs of the same name in
    /// the project are cancelled once the new job is fully created.
    pub async fn create_job(&self, project_id: DbId, spec: JobSpec) -> EngineResult<Job> {
        validate_job_spec(&spec)?;

        let mut upstream = Vec::with_capacity(spec.depend_on_job_ids.len());
        for id in &spec.depend_on_job_ids {
            upstream.push(self.require_job(*id).await?);
        }

        let name = spec
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| spec.scripts[0].name.clone());

        let replaced = if spec.replace {
            self.store
                .list_jobs(&JobFilter {
                    project_id: Some(project_id),
                    states: vec![JobState::InProgress],
                    name: Some(name.clone()),
                    limit: Some(REPLACE_SCAN_LIMIT),
                    offset: None,
                })
                .await?
        } else {
            Vec::new()
        };

        let time_pause_expired = match (spec.paused, spec.pause_duration_secs) {
            (true, Some(secs)) => Some(Utc::now() + chrono::Duration::seconds(secs)),
            _ => None,
        };

        let job = self
            .store
            .insert_job(&NewJob {
                project_id,
                name,
                priority: spec.priority,
                max_running_tasks: spec.max_running_tasks,
                paused: spec.paused,
                time_pause_expired,
                args: spec.args,
                env: spec.env,
                credentials: spec.credentials,
            })
            .await?;

        // Tasks exist before the job-level edges, so a resolution landing
        // mid-creation finds them and releases them.
        let blocked = upstream.iter().any(|j| j.state != JobState::Success);
        let root_state = if blocked {
            TaskState::Depend
        } else {
            TaskState::Waiting
        };
        for script in spec.scripts {
            self.insert_task_tree(&job, script, None, root_state).await?;
        }

        if blocked {
            self.depends
                .create_job_depends(job.id, &spec.depend_on_job_ids)
                .await?;
            // Covers upstream jobs that succeeded before their edge went in.
            self.depends.release_job_tasks(job.id).await?;
        }
        let job = self.require_job(job.id).await?;

        tracing::info!(
            job_id = %job.id,
            %project_id,
            name = %job.name,
            priority = job.priority,
            depend_count = job.depend_count,
            "Job created"
        );

        for old in replaced {
            if self.cancel_job(old.id).await? {
                tracing::info!(job_id = %old.id, replaced_by = %job.id, "Replaced job cancelled");
            }
        }

        Ok(job)
    }

    /// Persist a task and, recursively, its children.
    ///
    /// The root starts in `Depend` while the job waits on another job. Each
    /// child starts in `Depend` with a TaskOnTask depend on its parent.
    /// Returns the root task.
    pub async fn create_task(
        &self,
        job: &Job,
        script: TaskScript,
        parent_id: Option<DbId>,
    ) -> EngineResult<Task> {
        let root_state = if job.depend_count > 0 {
            TaskState::Depend
        } else {
            TaskState::Waiting
        };
        self.insert_task_tree(job, script, parent_id, root_state).await
    }

    async fn insert_task_tree(
        &self,
        job: &Job,
        script: TaskScript,
        parent_id: Option<DbId>,
        root_state: TaskState,
    ) -> EngineResult<Task> {
        // (script, lineage parent, task that must succeed first)
        let mut pending: Vec<(TaskScript, Option<DbId>, Option<DbId>)> =
            vec![(script, parent_id, None)];
        let mut root: Option<Task> = None;
        let mut satisfied = false;

        while let Some((mut script, parent_id, blocked_by)) = pending.pop() {
            let children = script.take_children();
            if !script.modules.is_empty() {
                let mut execute = self.pipeline.resolve(job.project_id, &script.modules).await?;
                execute.append(&mut script.execute);
                script.execute = execute;
            }

            let asset_count = script.asset_count();
            let task = self
                .store
                .insert_task(&NewTask {
                    job_id: job.id,
                    project_id: job.project_id,
                    parent_id,
                    name: script.name.clone(),
                    state: if blocked_by.is_some() {
                        TaskState::Depend
                    } else {
                        root_state
                    },
                    script,
                })
                .await?;

            if let Some(on) = blocked_by {
                satisfied |= self
                    .depends
                    .create_depend(&NewDepend::task_on_task((task.id, job.id), (on, job.id)))
                    .await?
                    .is_none();
            }
            if asset_count > 0 {
                self.store
                    .increment_asset_counts(job.id, None, asset_count, 0)
                    .await?;
            }

            tracing::debug!(task_id = %task.id, job_id = %job.id, state = %task.state, "Task created");

            for child in children.into_iter().rev() {
                pending.push((child, Some(task.id), Some(task.id)));
            }
            root.get_or_insert(task);
        }

        // A parent that already succeeded left its child in `Depend` with
        // nothing to wait on.
        if satisfied {
            self.depends.release_job_tasks(job.id).await?;
        }

        root.ok_or_else(|| CoreError::Internal("task tree produced no task".into()).into())
    }

    // ── Task state ───────────────────────────────────────────────────────

    /// Conditionally move a task to `new_state`.
    ///
    /// On success: publishes the change, clears the worker assignment when
    /// the task leaves `Queued`/`Running`, releases dependents on success
    /// states and checks job completion on terminal states.
    pub async fn set_task_state(
        &self,
        task: &Task,
        new_state: TaskState,
        expected_old: Option<TaskState>,
    ) -> EngineResult<bool> {
        if !self.store.set_task_state(task.id, new_state, expected_old).await? {
            tracing::debug!(
                task_id = %task.id,
                new_state = %new_state,
                expected_old = ?expected_old,
                "Task state collision"
            );
            return Ok(false);
        }

        tracing::info!(
            task_id = %task.id,
            job_id = %task.job_id,
            old_state = ?expected_old,
            new_state = %new_state,
            "Task state changed"
        );
        self.bus.publish(EngineEvent::task_state_changed(
            task.id,
            task.job_id,
            expected_old,
            new_state,
        ));

        if !new_state.is_dispatched() {
            self.store.clear_worker_task(task.id).await?;
        }
        if new_state.is_success() {
            self.depends.resolve_depends_on_task(task.id).await?;
        }
        if new_state.is_finished() {
            self.check_and_set_job_finished(task.job_id).await?;
        }
        Ok(true)
    }

    // ── Job state ────────────────────────────────────────────────────────

    /// Conditionally move a job to `new_state`. A job that succeeds releases
    /// the jobs waiting on it.
    pub async fn set_job_state(
        &self,
        job: &Job,
        new_state: JobState,
        expected_old: Option<JobState>,
    ) -> EngineResult<bool> {
        if !self.store.set_job_state(job.id, new_state, expected_old).await? {
            tracing::debug!(job_id = %job.id, new_state = %new_state, "Job state collision");
            return Ok(false);
        }

        let old_state = expected_old.unwrap_or(job.state);
        tracing::info!(
            job_id = %job.id,
            old_state = %old_state,
            new_state = %new_state,
            "Job state changed"
        );
        self.bus.publish(EngineEvent::job_state_changed(
            job.id,
            job.project_id,
            old_state,
            new_state,
        ));

        if new_state == JobState::Success {
            self.depends.resolve_depends_on_job(job.id).await?;
        }
        Ok(true)
    }

    /// Finish the job once none of its tasks is pending: `Failure` if any
    /// task failed, `Success` otherwise. Returns the state it moved to.
    pub async fn check_and_set_job_finished(&self, job_id: DbId) -> EngineResult<Option<JobState>> {
        let counts = self.store.job_task_counts(job_id).await?;
        if counts.pending() > 0 {
            return Ok(None);
        }

        let job = self.require_job(job_id).await?;
        if job.state != JobState::InProgress {
            return Ok(None);
        }

        let new_state = if counts.failure > 0 {
            JobState::Failure
        } else {
            JobState::Success
        };
        let changed = self
            .set_job_state(&job, new_state, Some(JobState::InProgress))
            .await?;
        Ok(changed.then_some(new_state))
    }

    /// Cancel an in-progress job. Running tasks are killed by the
    /// dispatcher's event listener.
    pub async fn cancel_job(&self, job_id: DbId) -> EngineResult<bool> {
        let job = self.require_job(job_id).await?;
        self.set_job_state(&job, JobState::Cancelled, Some(JobState::InProgress))
            .await
    }

    /// Put a finished job back in progress.
    pub async fn restart_job(&self, job_id: DbId) -> EngineResult<bool> {
        let job = self.require_job(job_id).await?;
        self.set_job_state(&job, JobState::InProgress, None).await
    }

    /// Send every failed task back to `Waiting` and restart the job.
    /// Returns how many tasks were retried.
    pub async fn retry_all_failures(&self, job_id: DbId) -> EngineResult<u64> {
        self.require_job(job_id).await?;
        let mut retried = 0;
        for task in self.store.list_tasks(job_id, Some(TaskState::Failure)).await? {
            if self
                .set_task_state(&task, TaskState::Waiting, Some(TaskState::Failure))
                .await?
            {
                retried += 1;
            }
        }
        if retried > 0 {
            self.restart_job(job_id).await?;
        }
        tracing::info!(%job_id, retried, "Failed tasks retried");
        Ok(retried)
    }

    /// Delete a job and everything it owns. Jobs waiting on it are released
    /// first so they cannot be left blocked.
    pub async fn delete_job(&self, job_id: DbId) -> EngineResult<bool> {
        self.require_job(job_id).await?;
        self.depends.resolve_depends_on_job(job_id).await?;
        let deleted = self.store.delete_job(job_id).await?;
        if deleted {
            tracing::info!(%job_id, "Job deleted");
        }
        Ok(deleted)
    }

    /// Pause a job, optionally until `duration` has passed.
    pub async fn pause_job(&self, job_id: DbId, duration: Option<Duration>) -> EngineResult<bool> {
        self.require_job(job_id).await?;
        let expires = duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        Ok(self.store.set_job_paused(job_id, true, expires).await?)
    }

    pub async fn resume_job(&self, job_id: DbId) -> EngineResult<bool> {
        self.require_job(job_id).await?;
        Ok(self.store.set_job_paused(job_id, false, None).await?)
    }

    // ── Credentials ──────────────────────────────────────────────────────

    pub async fn set_job_credentials(&self, job_id: DbId, names: &[String]) -> EngineResult<bool> {
        validate_credential_names(names)?;
        self.require_job(job_id).await?;
        Ok(self.store.set_job_credentials(job_id, names).await?)
    }

    pub async fn set_task_credentials(&self, task_id: DbId, names: &[String]) -> EngineResult<bool> {
        validate_credential_names(names)?;
        self.require_task(task_id).await?;
        Ok(self.store.set_task_credentials(task_id, names).await?)
    }

    // ── Task errors ──────────────────────────────────────────────────────

    pub async fn record_task_errors(&self, errors: &[NewTaskError]) -> EngineResult<u64> {
        if errors.is_empty() {
            return Ok(0);
        }
        Ok(self.store.insert_task_errors(errors).await?)
    }

    pub async fn list_task_errors(&self, filter: &TaskErrorFilter) -> EngineResult<Vec<TaskError>> {
        Ok(self.store.list_task_errors(filter).await?)
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub async fn require_job(&self, job_id: DbId) -> EngineResult<Job> {
        self.store.get_job(job_id).await?.ok_or_else(|| {
            CoreError::NotFound {
                entity: "job",
                id: job_id,
            }
            .into()
        })
    }

    pub async fn require_task(&self, task_id: DbId) -> EngineResult<Task> {
        self.store.get_task(task_id).await?.ok_or_else(|| {
            CoreError::NotFound {
                entity: "task",
                id: task_id,
            }
            .into()
        })
    }

    pub async fn job_detail(&self, job_id: DbId) -> EngineResult<JobDetail> {
        let job = self.require_job(job_id).await?;
        let task_counts = self.store.job_task_counts(job_id).await?;
        Ok(JobDetail { job, task_counts })
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> EngineResult<Vec<Job>> {
        Ok(self.store.list_jobs(filter).await?)
    }

    pub async fn list_tasks(&self, job_id: DbId, state: Option<TaskState>) -> EngineResult<Vec<Task>> {
        Ok(self.store.list_tasks(job_id, state).await?)
    }
}

fn validate_credential_names(names: &[String]) -> Result<(), CoreError> {
    match names.iter().find(|n| n.trim().is_empty()) {
        Some(name) => Err(CoreError::Validation(format!(
            "credential name '{name}' must not be blank"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::ports::PassthroughPipeline;
    use assert_matches::assert_matches;
    use serde_json::json;
    use spool_core::types::new_id;
    use spool_db::MemoryStore;

    fn service() -> (Arc<MemoryStore>, JobService) {
        let store = Arc::new(MemoryStore::new());
        let depends = DependService::new(store.clone());
        let jobs = JobService::new(
            store.clone(),
            depends,
            Arc::new(EventBus::default()),
            Arc::new(PassthroughPipeline),
        );
        (store, jobs)
    }

    fn script(name: &str) -> TaskScript {
        TaskScript {
            name: name.into(),
            ..Default::default()
        }
    }

    async fn finish(jobs: &JobService, task: &Task, state: TaskState) {
        assert!(jobs.set_task_state(task, TaskState::Queued, Some(TaskState::Waiting)).await.unwrap());
        assert!(jobs.set_task_state(task, state, Some(TaskState::Queued)).await.unwrap());
    }

    // -- Creation --

    #[tokio::test]
    async fn children_start_in_depend() {
        let (store, jobs) = service();
        let mut parent = script("parent");
        parent.children = vec![script("child")];

        let job = jobs
            .create_job(new_id(), JobSpec::new("tree", vec![parent]))
            .await
            .unwrap();

        let tasks = store.list_tasks(job.id, None).await.unwrap();
        assert_eq!(tasks.len(), 2);
        let child = tasks.iter().find(|t| t.name == "child").unwrap();
        let parent = tasks.iter().find(|t| t.name == "parent").unwrap();
        assert_eq!(parent.state, TaskState::Waiting);
        assert_eq!(child.state, TaskState::Depend);
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.depend_count, 1);
    }

    #[tokio::test]
    async fn modules_resolve_ahead_of_literal_operations() {
        let (store, jobs) = service();
        let mut s = script("pipeline");
        s.modules = vec!["import".into()];
        s.execute = vec![json!({"op": "literal"})];

        let job = jobs.create_job(new_id(), JobSpec::new("p", vec![s])).await.unwrap();
        let task = &store.list_tasks(job.id, None).await.unwrap()[0];
        let stored = store.get_task_script(task.id).await.unwrap().unwrap();
        assert_eq!(stored.execute, vec![json!({"module": "import"}), json!({"op": "literal"})]);
    }

    #[tokio::test]
    async fn unknown_upstream_job_is_not_found() {
        let (_, jobs) = service();
        let mut spec = JobSpec::new("downstream", vec![script("a")]);
        spec.depend_on_job_ids = vec![new_id()];

        let err = jobs.create_job(new_id(), spec).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn replace_cancels_same_named_job() {
        let (_, jobs) = service();
        let project = new_id();
        let old = jobs
            .create_job(project, JobSpec::new("nightly", vec![script("a")]))
            .await
            .unwrap();

        let mut spec = JobSpec::new("nightly", vec![script("a")]);
        spec.replace = true;
        let new = jobs.create_job(project, spec).await.unwrap();

        assert_eq!(jobs.require_job(old.id).await.unwrap().state, JobState::Cancelled);
        assert_eq!(jobs.require_job(new.id).await.unwrap().state, JobState::InProgress);
    }

    // -- Completion --

    #[tokio::test]
    async fn job_with_pending_task_does_not_finish() {
        let (store, jobs) = service();
        let job = jobs
            .create_job(new_id(), JobSpec::new("two", vec![script("a"), script("b")]))
            .await
            .unwrap();
        let tasks = store.list_tasks(job.id, None).await.unwrap();

        finish(&jobs, &tasks[0], TaskState::Success).await;
        assert_eq!(jobs.check_and_set_job_finished(job.id).await.unwrap(), None);
        assert_eq!(jobs.require_job(job.id).await.unwrap().state, JobState::InProgress);
    }

    #[tokio::test]
    async fn any_failure_fails_the_job() {
        let (store, jobs) = service();
        let job = jobs
            .create_job(new_id(), JobSpec::new("two", vec![script("a"), script("b")]))
            .await
            .unwrap();
        let tasks = store.list_tasks(job.id, None).await.unwrap();

        finish(&jobs, &tasks[0], TaskState::Failure).await;
        finish(&jobs, &tasks[1], TaskState::Success).await;
        assert_eq!(jobs.require_job(job.id).await.unwrap().state, JobState::Failure);
    }

    #[tokio::test]
    async fn retry_all_failures_restarts_the_job() {
        let (store, jobs) = service();
        let job = jobs
            .create_job(new_id(), JobSpec::new("one", vec![script("a")]))
            .await
            .unwrap();
        let task = store.list_tasks(job.id, None).await.unwrap().remove(0);
        finish(&jobs, &task, TaskState::Failure).await;
        assert_eq!(jobs.require_job(job.id).await.unwrap().state, JobState::Failure);

        assert_eq!(jobs.retry_all_failures(job.id).await.unwrap(), 1);
        assert_eq!(jobs.require_job(job.id).await.unwrap().state, JobState::InProgress);
        assert_eq!(jobs.require_task(task.id).await.unwrap().state, TaskState::Waiting);
    }

    // -- Delete and credentials --

    #[tokio::test]
    async fn deleting_upstream_releases_downstream() {
        let (store, jobs) = service();
        let upstream = jobs
            .create_job(new_id(), JobSpec::new("up", vec![script("a")]))
            .await
            .unwrap();
        let mut spec = JobSpec::new("down", vec![script("b")]);
        spec.depend_on_job_ids = vec![upstream.id];
        let downstream = jobs.create_job(new_id(), spec).await.unwrap();

        let blocked = store.list_tasks(downstream.id, None).await.unwrap().remove(0);
        assert_eq!(blocked.state, TaskState::Depend);

        assert!(jobs.delete_job(upstream.id).await.unwrap());
        let released = jobs.require_task(blocked.id).await.unwrap();
        assert_eq!(released.state, TaskState::Waiting);
    }

    #[tokio::test]
    async fn blank_credential_is_rejected() {
        let (_, jobs) = service();
        let job = jobs
            .create_job(new_id(), JobSpec::new("c", vec![script("a")]))
            .await
            .unwrap();
        let result = jobs.set_job_credentials(job.id, &["aws".into(), " ".into()]).await;
        assert_matches!(result, Err(EngineError::Core(CoreError::Validation(_))));
    }
}
