use std::sync::Arc;

use spool_core::dispatch::{execution_env, log_path, merge_credentials, DispatchTask, EnvInputs};
use spool_core::error::CoreError;
use spool_core::priority::JobPriority;
use spool_core::status::TaskState;
use spool_core::types::DbId;
use spool_db::models::dispatch::CandidateFilter;
use spool_db::models::task::Task;
use spool_db::StateStore;

use super::priority::PriorityCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::jobs::JobService;
use crate::metrics::DispatchMetrics;
use crate::ports::{AssetStore, CredentialIssuer, LogStorage};

/// Role of the signing key handed to a dispatched task.
const TASK_KEY_ROLE: &str = "task";

/// Selects and claims the next task for a polling worker.
pub struct DispatchQueueManager {
    store: Arc<dyn StateStore>,
    jobs: JobService,
    assets: Arc<dyn AssetStore>,
    credentials: Arc<dyn CredentialIssuer>,
    logs: Arc<dyn LogStorage>,
    priority: PriorityCache,
    metrics: Arc<DispatchMetrics>,
    poll_limit: i64,
}

impl DispatchQueueManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        jobs: JobService,
        assets: Arc<dyn AssetStore>,
        credentials: Arc<dyn CredentialIssuer>,
        logs: Arc<dyn LogStorage>,
        metrics: Arc<DispatchMetrics>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            assets,
            credentials,
            logs,
            priority: PriorityCache::new(config.dispatch_priority_ttl),
            metrics,
            poll_limit: config.dispatch_poll_limit,
        }
    }

    /// The worker poll entry point.
    ///
    /// Interactive jobs across all projects are tried first. After that,
    /// projects are tried in fairness order, fewest dispatched tasks first.
    /// Returns `None` when the worker is unknown, locked, down or busy, or
    /// when no candidate could be claimed.
    pub async fn get_next(&self, endpoint: &str) -> EngineResult<Option<DispatchTask>> {
        self.metrics.record_poll();

        let Some(worker) = self.store.get_worker(endpoint).await? else {
            tracing::debug!(endpoint, "Poll from unregistered worker");
            return Ok(None);
        };
        if !worker.is_available() {
            tracing::debug!(
                endpoint,
                lock_state = %worker.lock_state,
                state = %worker.state,
                "Worker not available for dispatch"
            );
            return Ok(None);
        }

        let interactive = self
            .store
            .dispatch_candidates(CandidateFilter::MinPriority(JobPriority::INTERACTIVE), self.poll_limit)
            .await?;
        for candidate in interactive {
            if let Some(task) = self.queue_and_dispatch(candidate.task_id, endpoint).await? {
                return Ok(Some(task));
            }
        }

        let ranking = self.priority.get(self.store.as_ref()).await?;
        for project in ranking.iter() {
            let candidates = self
                .store
                .dispatch_candidates(CandidateFilter::Project(project.project_id), self.poll_limit)
                .await?;
            for candidate in candidates {
                if let Some(task) = self.queue_and_dispatch(candidate.task_id, endpoint).await? {
                    return Ok(Some(task));
                }
            }
        }

        Ok(None)
    }

    /// Claim a task for `endpoint` and materialize it.
    ///
    /// `None` is a collision: another poller claimed the task first, or the
    /// worker was handed a different task concurrently.
    pub async fn queue_and_dispatch(
        &self,
        task_id: DbId,
        endpoint: &str,
    ) -> EngineResult<Option<DispatchTask>> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };

        if !self
            .jobs
            .set_task_state(&task, TaskState::Queued, Some(TaskState::Waiting))
            .await?
        {
            self.metrics.record_collision();
            return Ok(None);
        }

        if !self.store.assign_worker_task(endpoint, task.id).await? {
            self.metrics.record_collision();
            tracing::debug!(task_id = %task.id, endpoint, "Worker already holds a task");
            self.jobs
                .set_task_state(&task, TaskState::Waiting, Some(TaskState::Queued))
                .await?;
            return Ok(None);
        }
        self.store.set_task_host(task.id, endpoint).await?;

        match self.materialize(&task, endpoint).await {
            Ok(dispatched) => {
                self.metrics.record_dispatch();
                tracing::info!(
                    task_id = %task.id,
                    job_id = %task.job_id,
                    project_id = %task.project_id,
                    endpoint,
                    "Task dispatched"
                );
                Ok(Some(dispatched))
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, endpoint, error = %e, "Task materialization failed");
                self.jobs
                    .set_task_state(&task, TaskState::Waiting, Some(TaskState::Queued))
                    .await?;
                Err(e)
            }
        }
    }

    /// Build the descriptor a worker executes: script with resolved assets,
    /// scoped environment and a signed log destination.
    async fn materialize(&self, task: &Task, endpoint: &str) -> EngineResult<DispatchTask> {
        let job = self.jobs.require_job(task.job_id).await?;
        let mut script = self.store.get_task_script(task.id).await?.ok_or_else(|| {
            EngineError::from(CoreError::NotFound {
                entity: "task script",
                id: task.id,
            })
        })?;

        if let Some(ids) = script.asset_ids.as_ref().filter(|ids| !ids.is_empty()) {
            let docs = self.assets.get_assets(task.project_id, ids).await?;
            script.assets.get_or_insert_with(Vec::new).extend(docs);
        }

        // The run this dispatch starts; run_count advances on start.
        let run = task.run_count + 1;
        let log_url = self.logs.signed_url(&log_path(job.id, task.id, run)).await?;
        let api_key = self
            .credentials
            .signing_key(task.project_id, TASK_KEY_ROLE)
            .await?;
        let credentials = merge_credentials(&job.credentials, &task.credentials);

        let env = execution_env(EnvInputs {
            task_id: task.id,
            job_id: job.id,
            project_id: task.project_id,
            api_key: &api_key,
            log_url: &log_url,
            credentials: &credentials,
            job_env: &job.env,
        });

        Ok(DispatchTask {
            id: task.id,
            job_id: task.job_id,
            project_id: task.project_id,
            name: task.name.clone(),
            state: TaskState::Queued,
            host_endpoint: endpoint.to_string(),
            run_count: task.run_count,
            script,
            env,
            args: job.args,
            log_file: log_url,
        })
    }
}
