use std::sync::Arc;

use spool_core::error::CoreError;
use spool_core::protocol::{
    BatchIndexEvent, TaskErrorEvent, TaskEvent, TaskEventKind, TaskExpandEvent, TaskStoppedEvent,
};
use spool_core::retry::RetryPolicy;
use spool_core::status::{JobState, TaskState};
use spool_core::types::DbId;
use spool_db::models::task::Task;
use spool_db::models::task_error::NewTaskError;
use spool_db::StateStore;
use spool_events::{EngineEvent, EventBus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::kills::BackgroundKills;
use crate::error::EngineResult;
use crate::jobs::JobService;
use crate::metrics::DispatchMetrics;
use crate::ports::{AssetFailure, AssetStore};

/// Running tasks of cancelled jobs killed per reconciliation pass.
const RECONCILE_LIMIT: i64 = 1000;

/// Applies the lifecycle events workers report and the administrative
/// retry/skip operations.
pub struct DispatcherService {
    store: Arc<dyn StateStore>,
    jobs: JobService,
    assets: Arc<dyn AssetStore>,
    kills: BackgroundKills,
    bus: Arc<EventBus>,
    policy: RetryPolicy,
    metrics: Arc<DispatchMetrics>,
}

impl DispatcherService {
    pub fn new(
        store: Arc<dyn StateStore>,
        jobs: JobService,
        assets: Arc<dyn AssetStore>,
        kills: BackgroundKills,
        bus: Arc<EventBus>,
        policy: RetryPolicy,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            store,
            jobs,
            assets,
            kills,
            bus,
            policy,
            metrics,
        }
    }

    pub fn kills(&self) -> &BackgroundKills {
        &self.kills
    }

    // ── Worker events ────────────────────────────────────────────────────

    /// Apply one worker-reported event to its task.
    pub async fn handle_event(&self, event: TaskEvent) -> EngineResult<()> {
        let task = self.jobs.require_task(event.task_id).await?;
        if task.job_id != event.job_id {
            return Err(CoreError::Validation(format!(
                "task {} does not belong to job {}",
                task.id, event.job_id
            ))
            .into());
        }

        tracing::debug!(task_id = %task.id, kind = event.event.kind(), "Task event");
        match event.event {
            TaskEventKind::Started => {
                self.start_task(&task).await?;
            }
            TaskEventKind::Stopped(stopped) => {
                self.stop_task(&task, &stopped).await?;
            }
            TaskEventKind::Error(error) => self.handle_error_event(&task, error).await?,
            TaskEventKind::Expand(expand) => {
                self.expand(&task, &expand).await?;
            }
            TaskEventKind::Message(m) => {
                tracing::warn!(task_id = %task.id, message = %m.message, "Task message");
            }
            TaskEventKind::Stats(stats) => self.metrics.record_stats(&stats.stats),
            TaskEventKind::Progress(p) => self.store.set_task_progress(task.id, p.progress).await?,
            TaskEventKind::Status(s) => self.store.set_task_status(task.id, &s.status).await?,
            TaskEventKind::Index(index) => self.handle_index_event(&task, &index).await?,
        }
        Ok(())
    }

    /// `Queued -> Running`. Clears errors from earlier runs and stamps the
    /// job's start time.
    pub async fn start_task(&self, task: &Task) -> EngineResult<bool> {
        if !self
            .jobs
            .set_task_state(task, TaskState::Running, Some(TaskState::Queued))
            .await?
        {
            return Ok(false);
        }
        self.store.clear_task_errors(task.id).await?;
        self.store.mark_job_started(task.job_id).await?;
        Ok(true)
    }

    /// Move a stopped task to the state its exit warrants.
    ///
    /// Tried against `Running` and then `Queued`, since a worker may stop a
    /// task before its start event lands. A failure that is not retried
    /// records one fatal task error. The worker's assignment is always
    /// cleared.
    pub async fn stop_task(&self, task: &Task, event: &TaskStoppedEvent) -> EngineResult<bool> {
        let task = self.jobs.require_task(task.id).await?;
        let new_state = self.policy.stop_state(event, task.run_count);

        self.store.set_task_exit_status(task.id, event.exit_status).await?;
        let changed = self
            .jobs
            .set_task_state(&task, new_state, Some(TaskState::Running))
            .await?
            || self
                .jobs
                .set_task_state(&task, new_state, Some(TaskState::Queued))
                .await?;
        self.store.clear_worker_task(task.id).await?;

        if !changed {
            return Ok(false);
        }

        if new_state == TaskState::Waiting && !event.manual_kill && event.new_state.is_none() {
            self.metrics.record_auto_retry();
            tracing::info!(
                task_id = %task.id,
                exit_status = event.exit_status,
                run_count = task.run_count,
                "Task failed, retrying automatically"
            );
        }

        if RetryPolicy::is_hard_failure(event, new_state) {
            self.metrics.record_hard_failure();
            let mut message = format!("Hard Task failure, exit {}", event.exit_status);
            if let Some(detail) = event.message.as_deref().filter(|m| !m.is_empty()) {
                message.push_str(": ");
                message.push_str(detail);
            }
            self.jobs
                .record_task_errors(&[NewTaskError {
                    task_id: task.id,
                    job_id: task.job_id,
                    asset_id: None,
                    path: None,
                    message,
                    processor: None,
                    fatal: true,
                    phase: "execute".to_string(),
                }])
                .await?;
        }
        Ok(true)
    }

    async fn handle_error_event(&self, task: &Task, error: TaskErrorEvent) -> EngineResult<()> {
        let counts_asset = error.asset_id.is_some();
        self.jobs
            .record_task_errors(&[NewTaskError {
                task_id: task.id,
                job_id: task.job_id,
                asset_id: error.asset_id,
                path: error.path,
                message: error.message,
                processor: error.processor,
                fatal: error.fatal,
                phase: error.phase,
            }])
            .await?;
        if counts_asset {
            self.store
                .increment_asset_counts(task.job_id, Some(task.id), 0, 1)
                .await?;
        }
        Ok(())
    }

    /// Create the assets an expand event names and a task to process them.
    ///
    /// The new task runs the parent's pipeline. Assets the storage layer
    /// refuses become task errors. Returns `None` when nothing was created.
    pub async fn expand(&self, task: &Task, event: &TaskExpandEvent) -> EngineResult<Option<Task>> {
        if event.assets.is_empty() {
            return Ok(None);
        }

        let outcome = self.assets.create_assets(task.project_id, &event.assets).await?;
        self.record_asset_failures(task, &outcome.failed, "expand").await?;

        if outcome.created.is_empty() {
            return Ok(None);
        }

        let parent_script = self.store.get_task_script(task.id).await?.unwrap_or_default();
        let script = parent_script.expanded(outcome.created);
        let job = self.jobs.require_job(task.job_id).await?;
        let child = self.jobs.create_task(&job, script, Some(task.id)).await?;

        tracing::info!(
            task_id = %task.id,
            child_id = %child.id,
            assets = child.asset_total_count,
            "Task expanded"
        );
        Ok(Some(child))
    }

    /// Index a batch of asset documents. Failures become task errors and
    /// leave the task state alone.
    pub async fn handle_index_event(&self, task: &Task, event: &BatchIndexEvent) -> EngineResult<()> {
        if event.assets.is_empty() {
            return Ok(());
        }
        let outcome = self.assets.index_assets(task.project_id, &event.assets).await?;
        self.record_asset_failures(task, &outcome.failed, "index").await?;
        tracing::debug!(
            task_id = %task.id,
            indexed = outcome.indexed,
            failed = outcome.failed.len(),
            "Batch indexed"
        );
        Ok(())
    }

    async fn record_asset_failures(
        &self,
        task: &Task,
        failures: &[AssetFailure],
        phase: &str,
    ) -> EngineResult<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let errors: Vec<NewTaskError> = failures
            .iter()
            .map(|f| NewTaskError {
                task_id: task.id,
                job_id: task.job_id,
                asset_id: f.asset_id.clone(),
                path: f.path.clone(),
                message: f.message.clone(),
                processor: None,
                fatal: false,
                phase: phase.to_string(),
            })
            .collect();
        self.jobs.record_task_errors(&errors).await?;
        self.store
            .increment_asset_counts(task.job_id, Some(task.id), 0, errors.len() as i64)
            .await?;
        Ok(())
    }

    // ── Administrative ───────────────────────────────────────────────────

    /// Send a task back to `Waiting`. A finished job is restarted so the
    /// task can run again.
    pub async fn retry_task(&self, task_id: DbId) -> EngineResult<bool> {
        let task = self.jobs.require_task(task_id).await?;
        let job = self.jobs.require_job(task.job_id).await?;
        let changed = self.stop_or_set(&task, TaskState::Waiting, "retry").await?;
        if changed && job.state.is_finished() {
            self.jobs.restart_job(job.id).await?;
        }
        Ok(changed)
    }

    pub async fn skip_task(&self, task_id: DbId) -> EngineResult<bool> {
        let task = self.jobs.require_task(task_id).await?;
        self.stop_or_set(&task, TaskState::Skipped, "skip").await
    }

    /// Dispatched tasks are stopped through their worker in the
    /// background; anything else changes state directly.
    async fn stop_or_set(&self, task: &Task, new_state: TaskState, reason: &str) -> EngineResult<bool> {
        if task.state.is_dispatched() {
            self.kills.request_kill(task.clone(), new_state, reason);
            return Ok(true);
        }
        self.jobs
            .set_task_state(task, new_state, Some(task.state))
            .await
    }

    // ── Event listener ───────────────────────────────────────────────────

    /// Subscribe to the event bus and spawn the listener that kills the
    /// running tasks of cancelled jobs.
    ///
    /// The subscription exists before this returns, so no event published
    /// afterwards is missed.
    pub fn spawn_event_listener(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let receiver = self.bus.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_event_listener(receiver, cancel).await })
    }

    async fn run_event_listener(
        &self,
        mut receiver: broadcast::Receiver<EngineEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dispatcher event listener shutting down");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(EngineEvent::JobStateChanged { job_id, new_state: JobState::Cancelled, .. }) => {
                        if let Err(e) = self.kill_running_tasks(job_id).await {
                            tracing::error!(%job_id, error = %e, "Failed to kill tasks of cancelled job");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Dispatcher event listener lagged, reconciling");
                        if let Err(e) = self.kill_tasks_of_cancelled_jobs().await {
                            tracing::error!(error = %e, "Failed to reconcile cancelled jobs");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// A lagged receiver may have lost cancellations, so look for their
    /// effect in the store instead: running tasks of cancelled jobs.
    async fn kill_tasks_of_cancelled_jobs(&self) -> EngineResult<()> {
        let running = self
            .store
            .tasks_of_jobs_in_state(JobState::Cancelled, TaskState::Running, RECONCILE_LIMIT)
            .await?;
        if !running.is_empty() {
            tracing::info!(tasks = running.len(), "Killing leftover tasks of cancelled jobs");
        }
        for task in running {
            self.kills.request_kill(task, TaskState::Waiting, "job cancelled");
        }
        Ok(())
    }

    async fn kill_running_tasks(&self, job_id: DbId) -> EngineResult<()> {
        let running = self.store.list_tasks(job_id, Some(TaskState::Running)).await?;
        tracing::info!(%job_id, tasks = running.len(), "Killing tasks of cancelled job");
        for task in running {
            self.kills.request_kill(task, TaskState::Waiting, "job cancelled");
        }
        Ok(())
    }
}
