use std::sync::Arc;
use std::time::Duration;

use spool_core::status::TaskState;
use spool_db::models::task::Task;
use tokio_util::task::TaskTracker;

use crate::error::{EngineError, EngineResult};
use crate::jobs::JobService;
use crate::metrics::DispatchMetrics;
use crate::ports::{KillRequest, WorkerClient};

/// Remote kill requests, run as tracked background tasks.
///
/// A request that fails or times out falls back to applying the requested
/// state locally, so a dead worker never leaves its task stuck. Callers
/// never wait on the worker.
#[derive(Clone)]
pub struct BackgroundKills {
    tracker: TaskTracker,
    client: Arc<dyn WorkerClient>,
    jobs: JobService,
    metrics: Arc<DispatchMetrics>,
    timeout: Duration,
}

impl BackgroundKills {
    pub fn new(
        client: Arc<dyn WorkerClient>,
        jobs: JobService,
        metrics: Arc<DispatchMetrics>,
        timeout: Duration,
    ) -> Self {
        Self {
            tracker: TaskTracker::new(),
            client,
            jobs,
            metrics,
            timeout,
        }
    }

    /// Ask the worker running `task` to stop it and report `new_state`.
    pub fn request_kill(&self, task: Task, new_state: TaskState, reason: &str) {
        self.metrics.record_kill_request();
        let this = self.clone();
        let reason = reason.to_string();
        self.tracker.spawn(async move {
            let task_id = task.id;
            if let Err(e) = this.kill_or_fallback(task, new_state, reason).await {
                tracing::error!(%task_id, error = %e, "Kill request fallback failed");
            }
        });
    }

    async fn kill_or_fallback(
        &self,
        task: Task,
        new_state: TaskState,
        reason: String,
    ) -> EngineResult<()> {
        let request = KillRequest {
            task_id: task.id,
            job_id: task.job_id,
            new_state,
            reason,
        };

        let outcome = match task.host_endpoint.as_deref() {
            Some(endpoint) => {
                match tokio::time::timeout(self.timeout, self.client.kill_task(endpoint, &request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::collaborator(
                        "worker",
                        format!("kill request timed out after {}s", self.timeout.as_secs()),
                    )),
                }
            }
            None => Err(EngineError::collaborator("worker", "task has no host endpoint")),
        };

        let Err(e) = outcome else {
            tracing::info!(
                task_id = %task.id,
                endpoint = task.host_endpoint.as_deref().unwrap_or_default(),
                new_state = %new_state,
                "Kill request delivered"
            );
            return Ok(());
        };

        tracing::warn!(
            task_id = %task.id,
            error = %e,
            new_state = %new_state,
            "Kill request failed, applying state locally"
        );
        self.metrics.record_kill_fallback();

        let current = match self.jobs.require_task(task.id).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if current.state.is_dispatched() {
            self.jobs
                .set_task_state(&current, new_state, Some(current.state))
                .await?;
        }
        Ok(())
    }

    /// Wait for every in-flight request, then accept new ones again.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting requests and wait for the in-flight ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}
