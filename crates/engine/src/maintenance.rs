//! Periodic reclamation of stalled work.
//!
//! Each sweep resumes expired pauses, takes silent workers down, retries
//! orphaned tasks and deletes jobs past the retention horizon. Every step
//! is a conditional write, so a sweep racing normal dispatch only produces
//! collisions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use spool_core::types::DbId;
use spool_db::StateStore;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dispatch::DispatcherService;
use crate::error::EngineResult;
use crate::jobs::JobService;
use crate::metrics::DispatchMetrics;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub pauses_resumed: u64,
    pub workers_down: u64,
    pub workers_removed: u64,
    pub orphans_retried: u64,
    pub jobs_expired: u64,
}

impl SweepReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct MaintenanceSweeper {
    store: Arc<dyn StateStore>,
    jobs: JobService,
    dispatcher: Arc<DispatcherService>,
    metrics: Arc<DispatchMetrics>,
    config: EngineConfig,
}

impl MaintenanceSweeper {
    pub fn new(
        store: Arc<dyn StateStore>,
        jobs: JobService,
        dispatcher: Arc<DispatcherService>,
        metrics: Arc<DispatchMetrics>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            dispatcher,
            metrics,
            config,
        }
    }

    /// Run sweeps on the configured interval until `cancel` fires.
    ///
    /// The first sweep is delayed by a random fraction of the interval so
    /// several engine instances do not sweep in lockstep.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.maintenance_interval.max(Duration::from_secs(1));
        let jitter_ms = rand::rng().random_range(0..=period.as_millis() as u64);

        tracing::info!(
            interval_secs = period.as_secs(),
            jitter_ms,
            "Maintenance sweeper started"
        );

        let start = tokio::time::Instant::now() + Duration::from_millis(jitter_ms);
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Maintenance sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.is_empty() => {
                            tracing::debug!("Maintenance sweep: nothing to do");
                        }
                        Ok(report) => {
                            tracing::info!(
                                pauses_resumed = report.pauses_resumed,
                                workers_down = report.workers_down,
                                workers_removed = report.workers_removed,
                                orphans_retried = report.orphans_retried,
                                jobs_expired = report.jobs_expired,
                                "Maintenance sweep complete"
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Maintenance sweep failed");
                        }
                    }
                }
            }
        }
    }

    /// One full sweep.
    pub async fn sweep_once(&self) -> EngineResult<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport {
            pauses_resumed: self.store.resume_expired_pauses(now).await?,
            ..Default::default()
        };

        // ── Workers ──
        let down = self
            .store
            .mark_workers_down(cutoff(now, self.config.worker_down_after))
            .await?;
        report.workers_down = down.len() as u64;
        let mut reclaimed = HashSet::new();
        for worker in &down {
            tracing::warn!(endpoint = %worker.endpoint, "Worker stopped responding");
            if let Some(task_id) = worker.task_id {
                if self.reclaim(task_id).await? {
                    reclaimed.insert(task_id);
                }
            }
        }
        report.workers_removed = self
            .store
            .remove_down_workers(cutoff(now, self.config.worker_remove_after))
            .await?;

        // ── Orphans ──
        let orphans = self
            .store
            .orphan_tasks(
                cutoff(now, self.config.task_orphan_timeout),
                self.config.task_orphan_batch,
            )
            .await?;
        for task in orphans {
            if reclaimed.contains(&task.id) {
                continue;
            }
            tracing::warn!(
                task_id = %task.id,
                endpoint = task.host_endpoint.as_deref().unwrap_or_default(),
                last_ping = ?task.time_ping,
                "Orphaned task, retrying"
            );
            if self.reclaim(task.id).await? {
                reclaimed.insert(task.id);
            }
        }
        report.orphans_retried = reclaimed.len() as u64;
        self.metrics.record_orphans(report.orphans_retried);

        // ── Retention ──
        let expired = self
            .store
            .expired_jobs(cutoff(now, self.config.job_retention), self.config.job_expire_batch)
            .await?;
        for job in expired {
            if self.jobs.delete_job(job.id).await? {
                tracing::info!(job_id = %job.id, name = %job.name, "Expired job deleted");
                report.jobs_expired += 1;
            }
        }
        self.metrics.record_expired_jobs(report.jobs_expired);

        Ok(report)
    }

    /// Retry a task that is still dispatched. A task that moved on or was
    /// deleted since it was selected is a no-op.
    async fn reclaim(&self, task_id: DbId) -> EngineResult<bool> {
        match self.store.get_task(task_id).await? {
            Some(task) if task.state.is_dispatched() => self.dispatcher.retry_task(task_id).await,
            _ => Ok(false),
        }
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
