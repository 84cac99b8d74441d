//! Worker heartbeats and administrative locking.

use std::sync::Arc;

use spool_core::error::CoreError;
use spool_core::status::LockState;
use spool_core::worker::{validate_endpoint, WorkerPing};
use spool_db::models::worker::Worker;
use spool_db::StateStore;

use crate::error::EngineResult;

#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn StateStore>,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Register or refresh a worker. A ping naming the task the worker is
    /// running also advances that task's heartbeat.
    pub async fn ping(&self, ping: &WorkerPing) -> EngineResult<Worker> {
        validate_endpoint(&ping.endpoint)?;
        let worker = self.store.ping_worker(ping).await?;

        if let Some(task_id) = ping.task_id {
            if !self.store.update_task_ping(task_id, &ping.endpoint).await? {
                tracing::debug!(
                    endpoint = %ping.endpoint,
                    %task_id,
                    "Ping names a task not running on this worker"
                );
            }
        }
        Ok(worker)
    }

    /// Lock or unlock a worker. Locked workers receive no new tasks.
    pub async fn set_lock(&self, endpoint: &str, lock: LockState) -> EngineResult<Worker> {
        if !self.store.set_worker_lock(endpoint, lock).await? {
            return Err(CoreError::Validation(format!("unknown worker endpoint {endpoint}")).into());
        }
        tracing::info!(endpoint, lock_state = %lock, "Worker lock changed");
        self.require(endpoint).await
    }

    pub async fn get(&self, endpoint: &str) -> EngineResult<Option<Worker>> {
        Ok(self.store.get_worker(endpoint).await?)
    }

    pub async fn list(&self) -> EngineResult<Vec<Worker>> {
        Ok(self.store.list_workers().await?)
    }

    async fn require(&self, endpoint: &str) -> EngineResult<Worker> {
        self.store
            .get_worker(endpoint)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("unknown worker endpoint {endpoint}")).into())
    }
}
