use std::sync::Arc;
use std::time::Duration;

use spool_db::models::dispatch::DispatchPriority;
use spool_db::StateStore;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::EngineResult;

/// Per-project fairness ranking, recomputed at most once per TTL.
///
/// A stale ranking only changes which project is tried first; claiming a
/// task is still a conditional write.
pub struct PriorityCache {
    ttl: Duration,
    cached: Mutex<Option<(Instant, Arc<Vec<DispatchPriority>>)>>,
}

impl PriorityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// The cached ranking, refreshed from the store once it is older than
    /// the TTL. Concurrent callers wait for a single refresh.
    pub async fn get(&self, store: &dyn StateStore) -> EngineResult<Arc<Vec<DispatchPriority>>> {
        let mut cached = self.cached.lock().await;
        if let Some((at, ranking)) = cached.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(Arc::clone(ranking));
            }
        }

        let ranking = Arc::new(store.dispatch_priority().await?);
        tracing::debug!(projects = ranking.len(), "Dispatch priority refreshed");
        *cached = Some((Instant::now(), Arc::clone(&ranking)));
        Ok(ranking)
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
