//! Worker entity models.

use serde::Serialize;
use sqlx::FromRow;
use spool_core::status::{LockState, WorkerState};
use spool_core::types::{DbId, Timestamp};

/// A row from the `workers` table.
///
/// Ping and dispatch bookkeeping is kept per worker so any number of engine
/// instances can share it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Worker {
    pub id: DbId,
    pub endpoint: String,
    #[sqlx(try_from = "i16")]
    pub state: WorkerState,
    #[sqlx(try_from = "i16")]
    pub lock_state: LockState,
    pub task_id: Option<DbId>,
    pub version: Option<String>,
    pub ping_count: i64,
    pub dispatch_count: i64,
    pub time_ping: Timestamp,
    pub time_last_dispatch: Option<Timestamp>,
    pub time_created: Timestamp,
}

impl Worker {
    /// Whether the worker may be handed a task right now.
    pub fn is_available(&self) -> bool {
        self.lock_state == LockState::Unlocked
            && self.state == WorkerState::Up
            && self.task_id.is_none()
    }
}
