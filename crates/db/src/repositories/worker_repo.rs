//! Repository for the `workers` table.

use sqlx::PgPool;
use spool_core::status::{LockState, WorkerState};
use spool_core::types::{new_id, DbId, Timestamp};
use spool_core::worker::WorkerPing;

use crate::models::worker::Worker;

/// Column list for `workers` queries.
const COLUMNS: &str = "\
    id, endpoint, state, lock_state, task_id, version, ping_count, dispatch_count, \
    time_ping, time_last_dispatch, time_created";

pub struct WorkerRepo;

impl WorkerRepo {
    // ── Heartbeats ───────────────────────────────────────────────────────

    /// Register a worker on its first ping, or refresh it (upsert on endpoint).
    ///
    /// A ping always brings the worker back `Up`; lock state and task
    /// assignment are left alone.
    pub async fn ping(pool: &PgPool, input: &WorkerPing) -> Result<Worker, sqlx::Error> {
        let query = format!(
            "INSERT INTO workers (id, endpoint, state, lock_state, version, ping_count, time_ping) \
             VALUES ($1, $2, $3, $4, $5, 1, NOW()) \
             ON CONFLICT (endpoint) DO UPDATE SET \
                state = EXCLUDED.state, \
                version = COALESCE(EXCLUDED.version, workers.version), \
                ping_count = workers.ping_count + 1, \
                time_ping = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(new_id())
            .bind(&input.endpoint)
            .bind(WorkerState::Up.id())
            .bind(LockState::Unlocked.id())
            .bind(input.version.as_deref())
            .fetch_one(pool)
            .await
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub async fn find_by_endpoint(pool: &PgPool, endpoint: &str) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE endpoint = $1");
        sqlx::query_as::<_, Worker>(&query)
            .bind(endpoint)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers ORDER BY endpoint");
        sqlx::query_as::<_, Worker>(&query).fetch_all(pool).await
    }

    // ── Assignment ───────────────────────────────────────────────────────

    pub async fn set_lock(pool: &PgPool, endpoint: &str, lock: LockState) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE workers SET lock_state = $2 WHERE endpoint = $1")
            .bind(endpoint)
            .bind(lock.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bind a task to an idle worker. Fails if the worker already holds one.
    pub async fn assign_task(pool: &PgPool, endpoint: &str, task_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workers \
             SET task_id = $2, time_last_dispatch = NOW(), dispatch_count = dispatch_count + 1 \
             WHERE endpoint = $1 AND task_id IS NULL",
        )
        .bind(endpoint)
        .bind(task_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release the task from whichever worker holds it.
    pub async fn clear_task(pool: &PgPool, task_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE workers SET task_id = NULL WHERE task_id = $1")
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    /// Mark `Up` workers silent since `cutoff` as `Down`, returning them.
    pub async fn mark_down(pool: &PgPool, cutoff: Timestamp) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!(
            "UPDATE workers SET state = $1 \
             WHERE state = $2 AND time_ping < $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(WorkerState::Down.id())
            .bind(WorkerState::Up.id())
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    /// Delete `Down` workers silent since `cutoff`.
    pub async fn delete_down(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workers WHERE state = $1 AND time_ping < $2")
            .bind(WorkerState::Down.id())
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
