//! Repository for the append-only `task_errors` table.

use sqlx::PgPool;
use spool_core::types::{new_id, DbId};

use crate::models::task_error::{NewTaskError, TaskError, TaskErrorFilter};

/// Column list for `task_errors` queries.
const COLUMNS: &str = "\
    id, task_id, job_id, asset_id, path, message, processor, fatal, phase, time_created";

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

pub struct TaskErrorRepo;

impl TaskErrorRepo {
    /// Append a batch of errors in one transaction.
    pub async fn insert_batch(pool: &PgPool, errors: &[NewTaskError]) -> Result<u64, sqlx::Error> {
        if errors.is_empty() {
            return Ok(0);
        }
        let mut tx = pool.begin().await?;
        for e in errors {
            sqlx::query(
                "INSERT INTO task_errors (id, task_id, job_id, asset_id, path, message, \
                     processor, fatal, phase) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(new_id())
            .bind(e.task_id)
            .bind(e.job_id)
            .bind(e.asset_id.as_deref())
            .bind(e.path.as_deref())
            .bind(&e.message)
            .bind(e.processor.as_deref())
            .bind(e.fatal)
            .bind(&e.phase)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(errors.len() as u64)
    }

    pub async fn list(pool: &PgPool, filter: &TaskErrorFilter) -> Result<Vec<TaskError>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_errors \
             WHERE ($1::UUID IS NULL OR job_id = $1) \
               AND ($2::UUID IS NULL OR task_id = $2) \
             ORDER BY time_created ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, TaskError>(&query)
            .bind(filter.job_id)
            .bind(filter.task_id)
            .bind(filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }

    pub async fn delete_by_task(pool: &PgPool, task_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM task_errors WHERE task_id = $1")
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
