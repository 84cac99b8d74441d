//! Repository for the `jobs` table.

use sqlx::types::Json;
use sqlx::PgPool;
use spool_core::status::{JobState, StatusId, TaskState};
use spool_core::types::{new_id, DbId, Timestamp};

use crate::models::job::{Job, JobFilter, NewJob, TaskStateCounts};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, project_id, name, state, priority, max_running_tasks, \
    paused, time_pause_expired, depend_count, args, env, credentials, \
    asset_total_count, asset_error_count, \
    time_created, time_started, time_stopped, time_modified";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 500;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

pub struct JobRepo;

impl JobRepo {
    pub async fn insert(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, project_id, name, state, priority, max_running_tasks, \
                 paused, time_pause_expired, args, env, credentials) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(new_id())
            .bind(input.project_id)
            .bind(&input.name)
            .bind(JobState::InProgress.id())
            .bind(input.priority)
            .bind(input.max_running_tasks)
            .bind(input.paused)
            .bind(input.time_pause_expired)
            .bind(Json(&input.args))
            .bind(Json(&input.env))
            .bind(&input.credentials)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs newest first. Empty filter fields match everything.
    pub async fn list(pool: &PgPool, filter: &JobFilter) -> Result<Vec<Job>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);
        let states: Vec<StatusId> = filter.states.iter().map(|s| s.id()).collect();

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE ($1::UUID IS NULL OR project_id = $1) \
               AND (cardinality($2::SMALLINT[]) = 0 OR state = ANY($2)) \
               AND ($3::TEXT IS NULL OR name = $3) \
             ORDER BY time_created DESC \
             LIMIT $4 OFFSET $5"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(filter.project_id)
            .bind(&states)
            .bind(filter.name.as_deref())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Conditionally move a job to `new_state`.
    ///
    /// Matches only when the job is not already in `new_state` and, if
    /// given, is currently in `expected_old`. Returns `true` if a row changed.
    pub async fn set_state(
        pool: &PgPool,
        id: DbId,
        new_state: JobState,
        expected_old: Option<JobState>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET state = $2, time_modified = NOW(), \
                 time_stopped = CASE WHEN $2 = $4 THEN NULL ELSE NOW() END \
             WHERE id = $1 AND state <> $2 \
               AND ($3::SMALLINT IS NULL OR state = $3)",
        )
        .bind(id)
        .bind(new_state.id())
        .bind(expected_old.map(JobState::id))
        .bind(JobState::InProgress.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the first time any task of the job started.
    pub async fn mark_started(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET time_started = NOW(), time_modified = NOW() \
             WHERE id = $1 AND time_started IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_paused(
        pool: &PgPool,
        id: DbId,
        paused: bool,
        expires: Option<Timestamp>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET paused = $2, time_pause_expired = $3, time_modified = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(paused)
        .bind(if paused { expires } else { None })
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Un-pause every job whose pause expiry is before `now`.
    pub async fn resume_expired_pauses(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET paused = FALSE, time_pause_expired = NULL, time_modified = NOW() \
             WHERE paused AND time_pause_expired IS NOT NULL AND time_pause_expired < $1",
        )
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_credentials(
        pool: &PgPool,
        id: DbId,
        names: &[String],
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET credentials = $2, time_modified = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(names)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_asset_counts(
        pool: &PgPool,
        id: DbId,
        total: i64,
        errors: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs \
             SET asset_total_count = asset_total_count + $2, \
                 asset_error_count = asset_error_count + $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(total)
        .bind(errors)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Aggregate the job's tasks by state.
    pub async fn task_counts(pool: &PgPool, id: DbId) -> Result<TaskStateCounts, sqlx::Error> {
        let rows: Vec<(StatusId, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM tasks WHERE job_id = $1 GROUP BY state",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        let mut counts = TaskStateCounts::default();
        for (state, n) in rows {
            let state = TaskState::try_from(state)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            counts.add(state, n);
        }
        Ok(counts)
    }

    /// Finished jobs last modified before `cutoff`, oldest first.
    pub async fn list_expired(
        pool: &PgPool,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE state <> $1 AND time_modified < $2 \
             ORDER BY time_modified ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobState::InProgress.id())
            .bind(cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Delete a job. Tasks, depends and task errors cascade.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
