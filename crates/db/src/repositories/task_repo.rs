//! Repository for the `tasks` table.
//!
//! State changes go through [`TaskRepo::set_state`], a single conditional
//! `UPDATE` so concurrent dispatchers can never both claim a task.

use sqlx::types::Json;
use sqlx::PgPool;
use spool_core::script::TaskScript;
use spool_core::status::{JobState, StatusId, TaskState};
use spool_core::types::{new_id, DbId, Timestamp};

use crate::models::dispatch::{CandidateFilter, DispatchCandidate, DispatchPriority};
use crate::models::task::{NewTask, Task};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, job_id, project_id, parent_id, name, state, host_endpoint, exit_status, \
    run_count, progress, status, depend_count, credentials, \
    asset_total_count, asset_error_count, \
    time_created, time_started, time_stopped, time_ping, time_modified";

const DISPATCHED: [StatusId; 2] = [TaskState::Queued as StatusId, TaskState::Running as StatusId];

/// Extra assignments applied together with a move into the given state.
fn state_side_effects(state: TaskState) -> &'static str {
    match state {
        TaskState::Waiting => ", time_started = NULL, time_stopped = NULL, progress = 0",
        TaskState::Running => {
            ", time_ping = NOW(), time_started = NOW(), time_stopped = NULL, \
             run_count = run_count + 1, progress = 0"
        }
        TaskState::Success | TaskState::Failure | TaskState::Skipped => {
            ", time_stopped = NOW(), progress = 100"
        }
        TaskState::Queued | TaskState::Depend => "",
    }
}

pub struct TaskRepo;

impl TaskRepo {
    pub async fn insert(pool: &PgPool, input: &NewTask) -> Result<Task, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (id, job_id, project_id, parent_id, name, state, script, \
                 asset_total_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(new_id())
            .bind(input.job_id)
            .bind(input.project_id)
            .bind(input.parent_id)
            .bind(&input.name)
            .bind(input.state.id())
            .bind(Json(&input.script))
            .bind(input.script.asset_count())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_script(pool: &PgPool, id: DbId) -> Result<Option<TaskScript>, sqlx::Error> {
        let row: Option<(Json<TaskScript>,)> =
            sqlx::query_as("SELECT script FROM tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(Json(script),)| script))
    }

    pub async fn list_by_job(
        pool: &PgPool,
        job_id: DbId,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE job_id = $1 AND ($2::SMALLINT IS NULL OR state = $2) \
             ORDER BY time_created ASC"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(job_id)
            .bind(state.map(TaskState::id))
            .fetch_all(pool)
            .await
    }

    /// Conditionally move a task to `new_state`.
    ///
    /// The row matches only if its current state is one of `sources` (see
    /// [`TaskState::transition_sources`]). Returns `true` if a row changed.
    pub async fn set_state(
        pool: &PgPool,
        id: DbId,
        new_state: TaskState,
        expected_old: Option<TaskState>,
    ) -> Result<bool, sqlx::Error> {
        let sources: Vec<StatusId> = new_state
            .transition_sources(expected_old)
            .into_iter()
            .map(TaskState::id)
            .collect();
        if sources.is_empty() {
            return Ok(false);
        }

        let query = format!(
            "UPDATE tasks SET state = $2, time_modified = NOW(){} \
             WHERE id = $1 AND state = ANY($3)",
            state_side_effects(new_state)
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(new_state.id())
            .bind(&sources)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_host(pool: &PgPool, id: DbId, endpoint: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET host_endpoint = $2 WHERE id = $1")
            .bind(id)
            .bind(endpoint)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_exit_status(pool: &PgPool, id: DbId, exit_status: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET exit_status = $2 WHERE id = $1")
            .bind(id)
            .bind(exit_status)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_progress(pool: &PgPool, id: DbId, progress: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET progress = $2 WHERE id = $1")
            .bind(id)
            .bind(progress.clamp(0, 100))
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(pool: &PgPool, id: DbId, status: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_credentials(pool: &PgPool, id: DbId, names: &[String]) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE tasks SET credentials = $2, time_modified = NOW() WHERE id = $1")
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
            "UPDATE tasks \
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

    /// Advance the heartbeat of a task running on `endpoint`.
    pub async fn update_ping(pool: &PgPool, id: DbId, endpoint: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET time_ping = NOW() \
             WHERE id = $1 AND state = $2 AND host_endpoint = $3",
        )
        .bind(id)
        .bind(TaskState::Running.id())
        .bind(endpoint)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Dispatched tasks whose last heartbeat is older than `cutoff`.
    ///
    /// Queued tasks have not pinged yet, so their last modification stands in.
    pub async fn list_orphans(
        pool: &PgPool,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE state = ANY($1) AND COALESCE(time_ping, time_modified) < $2 \
             ORDER BY COALESCE(time_ping, time_modified) ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(&DISPATCHED[..])
            .bind(cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Tasks in `task_state` whose job is in `job_state`, oldest change
    /// first.
    pub async fn list_by_job_state(
        pool: &PgPool,
        job_state: JobState,
        task_state: TaskState,
        limit: i64,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE state = $2 AND job_id IN (SELECT id FROM jobs WHERE state = $1) \
             ORDER BY time_modified ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(job_state.id())
            .bind(task_state.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Waiting tasks that may be dispatched now, highest priority first.
    ///
    /// A task is a candidate only if neither it nor its job has active
    /// incoming depends, the job is in progress and not paused, and the job
    /// has fewer dispatched tasks than its `max_running_tasks`.
    pub async fn list_candidates(
        pool: &PgPool,
        filter: CandidateFilter,
        limit: i64,
    ) -> Result<Vec<DispatchCandidate>, sqlx::Error> {
        let (min_priority, project_id) = match filter {
            CandidateFilter::MinPriority(p) => (Some(p), None),
            CandidateFilter::Project(id) => (None, Some(id)),
        };
        sqlx::query_as::<_, DispatchCandidate>(
            "SELECT t.id AS task_id, t.job_id, t.project_id, j.priority, t.time_created \
             FROM tasks t \
             JOIN jobs j ON j.id = t.job_id \
             WHERE t.state = $1 AND t.depend_count = 0 \
               AND j.state = $2 AND j.depend_count = 0 AND NOT j.paused \
               AND j.max_running_tasks > ( \
                   SELECT COUNT(*) FROM tasks r \
                   WHERE r.job_id = j.id AND r.state = ANY($3) \
               ) \
               AND ($4::INTEGER IS NULL OR j.priority >= $4) \
               AND ($5::UUID IS NULL OR t.project_id = $5) \
             ORDER BY j.priority DESC, t.time_created ASC \
             LIMIT $6",
        )
        .bind(TaskState::Waiting.id())
        .bind(JobState::InProgress.id())
        .bind(&DISPATCHED[..])
        .bind(min_priority)
        .bind(project_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Projects with runnable work, fewest dispatched tasks first.
    pub async fn dispatch_priority(pool: &PgPool) -> Result<Vec<DispatchPriority>, sqlx::Error> {
        sqlx::query_as::<_, DispatchPriority>(
            "SELECT j.project_id, \
                    COUNT(t.id) FILTER (WHERE t.state = ANY($1)) AS running_count \
             FROM jobs j \
             JOIN tasks t ON t.job_id = j.id \
             WHERE j.state = $2 AND NOT j.paused \
             GROUP BY j.project_id \
             HAVING COUNT(t.id) FILTER (WHERE t.state = $3) > 0 \
             ORDER BY running_count ASC, j.project_id ASC",
        )
        .bind(&DISPATCHED[..])
        .bind(JobState::InProgress.id())
        .bind(TaskState::Waiting.id())
        .fetch_all(pool)
        .await
    }
}
