//! Repository for the `depends` table and the depend counters it drives.

use sqlx::{PgConnection, PgPool};
use spool_core::status::{DependState, DependType, JobState, StatusId, TaskState};
use spool_core::types::{new_id, DbId};

use crate::models::depend::{Depend, NewDepend, ResolvedDepends};

/// Column list for `depends` queries.
const COLUMNS: &str = "\
    id, depend_type, state, depend_er_job_id, depend_on_job_id, \
    depend_er_task_id, depend_on_task_id, time_created, time_modified";

pub struct DependRepo;

impl DependRepo {
    /// Insert an Active depend and bump the blocked entity's depend count,
    /// in one transaction.
    ///
    /// The blocking row is share-locked first, so its state cannot change
    /// until the edge is committed. Returns `None` when it already
    /// succeeded; a resolution that ran earlier will never run again.
    pub async fn insert(pool: &PgPool, input: &NewDepend) -> Result<Option<Depend>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let lock = match input.depend_type {
            DependType::JobOnJob => "SELECT state FROM jobs WHERE id = $1 FOR SHARE",
            DependType::TaskOnTask => "SELECT state FROM tasks WHERE id = $1 FOR SHARE",
        };
        let (state,): (StatusId,) = sqlx::query_as(lock)
            .bind(input.depend_on_id())
            .fetch_one(&mut *tx)
            .await?;
        let satisfied = match input.depend_type {
            DependType::JobOnJob => state == JobState::Success.id(),
            DependType::TaskOnTask => TaskState::try_from(state).is_ok_and(TaskState::is_success),
        };
        if satisfied {
            tx.rollback().await?;
            return Ok(None);
        }

        let query = format!(
            "INSERT INTO depends (id, depend_type, state, depend_er_job_id, depend_on_job_id, \
                 depend_er_task_id, depend_on_task_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        let depend = sqlx::query_as::<_, Depend>(&query)
            .bind(new_id())
            .bind(input.depend_type.id())
            .bind(DependState::Active.id())
            .bind(input.depend_er_job_id)
            .bind(input.depend_on_job_id)
            .bind(input.depend_er_task_id)
            .bind(input.depend_on_task_id)
            .fetch_one(&mut *tx)
            .await?;

        let counter = match input.depend_type {
            DependType::JobOnJob => "UPDATE jobs SET depend_count = depend_count + 1 WHERE id = $1",
            DependType::TaskOnTask => "UPDATE tasks SET depend_count = depend_count + 1 WHERE id = $1",
        };
        sqlx::query(counter)
            .bind(input.depend_er_id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(depend))
    }

    /// Make `job_id` wait on every listed job that has not succeeded, in one
    /// transaction. The upstream rows stay share-locked until commit, so
    /// none of them can succeed between the check and the insert.
    pub async fn insert_job_depends(
        pool: &PgPool,
        job_id: DbId,
        depend_on_job_ids: &[DbId],
    ) -> Result<Vec<Depend>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let pending: Vec<(DbId,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE id = ANY($1) AND state <> $2 ORDER BY id FOR SHARE",
        )
        .bind(depend_on_job_ids)
        .bind(JobState::Success.id())
        .fetch_all(&mut *tx)
        .await?;
        if pending.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let query = format!(
            "INSERT INTO depends (id, depend_type, state, depend_er_job_id, depend_on_job_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        let mut depends = Vec::with_capacity(pending.len());
        for (on,) in pending {
            let depend = sqlx::query_as::<_, Depend>(&query)
                .bind(new_id())
                .bind(DependType::JobOnJob.id())
                .bind(DependState::Active.id())
                .bind(job_id)
                .bind(on)
                .fetch_one(&mut *tx)
                .await?;
            depends.push(depend);
        }

        sqlx::query("UPDATE jobs SET depend_count = depend_count + $2 WHERE id = $1")
            .bind(job_id)
            .bind(depends.len() as i32)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(depends)
    }

    /// Ids the given entity actively depends on.
    pub async fn list_active_depend_on_ids(
        pool: &PgPool,
        depend_type: DependType,
        depend_er_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        let query = match depend_type {
            DependType::JobOnJob => {
                "SELECT depend_on_job_id FROM depends \
                 WHERE depend_type = $1 AND state = $2 AND depend_er_job_id = $3"
            }
            DependType::TaskOnTask => {
                "SELECT depend_on_task_id FROM depends \
                 WHERE depend_type = $1 AND state = $2 AND depend_er_task_id = $3"
            }
        };
        let rows: Vec<(Option<DbId>,)> = sqlx::query_as(query)
            .bind(depend_type.id())
            .bind(DependState::Active.id())
            .bind(depend_er_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().filter_map(|(id,)| id).collect())
    }

    /// Every depend touching the job, on either side.
    pub async fn list_by_job(pool: &PgPool, job_id: DbId) -> Result<Vec<Depend>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM depends \
             WHERE depend_er_job_id = $1 OR depend_on_job_id = $1 \
             ORDER BY time_created ASC"
        );
        sqlx::query_as::<_, Depend>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Flip every Active depend on `depend_on_id` to Inactive.
    ///
    /// Decrements the depend counts of the blocked entities, then moves any
    /// of their tasks still in `Depend` to `Waiting` once neither the task
    /// nor its job has outstanding depends. Runs as one transaction.
    pub async fn resolve(
        pool: &PgPool,
        depend_type: DependType,
        depend_on_id: DbId,
    ) -> Result<ResolvedDepends, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let (on_column, er_column, counter_table) = match depend_type {
            DependType::JobOnJob => ("depend_on_job_id", "depend_er_job_id", "jobs"),
            DependType::TaskOnTask => ("depend_on_task_id", "depend_er_task_id", "tasks"),
        };

        let query = format!(
            "WITH resolved AS ( \
                 UPDATE depends SET state = $3, time_modified = NOW() \
                 WHERE depend_type = $1 AND state = $2 AND {on_column} = $4 \
                 RETURNING {er_column} AS er_id \
             ), counts AS ( \
                 SELECT er_id, COUNT(*)::INTEGER AS n FROM resolved GROUP BY er_id \
             ) \
             UPDATE {counter_table} c \
             SET depend_count = GREATEST(c.depend_count - counts.n, 0) \
             FROM counts WHERE c.id = counts.er_id \
             RETURNING c.id, counts.n"
        );
        let decremented: Vec<(DbId, i32)> = sqlx::query_as(&query)
            .bind(depend_type.id())
            .bind(DependState::Active.id())
            .bind(DependState::Inactive.id())
            .bind(depend_on_id)
            .fetch_all(&mut *tx)
            .await?;

        let resolved = decremented.iter().map(|(_, n)| *n as u64).sum();
        let blocked: Vec<DbId> = decremented.into_iter().map(|(id, _)| id).collect();

        let released_tasks = if blocked.is_empty() {
            Vec::new()
        } else {
            let scope = match depend_type {
                DependType::JobOnJob => "t.job_id = ANY($3)",
                DependType::TaskOnTask => "t.id = ANY($3)",
            };
            release_tasks(&mut *tx, scope, &blocked).await?
        };

        tx.commit().await?;
        Ok(ResolvedDepends {
            resolved,
            released_tasks,
        })
    }

    /// Move the job's `Depend` tasks to `Waiting` when neither the task nor
    /// the job has outstanding depends.
    pub async fn release_job_tasks(pool: &PgPool, job_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        release_tasks(&mut conn, "t.job_id = ANY($3)", &[job_id]).await
    }
}

/// Release unblocked `Depend` tasks matching `scope`, a predicate on `t`
/// that binds `ids` as `$3`.
async fn release_tasks(
    conn: &mut PgConnection,
    scope: &str,
    ids: &[DbId],
) -> Result<Vec<DbId>, sqlx::Error> {
    let query = format!(
        "UPDATE tasks t SET state = $1, time_modified = NOW() \
         FROM jobs j \
         WHERE j.id = t.job_id AND {scope} \
           AND t.state = $2 AND t.depend_count = 0 AND j.depend_count = 0 \
         RETURNING t.id"
    );
    let rows: Vec<(DbId,)> = sqlx::query_as(&query)
        .bind(TaskState::Waiting.id())
        .bind(TaskState::Depend.id())
        .bind(ids)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
