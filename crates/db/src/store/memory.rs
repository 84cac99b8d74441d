use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use spool_core::script::TaskScript;
use spool_core::status::{
    DependState, DependType, JobState, LockState, TaskState, WorkerState,
};
use spool_core::types::{new_id, DbId, Timestamp};
use spool_core::worker::WorkerPing;
use tokio::sync::Mutex;

use super::StateStore;
use crate::error::{StoreError, StoreResult};
use crate::models::depend::{Depend, NewDepend, ResolvedDepends};
use crate::models::dispatch::{CandidateFilter, DispatchCandidate, DispatchPriority};
use crate::models::job::{Job, JobFilter, NewJob, TaskStateCounts};
use crate::models::task::{NewTask, Task};
use crate::models::task_error::{NewTaskError, TaskError, TaskErrorFilter};
use crate::models::worker::Worker;

const DEFAULT_LIST_LIMIT: i64 = 50;

/// In-process store with the same semantics as [`super::PgStore`].
///
/// All state sits behind one mutex and every trait call takes it exactly
/// once, so conditional updates are atomic the way a single SQL statement is.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<DbId, Job>,
    tasks: HashMap<DbId, Task>,
    scripts: HashMap<DbId, TaskScript>,
    depends: Vec<Depend>,
    workers: BTreeMap<String, Worker>,
    errors: Vec<TaskError>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn dispatched_per_job(&self) -> HashMap<DbId, i64> {
        let mut counts = HashMap::new();
        for task in self.tasks.values().filter(|t| t.state.is_dispatched()) {
            *counts.entry(task.job_id).or_insert(0) += 1;
        }
        counts
    }

    /// Move `Depend` tasks in scope to `Waiting` once nothing blocks them.
    fn release_tasks(&mut self, in_scope: impl Fn(&Task) -> bool) -> Vec<DbId> {
        let now = Utc::now();
        let jobs = &self.jobs;
        let mut released = Vec::new();
        for task in self.tasks.values_mut() {
            let job_clear = jobs.get(&task.job_id).is_some_and(|j| j.depend_count == 0);
            if in_scope(task)
                && task.state == TaskState::Depend
                && task.depend_count == 0
                && job_clear
            {
                task.state = TaskState::Waiting;
                task.time_modified = now;
                released.push(task.id);
            }
        }
        released.sort();
        released
    }
}

fn apply_task_side_effects(task: &mut Task, state: TaskState, now: Timestamp) {
    match state {
        TaskState::Waiting => {
            task.time_started = None;
            task.time_stopped = None;
            task.progress = 0;
        }
        TaskState::Running => {
            task.time_ping = Some(now);
            task.time_started = Some(now);
            task.time_stopped = None;
            task.run_count += 1;
            task.progress = 0;
        }
        TaskState::Success | TaskState::Failure | TaskState::Skipped => {
            task.time_stopped = Some(now);
            task.progress = 100;
        }
        TaskState::Queued | TaskState::Depend => {}
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    // ── Jobs ─────────────────────────────────────────────────────────────

    async fn insert_job(&self, input: &NewJob) -> StoreResult<Job> {
        let now = Utc::now();
        let job = Job {
            id: new_id(),
            project_id: input.project_id,
            name: input.name.clone(),
            state: JobState::InProgress,
            priority: input.priority,
            max_running_tasks: input.max_running_tasks,
            paused: input.paused,
            time_pause_expired: input.time_pause_expired,
            depend_count: 0,
            args: input.args.clone(),
            env: input.env.clone(),
            credentials: input.credentials.clone(),
            asset_total_count: 0,
            asset_error_count: 0,
            time_created: now,
            time_started: None,
            time_stopped: None,
            time_modified: now,
        };
        self.inner.lock().await.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: DbId) -> StoreResult<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| filter.project_id.is_none_or(|p| j.project_id == p))
            .filter(|j| filter.states.is_empty() || filter.states.contains(&j.state))
            .filter(|j| filter.name.as_deref().is_none_or(|n| j.name == n))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.time_created.cmp(&a.time_created).then(b.id.cmp(&a.id)));
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1) as usize;
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn set_job_state(
        &self,
        id: DbId,
        new_state: JobState,
        expected_old: Option<JobState>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.state == new_state || expected_old.is_some_and(|old| job.state != old) {
            return Ok(false);
        }
        let now = Utc::now();
        job.state = new_state;
        job.time_modified = now;
        job.time_stopped = if new_state == JobState::InProgress {
            None
        } else {
            Some(now)
        };
        Ok(true)
    }

    async fn mark_job_started(&self, id: DbId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.time_started.is_none() => {
                let now = Utc::now();
                job.time_started = Some(now);
                job.time_modified = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_job_paused(
        &self,
        id: DbId,
        paused: bool,
        expires: Option<Timestamp>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        job.paused = paused;
        job.time_pause_expired = if paused { expires } else { None };
        job.time_modified = Utc::now();
        Ok(true)
    }

    async fn resume_expired_pauses(&self, now: Timestamp) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut resumed = 0;
        for job in inner.jobs.values_mut() {
            if job.paused && job.time_pause_expired.is_some_and(|t| t < now) {
                job.paused = false;
                job.time_pause_expired = None;
                job.time_modified = Utc::now();
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    async fn set_job_credentials(&self, id: DbId, names: &[String]) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        job.credentials = names.to_vec();
        job.time_modified = Utc::now();
        Ok(true)
    }

    async fn increment_asset_counts(
        &self,
        job_id: DbId,
        task_id: Option<DbId>,
        total: i64,
        errors: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.asset_total_count += total;
            job.asset_error_count += errors;
        }
        if let Some(task) = task_id.and_then(|id| inner.tasks.get_mut(&id)) {
            task.asset_total_count += total;
            task.asset_error_count += errors;
        }
        Ok(())
    }

    async fn job_task_counts(&self, job_id: DbId) -> StoreResult<TaskStateCounts> {
        let inner = self.inner.lock().await;
        let mut counts = TaskStateCounts::default();
        for task in inner.tasks.values().filter(|t| t.job_id == job_id) {
            counts.add(task.state, 1);
        }
        Ok(counts)
    }

    async fn expired_jobs(&self, cutoff: Timestamp, limit: i64) -> StoreResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.state.is_finished() && j.time_modified < cutoff)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.time_modified);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn delete_job(&self, id: DbId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.remove(&id).is_none() {
            return Ok(false);
        }
        let task_ids: HashSet<DbId> = inner
            .tasks
            .values()
            .filter(|t| t.job_id == id)
            .map(|t| t.id)
            .collect();
        inner.tasks.retain(|_, t| t.job_id != id);
        inner.scripts.retain(|task_id, _| !task_ids.contains(task_id));
        inner
            .depends
            .retain(|d| d.depend_er_job_id != id && d.depend_on_job_id != id);
        inner.errors.retain(|e| e.job_id != id);
        for worker in inner.workers.values_mut() {
            if worker.task_id.is_some_and(|t| task_ids.contains(&t)) {
                worker.task_id = None;
            }
        }
        for task in inner.tasks.values_mut() {
            if task.parent_id.is_some_and(|p| task_ids.contains(&p)) {
                task.parent_id = None;
            }
        }
        Ok(true)
    }

    // ── Tasks ────────────────────────────────────────────────────────────

    async fn insert_task(&self, input: &NewTask) -> StoreResult<Task> {
        let mut inner = self.inner.lock().await;
        if !inner.jobs.contains_key(&input.job_id) {
            return Err(StoreError::NotFound {
                entity: "job",
                id: input.job_id,
            });
        }
        let now = Utc::now();
        let task = Task {
            id: new_id(),
            job_id: input.job_id,
            project_id: input.project_id,
            parent_id: input.parent_id,
            name: input.name.clone(),
            state: input.state,
            host_endpoint: None,
            exit_status: None,
            run_count: 0,
            progress: 0,
            status: None,
            depend_count: 0,
            credentials: Vec::new(),
            asset_total_count: input.script.asset_count(),
            asset_error_count: 0,
            time_created: now,
            time_started: None,
            time_stopped: None,
            time_ping: None,
            time_modified: now,
        };
        inner.scripts.insert(task.id, input.script.clone());
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: DbId) -> StoreResult<Option<Task>> {
        Ok(self.inner.lock().await.tasks.get(&id).cloned())
    }

    async fn get_task_script(&self, id: DbId) -> StoreResult<Option<TaskScript>> {
        Ok(self.inner.lock().await.scripts.get(&id).cloned())
    }

    async fn list_tasks(&self, job_id: DbId, state: Option<TaskState>) -> StoreResult<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.job_id == job_id && state.is_none_or(|s| t.state == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.time_created.cmp(&b.time_created).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn set_task_state(
        &self,
        id: DbId,
        new_state: TaskState,
        expected_old: Option<TaskState>,
    ) -> StoreResult<bool> {
        let sources = new_state.transition_sources(expected_old);
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !sources.contains(&task.state) {
            return Ok(false);
        }
        let now = Utc::now();
        task.state = new_state;
        task.time_modified = now;
        apply_task_side_effects(task, new_state, now);
        Ok(true)
    }

    async fn set_task_host(&self, id: DbId, endpoint: &str) -> StoreResult<()> {
        if let Some(task) = self.inner.lock().await.tasks.get_mut(&id) {
            task.host_endpoint = Some(endpoint.to_string());
        }
        Ok(())
    }

    async fn set_task_exit_status(&self, id: DbId, exit_status: i32) -> StoreResult<()> {
        if let Some(task) = self.inner.lock().await.tasks.get_mut(&id) {
            task.exit_status = Some(exit_status);
        }
        Ok(())
    }

    async fn set_task_progress(&self, id: DbId, progress: i32) -> StoreResult<()> {
        if let Some(task) = self.inner.lock().await.tasks.get_mut(&id) {
            task.progress = progress.clamp(0, 100);
        }
        Ok(())
    }

    async fn set_task_status(&self, id: DbId, status: &str) -> StoreResult<()> {
        if let Some(task) = self.inner.lock().await.tasks.get_mut(&id) {
            task.status = Some(status.to_string());
        }
        Ok(())
    }

    async fn set_task_credentials(&self, id: DbId, names: &[String]) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(false);
        };
        task.credentials = names.to_vec();
        task.time_modified = Utc::now();
        Ok(true)
    }

    async fn update_task_ping(&self, id: DbId, endpoint: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.tasks.get_mut(&id) {
            Some(task)
                if task.state == TaskState::Running
                    && task.host_endpoint.as_deref() == Some(endpoint) =>
            {
                task.time_ping = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn orphan_tasks(&self, cutoff: Timestamp, limit: i64) -> StoreResult<Vec<Task>> {
        let inner = self.inner.lock().await;
        let last_seen = |t: &Task| t.time_ping.unwrap_or(t.time_modified);
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.state.is_dispatched() && last_seen(t) < cutoff)
            .cloned()
            .collect();
        tasks.sort_by_key(last_seen);
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn tasks_of_jobs_in_state(
        &self,
        job_state: JobState,
        task_state: TaskState,
        limit: i64,
    ) -> StoreResult<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| {
                t.state == task_state
                    && inner.jobs.get(&t.job_id).is_some_and(|j| j.state == job_state)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.time_modified);
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn dispatch_candidates(
        &self,
        filter: CandidateFilter,
        limit: i64,
    ) -> StoreResult<Vec<DispatchCandidate>> {
        let inner = self.inner.lock().await;
        let dispatched = inner.dispatched_per_job();
        let mut candidates: Vec<DispatchCandidate> = inner
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Waiting && t.depend_count == 0)
            .filter_map(|t| {
                let job = inner.jobs.get(&t.job_id)?;
                let running = dispatched.get(&job.id).copied().unwrap_or(0);
                let admitted = job.state == JobState::InProgress
                    && job.depend_count == 0
                    && !job.paused
                    && i64::from(job.max_running_tasks) > running;
                let selected = match filter {
                    CandidateFilter::MinPriority(p) => job.priority >= p,
                    CandidateFilter::Project(id) => t.project_id == id,
                };
                (admitted && selected).then(|| DispatchCandidate {
                    task_id: t.id,
                    job_id: t.job_id,
                    project_id: t.project_id,
                    priority: job.priority,
                    time_created: t.time_created,
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.time_created.cmp(&b.time_created))
                .then(a.task_id.cmp(&b.task_id))
        });
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn dispatch_priority(&self) -> StoreResult<Vec<DispatchPriority>> {
        let inner = self.inner.lock().await;
        let mut running: HashMap<DbId, i64> = HashMap::new();
        let mut waiting: HashSet<DbId> = HashSet::new();
        for task in inner.tasks.values() {
            let Some(job) = inner.jobs.get(&task.job_id) else {
                continue;
            };
            if job.state != JobState::InProgress || job.paused {
                continue;
            }
            let count = running.entry(job.project_id).or_insert(0);
            if task.state.is_dispatched() {
                *count += 1;
            }
            if task.state == TaskState::Waiting {
                waiting.insert(job.project_id);
            }
        }
        let mut ranking: Vec<DispatchPriority> = running
            .into_iter()
            .filter(|(project_id, _)| waiting.contains(project_id))
            .map(|(project_id, running_count)| DispatchPriority {
                project_id,
                running_count,
            })
            .collect();
        ranking.sort_by(|a, b| {
            a.running_count
                .cmp(&b.running_count)
                .then(a.project_id.cmp(&b.project_id))
        });
        Ok(ranking)
    }

    // ── Depends ──────────────────────────────────────────────────────────

    async fn insert_depend(&self, input: &NewDepend) -> StoreResult<Option<Depend>> {
        let mut inner = self.inner.lock().await;
        for job_id in [input.depend_er_job_id, input.depend_on_job_id] {
            if !inner.jobs.contains_key(&job_id) {
                return Err(StoreError::NotFound { entity: "job", id: job_id });
            }
        }
        for task_id in [input.depend_er_task_id, input.depend_on_task_id].into_iter().flatten() {
            if !inner.tasks.contains_key(&task_id) {
                return Err(StoreError::NotFound { entity: "task", id: task_id });
            }
        }

        let satisfied = match input.depend_type {
            DependType::JobOnJob => inner
                .jobs
                .get(&input.depend_on_id())
                .is_some_and(|j| j.state == JobState::Success),
            DependType::TaskOnTask => inner
                .tasks
                .get(&input.depend_on_id())
                .is_some_and(|t| t.state.is_success()),
        };
        if satisfied {
            return Ok(None);
        }

        let er_id = input.depend_er_id();
        match input.depend_type {
            DependType::JobOnJob => {
                if let Some(job) = inner.jobs.get_mut(&er_id) {
                    job.depend_count += 1;
                }
            }
            DependType::TaskOnTask => {
                if let Some(task) = inner.tasks.get_mut(&er_id) {
                    task.depend_count += 1;
                }
            }
        }

        let now = Utc::now();
        let depend = Depend {
            id: new_id(),
            depend_type: input.depend_type,
            state: DependState::Active,
            depend_er_job_id: input.depend_er_job_id,
            depend_on_job_id: input.depend_on_job_id,
            depend_er_task_id: input.depend_er_task_id,
            depend_on_task_id: input.depend_on_task_id,
            time_created: now,
            time_modified: now,
        };
        inner.depends.push(depend.clone());
        Ok(Some(depend))
    }

    async fn insert_job_depends(
        &self,
        job_id: DbId,
        depend_on_job_ids: &[DbId],
    ) -> StoreResult<Vec<Depend>> {
        let mut inner = self.inner.lock().await;
        for id in std::iter::once(&job_id).chain(depend_on_job_ids) {
            if !inner.jobs.contains_key(id) {
                return Err(StoreError::NotFound { entity: "job", id: *id });
            }
        }

        let pending: BTreeSet<DbId> = depend_on_job_ids
            .iter()
            .copied()
            .filter(|id| inner.jobs.get(id).is_some_and(|j| j.state != JobState::Success))
            .collect();

        let now = Utc::now();
        let depends: Vec<Depend> = pending
            .into_iter()
            .map(|on| Depend {
                id: new_id(),
                depend_type: DependType::JobOnJob,
                state: DependState::Active,
                depend_er_job_id: job_id,
                depend_on_job_id: on,
                depend_er_task_id: None,
                depend_on_task_id: None,
                time_created: now,
                time_modified: now,
            })
            .collect();
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.depend_count += depends.len() as i32;
        }
        inner.depends.extend(depends.iter().cloned());
        Ok(depends)
    }

    async fn active_depend_on_ids(
        &self,
        depend_type: DependType,
        depend_er_id: DbId,
    ) -> StoreResult<Vec<DbId>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .depends
            .iter()
            .filter(|d| {
                d.depend_type == depend_type
                    && d.state == DependState::Active
                    && d.depend_er_id() == depend_er_id
            })
            .map(Depend::depend_on_id)
            .collect())
    }

    async fn list_depends(&self, job_id: DbId) -> StoreResult<Vec<Depend>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .depends
            .iter()
            .filter(|d| d.depend_er_job_id == job_id || d.depend_on_job_id == job_id)
            .cloned()
            .collect())
    }

    async fn resolve_depends(
        &self,
        depend_type: DependType,
        depend_on_id: DbId,
    ) -> StoreResult<ResolvedDepends> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let mut blocked: HashMap<DbId, i32> = HashMap::new();
        for depend in inner.depends.iter_mut().filter(|d| {
            d.depend_type == depend_type
                && d.state == DependState::Active
                && d.depend_on_id() == depend_on_id
        }) {
            depend.state = DependState::Inactive;
            depend.time_modified = now;
            *blocked.entry(depend.depend_er_id()).or_insert(0) += 1;
        }
        let resolved = blocked.values().map(|n| *n as u64).sum();

        for (er_id, n) in &blocked {
            let counter = match depend_type {
                DependType::JobOnJob => inner.jobs.get_mut(er_id).map(|j| &mut j.depend_count),
                DependType::TaskOnTask => inner.tasks.get_mut(er_id).map(|t| &mut t.depend_count),
            };
            if let Some(count) = counter {
                *count = (*count - n).max(0);
            }
        }

        let released_tasks = if blocked.is_empty() {
            Vec::new()
        } else {
            match depend_type {
                DependType::JobOnJob => inner.release_tasks(|t| blocked.contains_key(&t.job_id)),
                DependType::TaskOnTask => inner.release_tasks(|t| blocked.contains_key(&t.id)),
            }
        };

        Ok(ResolvedDepends {
            resolved,
            released_tasks,
        })
    }

    async fn release_job_tasks(&self, job_id: DbId) -> StoreResult<Vec<DbId>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.release_tasks(|t| t.job_id == job_id))
    }

    // ── Workers ──────────────────────────────────────────────────────────

    async fn ping_worker(&self, ping: &WorkerPing) -> StoreResult<Worker> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let worker = inner
            .workers
            .entry(ping.endpoint.clone())
            .and_modify(|w| {
                w.state = WorkerState::Up;
                if ping.version.is_some() {
                    w.version = ping.version.clone();
                }
                w.ping_count += 1;
                w.time_ping = now;
            })
            .or_insert_with(|| Worker {
                id: new_id(),
                endpoint: ping.endpoint.clone(),
                state: WorkerState::Up,
                lock_state: LockState::Unlocked,
                task_id: None,
                version: ping.version.clone(),
                ping_count: 1,
                dispatch_count: 0,
                time_ping: now,
                time_last_dispatch: None,
                time_created: now,
            });
        Ok(worker.clone())
    }

    async fn get_worker(&self, endpoint: &str) -> StoreResult<Option<Worker>> {
        Ok(self.inner.lock().await.workers.get(endpoint).cloned())
    }

    async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
        Ok(self.inner.lock().await.workers.values().cloned().collect())
    }

    async fn set_worker_lock(&self, endpoint: &str, lock: LockState) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(worker) = inner.workers.get_mut(endpoint) else {
            return Ok(false);
        };
        worker.lock_state = lock;
        Ok(true)
    }

    async fn assign_worker_task(&self, endpoint: &str, task_id: DbId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.workers.get_mut(endpoint) {
            Some(worker) if worker.task_id.is_none() => {
                worker.task_id = Some(task_id);
                worker.time_last_dispatch = Some(Utc::now());
                worker.dispatch_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_worker_task(&self, task_id: DbId) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut cleared = 0;
        for worker in inner.workers.values_mut() {
            if worker.task_id == Some(task_id) {
                worker.task_id = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn mark_workers_down(&self, cutoff: Timestamp) -> StoreResult<Vec<Worker>> {
        let mut inner = self.inner.lock().await;
        let mut down = Vec::new();
        for worker in inner.workers.values_mut() {
            if worker.state == WorkerState::Up && worker.time_ping < cutoff {
                worker.state = WorkerState::Down;
                down.push(worker.clone());
            }
        }
        Ok(down)
    }

    async fn remove_down_workers(&self, cutoff: Timestamp) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.workers.len();
        inner
            .workers
            .retain(|_, w| !(w.state == WorkerState::Down && w.time_ping < cutoff));
        Ok((before - inner.workers.len()) as u64)
    }

    // ── Task errors ──────────────────────────────────────────────────────

    async fn insert_task_errors(&self, errors: &[NewTaskError]) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for e in errors {
            inner.errors.push(TaskError {
                id: new_id(),
                task_id: e.task_id,
                job_id: e.job_id,
                asset_id: e.asset_id.clone(),
                path: e.path.clone(),
                message: e.message.clone(),
                processor: e.processor.clone(),
                fatal: e.fatal,
                phase: e.phase.clone(),
                time_created: now,
            });
        }
        Ok(errors.len() as u64)
    }

    async fn list_task_errors(&self, filter: &TaskErrorFilter) -> StoreResult<Vec<TaskError>> {
        let inner = self.inner.lock().await;
        let limit = filter.limit.unwrap_or(100).max(1) as usize;
        Ok(inner
            .errors
            .iter()
            .filter(|e| filter.job_id.is_none_or(|j| e.job_id == j))
            .filter(|e| filter.task_id.is_none_or(|t| e.task_id == t))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn clear_task_errors(&self, task_id: DbId) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.errors.len();
        inner.errors.retain(|e| e.task_id != task_id);
        Ok((before - inner.errors.len()) as u64)
    }
}
