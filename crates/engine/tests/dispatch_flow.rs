mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use spool_core::dispatch::{ENV_API_KEY, ENV_CREDENTIALS, ENV_LOG_URL, ENV_TASK_ID};
use spool_core::error::CoreError;
use spool_core::job_spec::JobSpec;
use spool_core::priority::JobPriority;
use spool_core::protocol::{
    AssetSpec, BatchIndexEvent, TaskErrorEvent, TaskEventKind, TaskExpandEvent, TaskStoppedEvent,
};
use spool_core::status::{JobState, LockState, TaskState};
use spool_core::types::new_id;
use spool_db::models::depend::NewDepend;
use spool_db::models::task_error::TaskErrorFilter;
use spool_db::StateStore;
use spool_engine::{EngineConfig, EngineError};
use spool_events::EngineEvent;
use tokio_util::sync::CancellationToken;

use common::{harness, harness_with, harness_with_pipeline, script, GatedPipeline};

const W1: &str = "http://worker-1:5000";
const W2: &str = "http://worker-2:5000";

fn fresh_ranking() -> EngineConfig {
    EngineConfig {
        dispatch_priority_ttl: Duration::ZERO,
        ..Default::default()
    }
}

// -- Polling --

#[tokio::test]
async fn unknown_worker_gets_nothing() {
    let h = harness();
    h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;

    assert!(h.engine.queue.get_next(W1).await.unwrap().is_none());
}

#[tokio::test]
async fn locked_worker_gets_nothing() {
    let h = harness();
    h.worker(W1).await;
    h.engine.workers.set_lock(W1, LockState::Locked).await.unwrap();
    h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;

    assert!(h.engine.queue.get_next(W1).await.unwrap().is_none());

    h.engine.workers.set_lock(W1, LockState::Unlocked).await.unwrap();
    assert!(h.engine.queue.get_next(W1).await.unwrap().is_some());
}

#[tokio::test]
async fn busy_worker_gets_nothing() {
    let h = harness();
    h.worker(W1).await;
    h.submit(new_id(), JobSpec::new("job", vec![script("a"), script("b")])).await;

    assert!(h.engine.queue.get_next(W1).await.unwrap().is_some());
    assert!(h.engine.queue.get_next(W1).await.unwrap().is_none());
}

#[tokio::test]
async fn dispatched_task_is_materialized() {
    let h = harness();
    h.worker(W1).await;
    let mut s = script("ingest");
    s.asset_ids = Some(vec!["a1".into(), "a2".into()]);
    let mut spec = JobSpec::new("job", vec![s]);
    spec.credentials = vec!["aws".into()];
    spec.args = serde_json::from_value(json!({"quality": "high"})).unwrap();
    let project = new_id();
    h.submit(project, spec).await;

    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();

    assert_eq!(dispatched.state, TaskState::Queued);
    assert_eq!(dispatched.host_endpoint, W1);
    assert_eq!(dispatched.script.assets.as_ref().map(Vec::len), Some(2));
    assert_eq!(dispatched.args.get("quality"), Some(&json!("high")));
    assert_eq!(dispatched.env[ENV_TASK_ID], dispatched.id.to_string());
    assert_eq!(dispatched.env[ENV_API_KEY], format!("key-{project}-task"));
    assert_eq!(dispatched.env[ENV_CREDENTIALS], "aws");
    assert!(dispatched.env[ENV_LOG_URL].contains(&format!("{}-1.log", dispatched.id)));
    assert_eq!(dispatched.log_file, dispatched.env[ENV_LOG_URL]);

    let worker = h.store.get_worker(W1).await.unwrap().unwrap();
    assert_eq!(worker.task_id, Some(dispatched.id));
}

#[tokio::test]
async fn materialization_failure_returns_task_to_waiting() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    h.logs.fail.store(true, Ordering::SeqCst);

    let err = h.engine.queue.get_next(W1).await.unwrap_err();
    assert_matches!(err, EngineError::Collaborator { service: "logs", .. });

    let task = &h.store.list_tasks(job.id, None).await.unwrap()[0];
    assert_eq!(task.state, TaskState::Waiting);
    let worker = h.store.get_worker(W1).await.unwrap().unwrap();
    assert_eq!(worker.task_id, None);

    h.logs.fail.store(false, Ordering::SeqCst);
    assert!(h.engine.queue.get_next(W1).await.unwrap().is_some());
}

#[tokio::test]
async fn concurrent_polls_dispatch_each_task_once() {
    let h = harness();
    let scripts = (0..5).map(|i| script(&format!("t{i}"))).collect();
    h.submit(new_id(), JobSpec::new("job", scripts)).await;

    let endpoints: Vec<String> = (0..20).map(|i| format!("http://worker-{i}:5000")).collect();
    for endpoint in &endpoints {
        h.worker(endpoint).await;
    }

    let queue = Arc::clone(&h.engine.queue);
    let polls = endpoints.into_iter().map(|endpoint| {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.get_next(&endpoint).await.unwrap() })
    });
    let mut dispatched = Vec::new();
    for poll in polls {
        if let Some(task) = poll.await.unwrap() {
            dispatched.push(task.id);
        }
    }

    let unique: HashSet<_> = dispatched.iter().collect();
    assert_eq!(dispatched.len(), 5);
    assert_eq!(unique.len(), 5);
}

// -- Ordering --

#[tokio::test]
async fn least_busy_project_is_served_first() {
    let h = harness_with(fresh_ranking());
    h.worker(W1).await;
    h.worker(W2).await;
    let busy = new_id();
    let idle = new_id();
    h.submit(busy, JobSpec::new("busy", vec![script("b1"), script("b2")])).await;

    let first = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    assert_eq!(first.project_id, busy);

    h.submit(idle, JobSpec::new("idle", vec![script("i1")])).await;
    let second = h.engine.queue.get_next(W2).await.unwrap().unwrap();
    assert_eq!(second.project_id, idle);
}

#[tokio::test]
async fn interactive_job_jumps_the_queue() {
    let h = harness_with(fresh_ranking());
    h.worker(W1).await;
    h.submit(new_id(), JobSpec::new("bulk", vec![script("b1"), script("b2")])).await;

    let mut spec = JobSpec::new("preview", vec![script("p1")]);
    spec.priority = JobPriority::INTERACTIVE;
    let interactive = h.submit(new_id(), spec).await;

    let first = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    assert_eq!(first.job_id, interactive.id);
}

#[tokio::test]
async fn higher_priority_job_goes_first_within_a_project() {
    let h = harness();
    h.worker(W1).await;
    let project = new_id();
    h.submit(project, JobSpec::new("standard", vec![script("s")])).await;
    let mut spec = JobSpec::new("urgent", vec![script("u")]);
    spec.priority = 50;
    let urgent = h.submit(project, spec).await;

    let first = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    assert_eq!(first.job_id, urgent.id);
}

// -- Admission --

#[tokio::test]
async fn zero_max_running_tasks_never_dispatches() {
    let h = harness();
    h.worker(W1).await;
    let mut spec = JobSpec::new("held", vec![script("a")]);
    spec.max_running_tasks = 0;
    h.submit(new_id(), spec).await;

    assert!(h.engine.queue.get_next(W1).await.unwrap().is_none());
}

#[tokio::test]
async fn max_running_tasks_caps_concurrency() {
    let h = harness();
    h.worker(W1).await;
    h.worker(W2).await;
    let mut spec = JobSpec::new("capped", vec![script("a"), script("b")]);
    spec.max_running_tasks = 1;
    h.submit(new_id(), spec).await;

    assert!(h.engine.queue.get_next(W1).await.unwrap().is_some());
    assert!(h.engine.queue.get_next(W2).await.unwrap().is_none());
}

#[tokio::test]
async fn paused_job_is_held_until_resumed() {
    let h = harness();
    h.worker(W1).await;
    let mut spec = JobSpec::new("paused", vec![script("a")]);
    spec.paused = true;
    let job = h.submit(new_id(), spec).await;

    assert!(h.engine.queue.get_next(W1).await.unwrap().is_none());
    h.engine.jobs.resume_job(job.id).await.unwrap();
    assert!(h.engine.queue.get_next(W1).await.unwrap().is_some());
}

// -- Lifecycle --

#[tokio::test]
async fn job_succeeds_when_every_task_succeeds() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("a"), script("b")])).await;

    assert_eq!(h.run_next(W1, 0).await.unwrap().state, TaskState::Success);
    assert_eq!(h.job(job.id).await.state, JobState::InProgress);
    assert_eq!(h.run_next(W1, 0).await.unwrap().state, TaskState::Success);

    let job = h.job(job.id).await;
    assert_eq!(job.state, JobState::Success);
    assert!(job.time_started.is_some());
}

#[tokio::test]
async fn hard_failure_retries_then_fails_with_one_error() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("flaky")])).await;

    for run in 1..=3 {
        let task = h.run_next(W1, 9).await.unwrap();
        assert_eq!(task.state, TaskState::Waiting, "run {run} should retry");
        assert_eq!(task.run_count, run);
    }
    let task = h.run_next(W1, 9).await.unwrap();
    assert_eq!(task.state, TaskState::Failure);
    assert_eq!(task.run_count, 4);
    assert_eq!(task.exit_status, Some(9));

    let errors = h
        .engine
        .jobs
        .list_task_errors(&TaskErrorFilter {
            task_id: Some(task.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].fatal);
    assert!(errors[0].message.starts_with("Hard Task failure, exit 9"));

    assert_eq!(h.job(job.id).await.state, JobState::Failure);
    let metrics = h.engine.metrics.snapshot();
    assert_eq!(metrics.auto_retries, 3);
    assert_eq!(metrics.hard_failures, 1);
}

#[tokio::test]
async fn other_exit_codes_fail_without_retry() {
    let h = harness();
    h.worker(W1).await;
    h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;

    let task = h.run_next(W1, 1).await.unwrap();
    assert_eq!(task.state, TaskState::Failure);
    assert_eq!(task.run_count, 1);
}

#[tokio::test]
async fn stop_before_start_is_applied() {
    let h = harness();
    h.worker(W1).await;
    h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;

    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let task = h.task(dispatched.id).await;
    h.event(&task, TaskEventKind::Stopped(TaskStoppedEvent::exited(0))).await;

    assert_eq!(h.task(task.id).await.state, TaskState::Success);
    let worker = h.store.get_worker(W1).await.unwrap().unwrap();
    assert_eq!(worker.task_id, None);
}

#[tokio::test]
async fn duplicate_stop_is_a_no_op() {
    let h = harness();
    h.worker(W1).await;
    h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;

    let task = h.run_next(W1, 1).await.unwrap();
    let changed = h
        .engine
        .dispatcher
        .stop_task(&task, &TaskStoppedEvent::exited(1))
        .await
        .unwrap();
    assert!(!changed);

    let errors = h
        .engine
        .jobs
        .list_task_errors(&TaskErrorFilter::default())
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn event_for_wrong_job_is_rejected() {
    let h = harness();
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    let task = &h.store.list_tasks(job.id, None).await.unwrap()[0];

    let err = h
        .engine
        .dispatcher
        .handle_event(spool_core::protocol::TaskEvent {
            task_id: task.id,
            job_id: new_id(),
            event: TaskEventKind::Started,
        })
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

// -- Dependencies --

#[tokio::test]
async fn child_runs_only_after_parent_succeeds() {
    let h = harness();
    h.worker(W1).await;
    let mut parent = script("parent");
    parent.children = vec![script("child")];
    let job = h.submit(new_id(), JobSpec::new("tree", vec![parent])).await;

    let first = h.run_next(W1, 0).await.unwrap();
    assert_eq!(first.name, "parent");

    let second = h.run_next(W1, 0).await.unwrap();
    assert_eq!(second.name, "child");
    assert_eq!(h.job(job.id).await.state, JobState::Success);
}

#[tokio::test]
async fn failed_parent_keeps_child_blocked() {
    let h = harness();
    h.worker(W1).await;
    let mut parent = script("parent");
    parent.children = vec![script("child")];
    let job = h.submit(new_id(), JobSpec::new("tree", vec![parent])).await;

    assert_eq!(h.run_next(W1, 1).await.unwrap().state, TaskState::Failure);
    assert!(h.engine.queue.get_next(W1).await.unwrap().is_none());

    let tasks = h.store.list_tasks(job.id, Some(TaskState::Depend)).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(h.job(job.id).await.state, JobState::InProgress);
}

#[tokio::test]
async fn downstream_job_waits_for_upstream_success() {
    let h = harness();
    h.worker(W1).await;
    let project = new_id();
    let upstream = h.submit(project, JobSpec::new("upstream", vec![script("u")])).await;
    let mut spec = JobSpec::new("downstream", vec![script("d")]);
    spec.depend_on_job_ids = vec![upstream.id];
    let downstream = h.submit(project, spec).await;

    let downstream_task = &h.store.list_tasks(downstream.id, None).await.unwrap()[0];
    assert_eq!(downstream_task.state, TaskState::Depend);

    let first = h.run_next(W1, 0).await.unwrap();
    assert_eq!(first.job_id, upstream.id);
    let second = h.run_next(W1, 0).await.unwrap();
    assert_eq!(second.job_id, downstream.id);
}

#[tokio::test]
async fn child_retried_after_hard_failure_completes_the_job() {
    let h = harness();
    h.worker(W1).await;
    let mut parent = script("parent");
    parent.children = vec![script("child")];
    let job = h.submit(new_id(), JobSpec::new("tree", vec![parent])).await;

    let child = h
        .store
        .list_tasks(job.id, None)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.name == "child")
        .unwrap();
    assert_eq!(child.state, TaskState::Depend);
    assert_eq!(child.depend_count, 1);

    let parent = h.run_next(W1, 0).await.unwrap();
    assert_eq!(parent.state, TaskState::Success);
    let child = h.task(child.id).await;
    assert_eq!(child.state, TaskState::Waiting);
    assert_eq!(child.depend_count, 0);

    let retried = h.run_next(W1, 9).await.unwrap();
    assert_eq!(retried.id, child.id);
    assert_eq!(retried.state, TaskState::Waiting);
    assert_eq!(h.job(job.id).await.state, JobState::InProgress);

    let done = h.run_next(W1, 0).await.unwrap();
    assert_eq!(done.id, child.id);
    assert_eq!(done.state, TaskState::Success);
    assert_eq!(done.run_count, 2);
    assert_eq!(h.job(job.id).await.state, JobState::Success);
}

#[tokio::test]
async fn upstream_succeeding_mid_creation_releases_downstream() {
    let gate = Arc::new(GatedPipeline::default());
    let h = harness_with_pipeline(EngineConfig::default(), gate.clone());
    h.worker(W1).await;
    let project = new_id();
    let upstream = h.submit(project, JobSpec::new("upstream", vec![script("u")])).await;

    let mut d = script("d");
    d.modules = vec!["import".into()];
    let mut spec = JobSpec::new("downstream", vec![d]);
    spec.depend_on_job_ids = vec![upstream.id];
    let engine = h.engine.clone();
    let creating = tokio::spawn(async move { engine.jobs.create_job(project, spec).await });

    // Downstream is between its upstream check and its task inserts.
    gate.entered.notified().await;
    let finished = h.run_next(W1, 0).await.unwrap();
    assert_eq!(finished.job_id, upstream.id);
    assert_eq!(h.job(upstream.id).await.state, JobState::Success);
    gate.open.notify_one();

    let downstream = creating.await.unwrap().unwrap();
    assert_eq!(downstream.depend_count, 0);
    let tasks = h.store.list_tasks(downstream.id, None).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::Waiting);

    let next = h.run_next(W1, 0).await.unwrap();
    assert_eq!(next.job_id, downstream.id);
    assert_eq!(h.job(downstream.id).await.state, JobState::Success);
}

#[tokio::test]
async fn downstream_still_waits_on_upstream_left_running_mid_creation() {
    let gate = Arc::new(GatedPipeline::default());
    let h = harness_with_pipeline(EngineConfig::default(), gate.clone());
    h.worker(W1).await;
    let project = new_id();
    let first = h.submit(project, JobSpec::new("first", vec![script("f")])).await;
    let second = h.submit(project, JobSpec::new("second", vec![script("s")])).await;

    let mut d = script("d");
    d.modules = vec!["import".into()];
    let mut spec = JobSpec::new("downstream", vec![d]);
    spec.depend_on_job_ids = vec![first.id, second.id];
    let engine = h.engine.clone();
    let creating = tokio::spawn(async move { engine.jobs.create_job(project, spec).await });

    gate.entered.notified().await;
    let finished = h.run_next(W1, 0).await.unwrap();
    assert_eq!(h.job(finished.job_id).await.state, JobState::Success);
    gate.open.notify_one();

    let downstream = creating.await.unwrap().unwrap();
    assert_eq!(downstream.depend_count, 1);
    let task = &h.store.list_tasks(downstream.id, None).await.unwrap()[0];
    assert_eq!(task.state, TaskState::Depend);

    let other = h.run_next(W1, 0).await.unwrap();
    assert_ne!(other.job_id, finished.job_id);
    assert_ne!(other.job_id, downstream.id);
    assert_eq!(h.task(task.id).await.state, TaskState::Waiting);
    assert_eq!(h.run_next(W1, 0).await.unwrap().job_id, downstream.id);
}

#[tokio::test]
async fn depend_closing_a_cycle_is_rejected() {
    let h = harness();
    let project = new_id();
    let a = h.submit(project, JobSpec::new("a", vec![script("a")])).await;
    let mut spec = JobSpec::new("b", vec![script("b")]);
    spec.depend_on_job_ids = vec![a.id];
    let b = h.submit(project, spec).await;

    let err = h
        .engine
        .depends
        .create_depend(&NewDepend::job_on_job(a.id, b.id))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::DependencyCycle(_)));
    assert_eq!(h.job(a.id).await.depend_count, 0);
}

// -- Worker events --

#[tokio::test]
async fn expand_creates_task_for_created_assets() {
    let h = harness();
    h.worker(W1).await;
    let mut s = script("import");
    s.execute = vec![json!({"op": "inspect"})];
    let job = h.submit(new_id(), JobSpec::new("import", vec![s])).await;

    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let parent = h.task(dispatched.id).await;
    h.event(&parent, TaskEventKind::Started).await;
    h.event(
        &parent,
        TaskEventKind::Expand(TaskExpandEvent {
            assets: vec![
                AssetSpec { uri: "s3://b/one.jpg".into(), attrs: Default::default() },
                AssetSpec { uri: "s3://b/bad.raw".into(), attrs: Default::default() },
            ],
        }),
    )
    .await;

    let tasks = h.store.list_tasks(job.id, None).await.unwrap();
    let child = tasks.iter().find(|t| t.parent_id == Some(parent.id)).unwrap();
    assert_eq!(child.state, TaskState::Waiting);
    assert_eq!(child.asset_total_count, 1);

    let child_script = h.store.get_task_script(child.id).await.unwrap().unwrap();
    assert_eq!(child_script.asset_ids, Some(vec!["asset:s3://b/one.jpg".to_string()]));
    assert_eq!(child_script.execute, vec![json!({"op": "inspect"})]);

    let errors = h
        .engine
        .jobs
        .list_task_errors(&TaskErrorFilter {
            job_id: Some(job.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].phase, "expand");
}

#[tokio::test]
async fn expand_with_no_created_assets_adds_no_task() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("import", vec![script("import")])).await;
    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let parent = h.task(dispatched.id).await;

    let created = h
        .engine
        .dispatcher
        .expand(
            &parent,
            &TaskExpandEvent {
                assets: vec![AssetSpec { uri: "bad".into(), attrs: Default::default() }],
            },
        )
        .await
        .unwrap();

    assert!(created.is_none());
    assert_eq!(h.store.list_tasks(job.id, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn error_progress_and_index_events_update_the_task() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let task = h.task(dispatched.id).await;
    h.event(&task, TaskEventKind::Started).await;

    h.event(
        &task,
        TaskEventKind::Error(TaskErrorEvent {
            asset_id: Some("a1".into()),
            path: Some("/in/a1.jpg".into()),
            message: "decode failed".into(),
            processor: Some("image".into()),
            fatal: false,
            phase: "execute".into(),
        }),
    )
    .await;
    h.event(
        &task,
        TaskEventKind::Progress(spool_core::protocol::TaskProgressEvent { progress: 40 }),
    )
    .await;
    h.event(
        &task,
        TaskEventKind::Index(BatchIndexEvent {
            assets: [("ok".to_string(), json!({})), ("bad".to_string(), json!({}))]
                .into_iter()
                .collect(),
        }),
    )
    .await;

    let task = h.task(task.id).await;
    assert_eq!(task.progress, 40);
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.asset_error_count, 2);
    assert_eq!(*h.assets.indexed.lock().unwrap(), vec!["ok".to_string()]);

    let job = h.job(job.id).await;
    assert_eq!(job.asset_error_count, 2);
}

// -- Administrative --

#[tokio::test]
async fn retry_of_dispatched_task_goes_through_the_worker() {
    let h = harness();
    h.worker(W1).await;
    h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let task = h.task(dispatched.id).await;
    h.event(&task, TaskEventKind::Started).await;

    assert!(h.engine.dispatcher.retry_task(task.id).await.unwrap());
    h.engine.dispatcher.kills().drain().await;

    let kills = h.client.kills.lock().unwrap().clone();
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].0, W1);
    assert_eq!(kills[0].1.new_state, TaskState::Waiting);
    // The worker has not confirmed yet.
    assert_eq!(h.task(task.id).await.state, TaskState::Running);
}

#[tokio::test]
async fn unreachable_worker_falls_back_to_local_state() {
    let h = harness();
    h.worker(W1).await;
    h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let task = h.task(dispatched.id).await;
    h.event(&task, TaskEventKind::Started).await;
    h.client.fail.store(true, Ordering::SeqCst);

    assert!(h.engine.dispatcher.skip_task(task.id).await.unwrap());
    h.engine.dispatcher.kills().drain().await;

    assert_eq!(h.task(task.id).await.state, TaskState::Skipped);
    assert_eq!(h.engine.metrics.snapshot().kill_fallbacks, 1);
    let worker = h.store.get_worker(W1).await.unwrap().unwrap();
    assert_eq!(worker.task_id, None);
}

#[tokio::test]
async fn retrying_a_task_of_a_finished_job_restarts_it() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    let task = h.run_next(W1, 1).await.unwrap();
    assert_eq!(h.job(job.id).await.state, JobState::Failure);

    assert!(h.engine.dispatcher.retry_task(task.id).await.unwrap());

    assert_eq!(h.task(task.id).await.state, TaskState::Waiting);
    assert_eq!(h.job(job.id).await.state, JobState::InProgress);
    assert_eq!(h.run_next(W1, 0).await.unwrap().state, TaskState::Success);
    assert_eq!(h.job(job.id).await.state, JobState::Success);
}

#[tokio::test]
async fn skipping_a_waiting_task_releases_its_children() {
    let h = harness();
    h.worker(W1).await;
    let mut parent = script("parent");
    parent.children = vec![script("child")];
    let job = h.submit(new_id(), JobSpec::new("tree", vec![parent])).await;
    let parent = h
        .store
        .list_tasks(job.id, None)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.name == "parent")
        .unwrap();

    assert!(h.engine.dispatcher.skip_task(parent.id).await.unwrap());

    let next = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    assert_eq!(next.name, "child");
}

#[tokio::test]
async fn cancelling_a_job_kills_its_running_tasks() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let task = h.task(dispatched.id).await;
    h.event(&task, TaskEventKind::Started).await;

    let cancel = CancellationToken::new();
    let listener = h.engine.dispatcher.spawn_event_listener(cancel.clone());

    assert!(h.engine.jobs.cancel_job(job.id).await.unwrap());

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.client.kill_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    h.engine.dispatcher.kills().drain().await;

    let kills = h.client.kills.lock().unwrap().clone();
    assert_eq!(kills[0].1.task_id, task.id);
    assert_eq!(kills[0].1.new_state, TaskState::Waiting);
    assert_eq!(h.job(job.id).await.state, JobState::Cancelled);

    cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn cancellation_lost_to_a_lagging_listener_still_kills() {
    let h = harness();
    h.worker(W1).await;
    let job = h.submit(new_id(), JobSpec::new("job", vec![script("a")])).await;
    let dispatched = h.engine.queue.get_next(W1).await.unwrap().unwrap();
    let task = h.task(dispatched.id).await;
    h.event(&task, TaskEventKind::Started).await;

    let cancel = CancellationToken::new();
    let listener = h.engine.dispatcher.spawn_event_listener(cancel.clone());

    // Bury the cancellation under more events than the bus holds.
    assert!(h.engine.jobs.cancel_job(job.id).await.unwrap());
    for _ in 0..1100 {
        h.engine.bus.publish(EngineEvent::task_state_changed(
            new_id(),
            new_id(),
            Some(TaskState::Queued),
            TaskState::Running,
        ));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.client.kill_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    h.engine.dispatcher.kills().drain().await;

    let kills = h.client.kills.lock().unwrap().clone();
    assert!(kills.iter().all(|(endpoint, request)| endpoint == W1 && request.task_id == task.id));
    assert_eq!(kills[0].1.new_state, TaskState::Waiting);

    cancel.cancel();
    listener.await.unwrap();
}
