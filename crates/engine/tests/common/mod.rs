#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use spool_core::job_spec::JobSpec;
use spool_core::protocol::{AssetSpec, TaskEvent, TaskEventKind, TaskStoppedEvent};
use spool_core::script::{AssetDoc, TaskScript};
use spool_core::types::DbId;
use spool_core::worker::WorkerPing;
use spool_db::models::job::Job;
use spool_db::models::task::Task;
use spool_db::{MemoryStore, StateStore};
use spool_engine::ports::{
    AssetFailure, AssetStore, CreatedAssets, CredentialIssuer, IndexOutcome, KillRequest,
    LogStorage, PassthroughPipeline, PipelineResolver, WorkerClient,
};
use spool_engine::{Collaborators, Engine, EngineConfig, EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Fake collaborators
// ---------------------------------------------------------------------------

/// Asset storage keyed by URI. URIs containing `bad` are refused.
#[derive(Default)]
pub struct FakeAssets {
    pub indexed: Mutex<Vec<String>>,
}

#[async_trait]
impl AssetStore for FakeAssets {
    async fn create_assets(&self, _project_id: DbId, specs: &[AssetSpec]) -> EngineResult<CreatedAssets> {
        let mut out = CreatedAssets::default();
        for spec in specs {
            if spec.uri.contains("bad") {
                out.failed.push(AssetFailure {
                    asset_id: None,
                    path: Some(spec.uri.clone()),
                    message: "unsupported file".into(),
                });
            } else {
                out.created.push(format!("asset:{}", spec.uri));
            }
        }
        Ok(out)
    }

    async fn get_assets(&self, _project_id: DbId, ids: &[String]) -> EngineResult<Vec<AssetDoc>> {
        Ok(ids
            .iter()
            .map(|id| AssetDoc {
                id: id.clone(),
                document: json!({ "source": { "path": id } }),
            })
            .collect())
    }

    async fn index_assets(
        &self,
        _project_id: DbId,
        assets: &BTreeMap<String, Value>,
    ) -> EngineResult<IndexOutcome> {
        let mut out = IndexOutcome::default();
        for id in assets.keys() {
            if id.contains("bad") {
                out.failed.push(AssetFailure {
                    asset_id: Some(id.clone()),
                    path: None,
                    message: "mapping conflict".into(),
                });
            } else {
                self.indexed.lock().unwrap().push(id.clone());
                out.indexed += 1;
            }
        }
        Ok(out)
    }
}

pub struct FakeCredentials;

#[async_trait]
impl CredentialIssuer for FakeCredentials {
    async fn signing_key(&self, project_id: DbId, role: &str) -> EngineResult<String> {
        Ok(format!("key-{project_id}-{role}"))
    }
}

/// Log storage that can be switched to failing.
#[derive(Default)]
pub struct FakeLogs {
    pub fail: AtomicBool,
}

#[async_trait]
impl LogStorage for FakeLogs {
    async fn signed_url(&self, path: &str) -> EngineResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::collaborator("logs", "storage unavailable"));
        }
        Ok(format!("https://logs.test/{path}?sig=abc"))
    }
}

/// Records kill requests. When `fail` is set every request errors, which
/// exercises the local fallback.
#[derive(Default)]
pub struct FakeWorkerClient {
    pub fail: AtomicBool,
    pub kills: Mutex<Vec<(String, KillRequest)>>,
}

impl FakeWorkerClient {
    pub fn kill_count(&self) -> usize {
        self.kills.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerClient for FakeWorkerClient {
    async fn kill_task(&self, endpoint: &str, request: &KillRequest) -> EngineResult<()> {
        self.kills
            .lock()
            .unwrap()
            .push((endpoint.to_string(), request.clone()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::collaborator("worker", "connection refused"));
        }
        Ok(())
    }
}

/// Resolves like [`PassthroughPipeline`], but each call signals `entered`
/// and then waits for `open`. Lets a test act while a job is half created.
#[derive(Default)]
pub struct GatedPipeline {
    pub entered: Notify,
    pub open: Notify,
}

#[async_trait]
impl PipelineResolver for GatedPipeline {
    async fn resolve(&self, project_id: DbId, modules: &[String]) -> EngineResult<Vec<Value>> {
        self.entered.notify_one();
        self.open.notified().await;
        PassthroughPipeline.resolve(project_id, modules).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub assets: Arc<FakeAssets>,
    pub logs: Arc<FakeLogs>,
    pub client: Arc<FakeWorkerClient>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    harness_with_pipeline(config, Arc::new(PassthroughPipeline))
}

pub fn harness_with_pipeline(config: EngineConfig, pipeline: Arc<dyn PipelineResolver>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let assets = Arc::new(FakeAssets::default());
    let logs = Arc::new(FakeLogs::default());
    let client = Arc::new(FakeWorkerClient::default());

    let engine = Engine::new(
        store.clone(),
        Collaborators {
            pipeline,
            assets: assets.clone(),
            credentials: Arc::new(FakeCredentials),
            logs: logs.clone(),
            worker_client: client.clone(),
        },
        config,
    );

    Harness {
        engine,
        store,
        assets,
        logs,
        client,
    }
}

pub fn script(name: &str) -> TaskScript {
    TaskScript {
        name: name.into(),
        ..Default::default()
    }
}

impl Harness {
    pub async fn worker(&self, endpoint: &str) {
        self.engine
            .workers
            .ping(&WorkerPing {
                endpoint: endpoint.to_string(),
                version: None,
                task_id: None,
            })
            .await
            .unwrap();
    }

    pub async fn submit(&self, project_id: DbId, spec: JobSpec) -> Job {
        self.engine.jobs.create_job(project_id, spec).await.unwrap()
    }

    pub async fn task(&self, id: DbId) -> Task {
        self.store.get_task(id).await.unwrap().unwrap()
    }

    pub async fn job(&self, id: DbId) -> Job {
        self.store.get_job(id).await.unwrap().unwrap()
    }

    pub async fn event(&self, task: &Task, event: TaskEventKind) {
        self.engine
            .dispatcher
            .handle_event(TaskEvent {
                task_id: task.id,
                job_id: task.job_id,
                event,
            })
            .await
            .unwrap();
    }

    /// Poll, start and stop one task with `exit_status` on `endpoint`.
    pub async fn run_next(&self, endpoint: &str, exit_status: i32) -> Option<Task> {
        let dispatched = self.engine.queue.get_next(endpoint).await.unwrap()?;
        let task = self.task(dispatched.id).await;
        self.event(&task, TaskEventKind::Started).await;
        self.event(&task, TaskEventKind::Stopped(TaskStoppedEvent::exited(exit_status)))
            .await;
        Some(self.task(task.id).await)
    }
}
