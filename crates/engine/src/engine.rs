use std::sync::Arc;

use spool_db::StateStore;
use spool_events::EventBus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::depend::DependService;
use crate::dispatch::{BackgroundKills, DispatchQueueManager, DispatcherService};
use crate::jobs::JobService;
use crate::maintenance::MaintenanceSweeper;
use crate::metrics::DispatchMetrics;
use crate::ports::{AssetStore, CredentialIssuer, LogStorage, PipelineResolver, WorkerClient};
use crate::workers::WorkerRegistry;

/// External services the engine calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub pipeline: Arc<dyn PipelineResolver>,
    pub assets: Arc<dyn AssetStore>,
    pub credentials: Arc<dyn CredentialIssuer>,
    pub logs: Arc<dyn LogStorage>,
    pub worker_client: Arc<dyn WorkerClient>,
}

/// Every engine service, wired over one store and one event bus.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn StateStore>,
    pub bus: Arc<EventBus>,
    pub jobs: JobService,
    pub depends: DependService,
    pub queue: Arc<DispatchQueueManager>,
    pub dispatcher: Arc<DispatcherService>,
    pub workers: WorkerRegistry,
    pub sweeper: Arc<MaintenanceSweeper>,
    pub metrics: Arc<DispatchMetrics>,
    pub config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn StateStore>, collaborators: Collaborators, config: EngineConfig) -> Self {
        let bus = Arc::new(EventBus::default());
        let metrics = Arc::new(DispatchMetrics::new());

        let depends = DependService::new(Arc::clone(&store));
        let jobs = JobService::new(
            Arc::clone(&store),
            depends.clone(),
            Arc::clone(&bus),
            collaborators.pipeline,
        );
        let kills = BackgroundKills::new(
            collaborators.worker_client,
            jobs.clone(),
            Arc::clone(&metrics),
            config.kill_timeout,
        );
        let queue = Arc::new(DispatchQueueManager::new(
            Arc::clone(&store),
            jobs.clone(),
            Arc::clone(&collaborators.assets),
            collaborators.credentials,
            collaborators.logs,
            Arc::clone(&metrics),
            &config,
        ));
        let dispatcher = Arc::new(DispatcherService::new(
            Arc::clone(&store),
            jobs.clone(),
            collaborators.assets,
            kills,
            Arc::clone(&bus),
            config.retry,
            Arc::clone(&metrics),
        ));
        let sweeper = Arc::new(MaintenanceSweeper::new(
            Arc::clone(&store),
            jobs.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&metrics),
            config.clone(),
        ));

        Self {
            workers: WorkerRegistry::new(Arc::clone(&store)),
            store,
            bus,
            jobs,
            depends,
            queue,
            dispatcher,
            sweeper,
            metrics,
            config,
        }
    }

    /// Spawn the cancelled-job listener and the maintenance sweeper.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let listener = self.dispatcher.spawn_event_listener(cancel.clone());

        let sweeper = Arc::clone(&self.sweeper);
        let token = cancel.clone();
        let sweep = tokio::spawn(async move { sweeper.run(token).await });

        vec![listener, sweep]
    }

    /// Wait for in-flight kill requests after the background tasks stop.
    pub async fn shutdown(&self) {
        self.dispatcher.kills().shutdown().await;
    }
}
