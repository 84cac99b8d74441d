#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use spool_api::clients::{HmacCredentialIssuer, InlineAssetStore, SignedLogStorage, Signer};
use spool_api::config::ServerConfig;
use spool_api::extract::PROJECT_ID_HEADER;
use spool_api::router::build_app_router;
use spool_api::state::AppState;
use spool_core::types::DbId;
use spool_db::MemoryStore;
use spool_engine::ports::{KillRequest, PassthroughPipeline, WorkerClient};
use spool_engine::{Collaborators, Engine, EngineConfig, EngineError, EngineResult};
use tower::ServiceExt;

pub const WORKER: &str = "http://worker-1:5000";

/// Workers that never answer, so kills fall back to local state changes.
pub struct UnreachableWorkers;

#[async_trait]
impl WorkerClient for UnreachableWorkers {
    async fn kill_task(&self, _endpoint: &str, _request: &KillRequest) -> EngineResult<()> {
        Err(EngineError::collaborator("worker", "connection refused"))
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_body_bytes: 64 * 1024,
        shutdown_timeout_secs: 5,
        database_url: None,
        worker_kill_path: "/kill".to_string(),
        asset_service_url: None,
        pipeline_service_url: None,
        signing_secret: "test-secret".to_string(),
        log_storage_url: "http://logs.test/spool".to_string(),
        credential_ttl_secs: 60,
    }
}

pub struct TestApp {
    pub router: Router,
    pub engine: Engine,
}

/// The full router on an in-process store with in-process collaborators.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let signer = Signer::new(&config.signing_secret, Duration::from_secs(60));
    let collaborators = Collaborators {
        pipeline: Arc::new(PassthroughPipeline),
        assets: Arc::new(InlineAssetStore),
        credentials: Arc::new(HmacCredentialIssuer::new(signer.clone())),
        logs: Arc::new(SignedLogStorage::new(&config.log_storage_url, signer)),
        worker_client: Arc::new(UnreachableWorkers),
    };
    let engine_config = EngineConfig {
        dispatch_priority_ttl: Duration::ZERO,
        kill_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let engine = Engine::new(Arc::new(MemoryStore::new()), collaborators, engine_config);

    let state = AppState {
        engine: engine.clone(),
        config: Arc::new(config.clone()),
        store_kind: "memory",
    };
    TestApp {
        router: build_app_router(state, &config),
        engine,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> Response<Body> {
        self.send(json_request(Method::POST, uri, body, None)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> Response<Body> {
        self.send(json_request(Method::PUT, uri, body, None)).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Create a job through the API and return the `data` object.
    pub async fn create_job(&self, project_id: DbId, spec: Value) -> Value {
        let response = self
            .send(json_request(Method::POST, "/api/v1/jobs", spec, Some(project_id)))
            .await;
        assert_eq!(response.status(), 201);
        body_json(response).await["data"].clone()
    }

    pub async fn ping(&self, endpoint: &str) {
        let response = self
            .post("/api/v1/cluster/_ping", serde_json::json!({ "endpoint": endpoint }))
            .await;
        assert_eq!(response.status(), 200);
    }
}

pub fn json_request(
    method: Method,
    uri: &str,
    body: Value,
    project_id: Option<DbId>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(project_id) = project_id {
        builder = builder.header(PROJECT_ID_HEADER, project_id.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
