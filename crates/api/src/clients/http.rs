//! reqwest implementations of the engine's collaborator ports.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use spool_core::protocol::AssetSpec;
use spool_core::script::AssetDoc;
use spool_core::types::DbId;
use spool_engine::ports::{
    AssetStore, CreatedAssets, IndexOutcome, KillRequest, PipelineResolver, WorkerClient,
};
use spool_engine::{EngineError, EngineResult};

/// Build the shared HTTP client.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("spool/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// POST `body` as JSON and decode a JSON response, mapping every failure
/// to a collaborator error for `service`.
async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
    client: &reqwest::Client,
    service: &'static str,
    url: &str,
    body: &B,
) -> EngineResult<R> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| EngineError::collaborator(service, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(EngineError::collaborator(
            service,
            format!("HTTP {}: {}", status.as_u16(), text),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| EngineError::collaborator(service, format!("invalid response: {e}")))
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

pub struct HttpWorkerClient {
    client: reqwest::Client,
    kill_path: String,
}

impl HttpWorkerClient {
    pub fn new(client: reqwest::Client, kill_path: &str) -> Self {
        let kill_path = format!("/{}", kill_path.trim_start_matches('/'));
        Self { client, kill_path }
    }

    fn kill_url(&self, endpoint: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), self.kill_path)
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn kill_task(&self, endpoint: &str, request: &KillRequest) -> EngineResult<()> {
        let response = self
            .client
            .post(self.kill_url(endpoint))
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::collaborator("worker", e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::collaborator(
                "worker",
                format!("kill returned HTTP {}", response.status().as_u16()),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

pub struct HttpAssetStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAssetStore {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, project_id: DbId, action: &str) -> String {
        format!("{}/api/v1/projects/{project_id}/assets/{action}", self.base_url)
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn create_assets(
        &self,
        project_id: DbId,
        specs: &[AssetSpec],
    ) -> EngineResult<CreatedAssets> {
        post_json(
            &self.client,
            "assets",
            &self.url(project_id, "_batch_create"),
            &json!({ "assets": specs }),
        )
        .await
    }

    async fn get_assets(&self, project_id: DbId, ids: &[String]) -> EngineResult<Vec<AssetDoc>> {
        post_json(
            &self.client,
            "assets",
            &self.url(project_id, "_batch_get"),
            &json!({ "ids": ids }),
        )
        .await
    }

    async fn index_assets(
        &self,
        project_id: DbId,
        assets: &BTreeMap<String, Value>,
    ) -> EngineResult<IndexOutcome> {
        post_json(
            &self.client,
            "assets",
            &self.url(project_id, "_batch_index"),
            &json!({ "assets": assets }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

pub struct HttpPipelineResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPipelineResolver {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PipelineResolver for HttpPipelineResolver {
    async fn resolve(&self, project_id: DbId, modules: &[String]) -> EngineResult<Vec<Value>> {
        let url = format!(
            "{}/api/v1/projects/{project_id}/pipelines/_resolve",
            self.base_url
        );
        post_json(&self.client, "pipeline", &url, &json!({ "modules": modules })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_url_joins_endpoint_and_path() {
        let client = HttpWorkerClient::new(reqwest::Client::new(), "kill");
        assert_eq!(client.kill_url("http://w1:5000/"), "http://w1:5000/kill");

        let client = HttpWorkerClient::new(reqwest::Client::new(), "/v1/kill");
        assert_eq!(client.kill_url("http://w1:5000"), "http://w1:5000/v1/kill");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_collaborator_error() {
        let client = build_http_client(Duration::from_millis(200)).unwrap();
        let err = post_json::<_, Value>(&client, "assets", "http://127.0.0.1:1/x", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Collaborator { service: "assets", .. }));
    }
}
