//! Collaborator ports.
//!
//! The engine reaches pipeline resolution, asset storage, credential
//! issuance, log storage and the workers themselves only through these
//! traits. `spool-api` provides the HTTP implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use spool_core::protocol::AssetSpec;
use spool_core::script::AssetDoc;
use spool_core::status::TaskState;
use spool_core::types::DbId;

use crate::error::EngineResult;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// An asset the storage layer refused, keyed by whatever identified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFailure {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAssets {
    /// Ids of assets created or already present.
    pub created: Vec<String>,
    #[serde(default)]
    pub failed: Vec<AssetFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutcome {
    pub indexed: u64,
    #[serde(default)]
    pub failed: Vec<AssetFailure>,
}

/// Sent to a worker to stop a task it is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    pub task_id: DbId,
    pub job_id: DbId,
    /// State the worker reports back in its stopped event.
    pub new_state: TaskState,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PipelineResolver: Send + Sync + 'static {
    /// Turn named modules into the ordered operation list a worker executes.
    async fn resolve(&self, project_id: DbId, modules: &[String]) -> EngineResult<Vec<Value>>;
}

#[async_trait]
pub trait AssetStore: Send + Sync + 'static {
    async fn create_assets(
        &self,
        project_id: DbId,
        specs: &[AssetSpec],
    ) -> EngineResult<CreatedAssets>;

    async fn get_assets(&self, project_id: DbId, ids: &[String]) -> EngineResult<Vec<AssetDoc>>;

    async fn index_assets(
        &self,
        project_id: DbId,
        assets: &BTreeMap<String, Value>,
    ) -> EngineResult<IndexOutcome>;
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync + 'static {
    /// A time-boxed key scoped to one project and role.
    async fn signing_key(&self, project_id: DbId, role: &str) -> EngineResult<String>;
}

#[async_trait]
pub trait LogStorage: Send + Sync + 'static {
    /// A writable URL for the object at `path`.
    async fn signed_url(&self, path: &str) -> EngineResult<String>;
}

#[async_trait]
pub trait WorkerClient: Send + Sync + 'static {
    async fn kill_task(&self, endpoint: &str, request: &KillRequest) -> EngineResult<()>;
}

// ---------------------------------------------------------------------------
// Passthrough pipeline
// ---------------------------------------------------------------------------

/// Resolves each module to a single `{"module": name}` operation.
///
/// Used when no pipeline service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPipeline;

#[async_trait]
impl PipelineResolver for PassthroughPipeline {
    async fn resolve(&self, _project_id: DbId, modules: &[String]) -> EngineResult<Vec<Value>> {
        Ok(modules.iter().map(|m| json!({ "module": m })).collect())
    }
}
