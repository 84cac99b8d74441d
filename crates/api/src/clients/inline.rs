//! In-process asset store for running without an asset service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use spool_core::protocol::AssetSpec;
use spool_core::script::AssetDoc;
use spool_core::types::DbId;
use spool_engine::ports::{AssetStore, CreatedAssets, IndexOutcome};
use spool_engine::EngineResult;

/// Derives asset ids from URIs and hands workers a minimal document.
/// Nothing is persisted; indexing only counts.
#[derive(Debug, Default)]
pub struct InlineAssetStore;

/// Stable id for an asset within a project.
pub fn asset_id(project_id: DbId, uri: &str) -> String {
    let hash = Sha256::digest(format!("{project_id}:{uri}").as_bytes());
    format!("{hash:x}")[..32].to_string()
}

#[async_trait]
impl AssetStore for InlineAssetStore {
    async fn create_assets(
        &self,
        project_id: DbId,
        specs: &[AssetSpec],
    ) -> EngineResult<CreatedAssets> {
        Ok(CreatedAssets {
            created: specs.iter().map(|s| asset_id(project_id, &s.uri)).collect(),
            failed: Vec::new(),
        })
    }

    async fn get_assets(&self, _project_id: DbId, ids: &[String]) -> EngineResult<Vec<AssetDoc>> {
        Ok(ids
            .iter()
            .map(|id| AssetDoc {
                id: id.clone(),
                document: json!({}),
            })
            .collect())
    }

    async fn index_assets(
        &self,
        _project_id: DbId,
        assets: &BTreeMap<String, Value>,
    ) -> EngineResult<IndexOutcome> {
        Ok(IndexOutcome {
            indexed: assets.len() as u64,
            failed: Vec::new(),
        })
    }
}
