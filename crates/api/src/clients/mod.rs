//! Implementations of the engine's collaborator ports.
//!
//! Services without a configured URL fall back to in-process
//! implementations so the server runs standalone in development.

mod http;
mod inline;
mod signing;

use std::sync::Arc;
use std::time::Duration;

use spool_engine::ports::{AssetStore, PassthroughPipeline, PipelineResolver};
use spool_engine::Collaborators;

use crate::config::ServerConfig;

pub use http::{build_http_client, HttpAssetStore, HttpPipelineResolver, HttpWorkerClient};
pub use inline::{asset_id, InlineAssetStore};
pub use signing::{HmacCredentialIssuer, SignedLogStorage, Signer};

/// Wire the collaborators the configuration asks for.
pub fn collaborators(config: &ServerConfig, client: reqwest::Client) -> Collaborators {
    let signer = Signer::new(
        &config.signing_secret,
        Duration::from_secs(config.credential_ttl_secs),
    );

    let pipeline: Arc<dyn PipelineResolver> = match &config.pipeline_service_url {
        Some(url) => Arc::new(HttpPipelineResolver::new(client.clone(), url)),
        None => {
            tracing::info!("PIPELINE_SERVICE_URL not set, modules pass through unresolved");
            Arc::new(PassthroughPipeline)
        }
    };

    let assets: Arc<dyn AssetStore> = match &config.asset_service_url {
        Some(url) => Arc::new(HttpAssetStore::new(client.clone(), url)),
        None => {
            tracing::info!("ASSET_SERVICE_URL not set, using the in-process asset store");
            Arc::new(InlineAssetStore)
        }
    };

    Collaborators {
        pipeline,
        assets,
        credentials: Arc::new(HmacCredentialIssuer::new(signer.clone())),
        logs: Arc::new(SignedLogStorage::new(&config.log_storage_url, signer)),
        worker_client: Arc::new(HttpWorkerClient::new(client, &config.worker_kill_path)),
    }
}
