use std::sync::Arc;

use spool_engine::Engine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the engine's services are behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub config: Arc<ServerConfig>,
    /// `postgres` or `memory`, reported by the health check.
    pub store_kind: &'static str,
}
