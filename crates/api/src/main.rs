use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spool_api::clients::{build_http_client, collaborators};
use spool_api::config::ServerConfig;
use spool_api::router::build_app_router;
use spool_api::state::AppState;
use spool_db::{MemoryStore, PgStore, StateStore};
use spool_engine::{Engine, EngineConfig};
use spool_events::EventLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "spool_api=debug,spool_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let engine_config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- State store ---
    let (store, store_kind): (Arc<dyn StateStore>, &'static str) = match &config.database_url {
        Some(url) => {
            let pool = spool_db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            spool_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            spool_db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database ready, migrations applied");
            (Arc::new(PgStore::new(pool)), "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-process store");
            (Arc::new(MemoryStore::new()), "memory")
        }
    };

    // --- Engine ---
    let http = build_http_client(Duration::from_secs(config.request_timeout_secs))
        .context("Failed to build HTTP client")?;
    let engine = Engine::new(store, collaborators(&config, http), engine_config);

    let logger_handle = tokio::spawn(EventLogger::run(engine.bus.subscribe()));
    let cancel = CancellationToken::new();
    let background = engine.spawn_background(&cancel);
    tracing::info!("Engine started (event listener, maintenance sweeper, event logger)");

    // --- Router ---
    let state = AppState {
        engine: engine.clone(),
        config: Arc::new(config.clone()),
        store_kind,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(%addr, store = store_kind, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    cancel.cancel();
    if tokio::time::timeout(grace, futures::future::join_all(background))
        .await
        .is_err()
    {
        tracing::warn!("Background tasks did not stop in time");
    }
    engine.shutdown().await;
    tracing::info!("Engine stopped");

    // The logger exits once every bus sender is gone.
    drop(engine);
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
