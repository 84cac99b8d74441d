use std::str::FromStr;

use spool_core::error::CoreError;

/// Used when `SIGNING_SECRET` is unset. Only suitable for local development.
pub const DEV_SIGNING_SECRET: &str = "spool-dev-signing-secret";

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In production,
/// override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8066`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Largest accepted request body. Expand and index events carry asset
    /// batches, so this sits well above axum's 2 MiB default.
    pub max_body_bytes: usize,
    /// How long background services get to stop after the listener closes.
    pub shutdown_timeout_secs: u64,
    /// Postgres connection string. Unset runs on the in-process store.
    pub database_url: Option<String>,
    /// Path on a worker endpoint that accepts kill requests.
    pub worker_kill_path: String,
    /// Asset service base URL. Unset resolves assets in-process.
    pub asset_service_url: Option<String>,
    /// Pipeline service base URL. Unset passes modules through unresolved.
    pub pipeline_service_url: Option<String>,
    pub signing_secret: String,
    /// Base URL task logs are written under.
    pub log_storage_url: String,
    /// Lifetime of task signing keys and signed log URLs.
    pub credential_ttl_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                              |
    /// |-------------------------|--------------------------------------|
    /// | `HOST`                  | `0.0.0.0`                            |
    /// | `PORT`                  | `8066`                               |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`              |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                                 |
    /// | `MAX_BODY_BYTES`        | `16777216` (16 MiB)                  |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                                 |
    /// | `DATABASE_URL`          | unset                                |
    /// | `WORKER_KILL_PATH`      | `/kill`                              |
    /// | `ASSET_SERVICE_URL`     | unset                                |
    /// | `PIPELINE_SERVICE_URL`  | unset                                |
    /// | `SIGNING_SECRET`        | development secret                   |
    /// | `LOG_STORAGE_URL`       | `http://localhost:9000/spool-logs`   |
    /// | `CREDENTIAL_TTL_SECS`   | `3600`                               |
    pub fn from_env() -> Result<Self, CoreError> {
        let cors_origins: Vec<String> = var_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let signing_secret = optional("SIGNING_SECRET").unwrap_or_else(|| {
            tracing::warn!("SIGNING_SECRET not set, using the development secret");
            DEV_SIGNING_SECRET.to_string()
        });

        Ok(Self {
            host: var_or("HOST", "0.0.0.0"),
            port: parse_or("PORT", 8066)?,
            cors_origins,
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 30)?,
            max_body_bytes: parse_or("MAX_BODY_BYTES", 16 * 1024 * 1024)?,
            shutdown_timeout_secs: parse_or("SHUTDOWN_TIMEOUT_SECS", 30)?,
            database_url: optional("DATABASE_URL"),
            worker_kill_path: var_or("WORKER_KILL_PATH", "/kill"),
            asset_service_url: optional("ASSET_SERVICE_URL"),
            pipeline_service_url: optional("PIPELINE_SERVICE_URL"),
            signing_secret,
            log_storage_url: var_or("LOG_STORAGE_URL", "http://localhost:9000/spool-logs"),
            credential_ttl_secs: parse_or("CREDENTIAL_TTL_SECS", 3600)?,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_when_unset() {
        assert_eq!(parse_or::<u16>("SPOOL_TEST_UNSET_PORT", 8066).unwrap(), 8066);
    }

    #[test]
    fn optional_ignores_unset_keys() {
        assert!(optional("SPOOL_TEST_UNSET_URL").is_none());
        assert_eq!(var_or("SPOOL_TEST_UNSET_PATH", "/kill"), "/kill");
    }
}
