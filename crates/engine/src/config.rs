use std::str::FromStr;
use std::time::Duration;

use spool_core::error::CoreError;
use spool_core::retry::{RetryPolicy, DEFAULT_AUTO_RETRY_LIMIT, DEFAULT_HARD_FAILURE_EXIT_CODE};

/// Engine tuning loaded from environment variables.
///
/// `Default` gives the same values `from_env` falls back to.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Candidates fetched per selection query.
    pub dispatch_poll_limit: i64,
    /// How long the per-project fairness ranking is reused.
    pub dispatch_priority_ttl: Duration,
    pub retry: RetryPolicy,
    /// A dispatched task silent for this long is an orphan.
    pub task_orphan_timeout: Duration,
    pub task_orphan_batch: i64,
    /// Finished jobs untouched for this long are deleted.
    pub job_retention: Duration,
    pub job_expire_batch: i64,
    pub worker_down_after: Duration,
    pub worker_remove_after: Duration,
    pub maintenance_interval: Duration,
    /// Upper bound on one remote kill request.
    pub kill_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_poll_limit: 5,
            dispatch_priority_ttl: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            task_orphan_timeout: Duration::from_secs(300),
            task_orphan_batch: 15,
            job_retention: Duration::from_secs(90 * 86_400),
            job_expire_batch: 100,
            worker_down_after: Duration::from_secs(120),
            worker_remove_after: Duration::from_secs(3_600),
            maintenance_interval: Duration::from_secs(60),
            kill_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default |
    /// |--------------------------------|---------|
    /// | `DISPATCH_POLL_LIMIT`          | `5`     |
    /// | `DISPATCH_PRIORITY_TTL_SECS`   | `10`    |
    /// | `TASK_AUTO_RETRY_LIMIT`        | `3`     |
    /// | `TASK_HARD_FAILURE_EXIT_CODE`  | `9`     |
    /// | `TASK_ORPHAN_TIMEOUT_SECS`     | `300`   |
    /// | `TASK_ORPHAN_BATCH`            | `15`    |
    /// | `JOB_RETENTION_DAYS`           | `90`    |
    /// | `JOB_EXPIRE_BATCH`             | `100`   |
    /// | `WORKER_DOWN_SECS`             | `120`   |
    /// | `WORKER_REMOVE_SECS`           | `3600`  |
    /// | `MAINTENANCE_INTERVAL_SECS`    | `60`    |
    /// | `KILL_TIMEOUT_SECS`            | `10`    |
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            dispatch_poll_limit: env_or("DISPATCH_POLL_LIMIT", 5)?,
            dispatch_priority_ttl: secs("DISPATCH_PRIORITY_TTL_SECS", 10)?,
            retry: RetryPolicy {
                hard_failure_exit_code: env_or(
                    "TASK_HARD_FAILURE_EXIT_CODE",
                    DEFAULT_HARD_FAILURE_EXIT_CODE,
                )?,
                auto_retry_limit: env_or("TASK_AUTO_RETRY_LIMIT", DEFAULT_AUTO_RETRY_LIMIT)?,
            },
            task_orphan_timeout: secs("TASK_ORPHAN_TIMEOUT_SECS", 300)?,
            task_orphan_batch: env_or("TASK_ORPHAN_BATCH", 15)?,
            job_retention: Duration::from_secs(env_or::<u64>("JOB_RETENTION_DAYS", 90)? * 86_400),
            job_expire_batch: env_or("JOB_EXPIRE_BATCH", 100)?,
            worker_down_after: secs("WORKER_DOWN_SECS", 120)?,
            worker_remove_after: secs("WORKER_REMOVE_SECS", 3_600)?,
            maintenance_interval: secs("MAINTENANCE_INTERVAL_SECS", 60)?,
            kill_timeout: secs("KILL_TIMEOUT_SECS", 10)?,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn secs(key: &str, default: u64) -> Result<Duration, CoreError> {
    env_or(key, default).map(Duration::from_secs)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, CoreError> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.dispatch_poll_limit, 5);
        assert_eq!(config.retry.hard_failure_exit_code, 9);
        assert_eq!(config.retry.auto_retry_limit, 3);
        assert_eq!(config.task_orphan_timeout, Duration::from_secs(300));
        assert_eq!(config.job_retention, Duration::from_secs(90 * 86_400));
    }

    #[test]
    fn parse_value_trims_and_rejects_garbage() {
        assert_eq!(parse_value::<i64>("X", " 7 ").unwrap(), 7);
        assert_matches!(parse_value::<u64>("X", "-1"), Err(CoreError::Validation(_)));
        assert_matches!(parse_value::<i32>("X", "nine"), Err(CoreError::Validation(_)));
    }
}
