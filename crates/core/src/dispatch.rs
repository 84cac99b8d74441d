//! The task descriptor returned to a polling worker and the execution
//! environment injected into it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::script::TaskScript;
use crate::status::TaskState;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Environment keys
// ---------------------------------------------------------------------------

pub const ENV_TASK_ID: &str = "SPOOL_TASK_ID";
pub const ENV_JOB_ID: &str = "SPOOL_JOB_ID";
pub const ENV_PROJECT_ID: &str = "SPOOL_PROJECT_ID";
/// Time-boxed signing key scoped to the task's project.
pub const ENV_API_KEY: &str = "SPOOL_APIKEY";
pub const ENV_LOG_URL: &str = "SPOOL_LOG_URL";
/// Caps the worker's own request retries; the engine owns task retries.
pub const ENV_MAX_RETRIES: &str = "SPOOL_MAX_RETRIES";
pub const ENV_CREDENTIALS: &str = "SPOOL_CREDENTIALS";

/// Keys a job spec may not set itself.
pub const RESERVED_ENV_KEYS: &[&str] = &[
    ENV_TASK_ID,
    ENV_JOB_ID,
    ENV_PROJECT_ID,
    ENV_API_KEY,
    ENV_LOG_URL,
    ENV_MAX_RETRIES,
    ENV_CREDENTIALS,
];

/// Retry count exported to workers.
pub const WORKER_MAX_RETRIES: &str = "0";

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A fully materialized task, as handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchTask {
    pub id: DbId,
    pub job_id: DbId,
    pub project_id: DbId,
    pub name: String,
    pub state: TaskState,
    pub host_endpoint: String,
    pub run_count: i32,
    pub script: TaskScript,
    pub env: BTreeMap<String, String>,
    pub args: Map<String, Value>,
    pub log_file: String,
}

/// Inputs for [`execution_env`].
pub struct EnvInputs<'a> {
    pub task_id: DbId,
    pub job_id: DbId,
    pub project_id: DbId,
    pub api_key: &'a str,
    pub log_url: &'a str,
    pub credentials: &'a [String],
    pub job_env: &'a BTreeMap<String, String>,
}

/// Build the environment for a dispatched task.
///
/// Job-supplied variables are applied first so the injected keys always win.
pub fn execution_env(inputs: EnvInputs<'_>) -> BTreeMap<String, String> {
    let mut env = inputs.job_env.clone();
    env.insert(ENV_TASK_ID.to_string(), inputs.task_id.to_string());
    env.insert(ENV_JOB_ID.to_string(), inputs.job_id.to_string());
    env.insert(ENV_PROJECT_ID.to_string(), inputs.project_id.to_string());
    env.insert(ENV_API_KEY.to_string(), inputs.api_key.to_string());
    env.insert(ENV_LOG_URL.to_string(), inputs.log_url.to_string());
    env.insert(ENV_MAX_RETRIES.to_string(), WORKER_MAX_RETRIES.to_string());
    if !inputs.credentials.is_empty() {
        env.insert(ENV_CREDENTIALS.to_string(), inputs.credentials.join(","));
    }
    env
}

/// Object-storage path of a task run's log.
pub fn log_path(job_id: DbId, task_id: DbId, run_count: i32) -> String {
    format!("jobs/{job_id}/logs/{task_id}-{run_count}.log")
}

/// Union of job and task credential names, job names first, no repeats.
pub fn merge_credentials(job: &[String], task: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(job.len() + task.len());
    for name in job.iter().chain(task) {
        if !merged.contains(name) {
            merged.push(name.clone());
        }
    }
    merged
}
