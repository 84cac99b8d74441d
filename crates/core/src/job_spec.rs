//! Job submission spec and its validation.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::dispatch::RESERVED_ENV_KEYS;
use crate::error::CoreError;
use crate::script::TaskScript;
use crate::types::DbId;

/// Default admission cap on dispatched tasks per job.
pub const DEFAULT_MAX_RUNNING_TASKS: i32 = 1024;

fn default_max_running_tasks() -> i32 {
    DEFAULT_MAX_RUNNING_TASKS
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 10000), nested)]
    pub scripts: Vec<TaskScript>,

    #[serde(default)]
    pub args: Map<String, Value>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub paused: bool,

    /// Seconds after which a paused job resumes by itself. At most a week.
    #[validate(range(min = 1, max = 604800))]
    pub pause_duration_secs: Option<i64>,

    /// Cancel any in-progress job with the same name once this one exists.
    #[serde(default)]
    pub replace: bool,

    #[serde(default = "default_max_running_tasks")]
    #[validate(range(min = 0))]
    pub max_running_tasks: i32,

    #[serde(default)]
    pub credentials: Vec<String>,

    #[serde(default)]
    pub depend_on_job_ids: Vec<DbId>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, scripts: Vec<TaskScript>) -> Self {
        Self {
            name: Some(name.into()),
            scripts,
            args: Map::new(),
            env: BTreeMap::new(),
            priority: 0,
            paused: false,
            pause_duration_secs: None,
            replace: false,
            max_running_tasks: DEFAULT_MAX_RUNNING_TASKS,
            credentials: Vec::new(),
            depend_on_job_ids: Vec::new(),
        }
    }
}

/// Validate a job spec beyond its field rules.
///
/// Rules:
/// - Field constraints from the `Validate` derive.
/// - `env` must not set keys the dispatcher injects.
/// - `depend_on_job_ids` must not repeat.
pub fn validate_job_spec(spec: &JobSpec) -> Result<(), CoreError> {
    spec.validate()?;

    if let Some(key) = spec
        .env
        .keys()
        .find(|k| RESERVED_ENV_KEYS.contains(&k.as_str()))
    {
        return Err(CoreError::Validation(format!(
            "env key '{key}' is reserved"
        )));
    }

    let mut seen = HashSet::new();
    for id in &spec.depend_on_job_ids {
        if !seen.insert(id) {
            return Err(CoreError::Validation(format!(
                "job {id} listed more than once in dependOnJobIds"
            )));
        }
    }

    if let Some(name) = spec.credentials.iter().find(|c| c.trim().is_empty()) {
        return Err(CoreError::Validation(format!(
            "credential name '{name}' must not be blank"
        )));
    }

    Ok(())
}
