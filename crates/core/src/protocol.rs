//! Worker event-report protocol.
//!
//! Workers submit a [`TaskEvent`] against a task id. The payload is a tagged
//! union with one variant per event kind:
//!
//! ```json
//! { "taskId": "...", "jobId": "...", "event": { "type": "stopped", "payload": { "exitStatus": 9 } } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::TaskState;
use crate::types::DbId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: DbId,
    pub job_id: DbId,
    pub event: TaskEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum TaskEventKind {
    Started,
    Stopped(TaskStoppedEvent),
    Error(TaskErrorEvent),
    Expand(TaskExpandEvent),
    Message(TaskMessageEvent),
    Stats(TaskStatsEvent),
    Progress(TaskProgressEvent),
    Status(TaskStatusEvent),
    Index(BatchIndexEvent),
}

impl TaskEventKind {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEventKind::Started => "started",
            TaskEventKind::Stopped(_) => "stopped",
            TaskEventKind::Error(_) => "error",
            TaskEventKind::Expand(_) => "expand",
            TaskEventKind::Message(_) => "message",
            TaskEventKind::Stats(_) => "stats",
            TaskEventKind::Progress(_) => "progress",
            TaskEventKind::Status(_) => "status",
            TaskEventKind::Index(_) => "index",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStoppedEvent {
    pub exit_status: i32,
    /// The worker stopped the task because it was asked to.
    #[serde(default)]
    pub manual_kill: bool,
    /// Overrides the state the exit status would produce.
    #[serde(default)]
    pub new_state: Option<TaskState>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TaskStoppedEvent {
    pub fn exited(exit_status: i32) -> Self {
        Self {
            exit_status,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskErrorEvent {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub message: String,
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default)]
    pub fatal: bool,
    #[serde(default = "default_phase")]
    pub phase: String,
}

fn default_phase() -> String {
    "execute".to_string()
}

/// An asset to create during expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    pub uri: String,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExpandEvent {
    pub assets: Vec<AssetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessageEvent {
    pub message: String,
}

/// Per-processor timing reported at the end of a task, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub processor: String,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatsEvent {
    pub stats: Vec<ProcessorStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressEvent {
    pub progress: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub status: String,
}

/// Asset documents to index, keyed by asset id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIndexEvent {
    pub assets: BTreeMap<String, Value>,
}
