//! The processing script a task carries to its worker.
//!
//! The `execute` list is produced by the pipeline resolver from `modules` and
//! is opaque to the engine. Assets are either embedded literally or referenced
//! by id and resolved against asset storage at dispatch time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

/// An asset document handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDoc {
    pub id: String,
    #[serde(default)]
    pub document: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TaskScript {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// Named pipeline modules, resolved into `execute` when the task is created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,

    #[serde(default)]
    pub execute: Vec<Value>,

    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default)]
    pub global_args: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<AssetDoc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_ids: Option<Vec<String>>,

    /// Scripts that run only after this one succeeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[validate(nested)]
    pub children: Vec<TaskScript>,
}

impl TaskScript {
    /// Number of assets the script processes, literal or by reference.
    pub fn asset_count(&self) -> i64 {
        let literal = self.assets.as_ref().map_or(0, Vec::len);
        let referenced = self.asset_ids.as_ref().map_or(0, Vec::len);
        (literal + referenced) as i64
    }

    /// Split off the child scripts, leaving the script that gets persisted.
    pub fn take_children(&mut self) -> Vec<TaskScript> {
        std::mem::take(&mut self.children)
    }

    /// Build the script for a task spawned by an expand event.
    ///
    /// The new script runs the same resolved pipeline with the same settings
    /// over the given asset ids.
    pub fn expanded(&self, asset_ids: Vec<String>) -> TaskScript {
        TaskScript {
            name: format!("Expand {} assets", asset_ids.len()),
            modules: Vec::new(),
            execute: self.execute.clone(),
            settings: self.settings.clone(),
            global_args: self.global_args.clone(),
            assets: None,
            asset_ids: Some(asset_ids),
            children: Vec::new(),
        }
    }
}
