//! Legacy two-level task store (Epic → Task → Subtask)
//!
//! Still read at startup for migration and for auto-inheriting an
//! in-progress task into sessions that predate the task graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::storage::LEGACY_STORE_VERSION;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    #[default]
    Planning,
    InProgress,
    Done,
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyTaskStatus {
    #[default]
    Pending,
    InProgress,
    Blocked,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    Done,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: SubtaskStatus,
    /// Tool whose call produced this subtask
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: LegacyTaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: EpicStatus,
    #[serde(default)]
    pub tasks: Vec<LegacyTask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTaskStore {
    #[serde(default = "default_legacy_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_epic_id: Option<String>,
    #[serde(default)]
    pub epics: Vec<Epic>,
}

fn default_legacy_version() -> String {
    LEGACY_STORE_VERSION.to_string()
}

impl Default for LegacyTaskStore {
    fn default() -> Self {
        Self {
            version: default_legacy_version(),
            active_epic_id: None,
            epics: Vec::new(),
        }
    }
}

impl LegacyTaskStore {
    /// In-progress task of the active in-progress epic, if any
    pub fn active_task(&self) -> Option<&LegacyTask> {
        let epic_id = self.active_epic_id.as_deref()?;
        self.epics
            .iter()
            .find(|e| e.id == epic_id && e.status == EpicStatus::InProgress)?
            .tasks
            .iter()
            .find(|t| t.status == LegacyTaskStatus::InProgress)
    }
}
