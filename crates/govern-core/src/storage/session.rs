//! Per-session governance state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::TaskNode;

/// Denormalized reference to the session's active task node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTaskRef {
    pub id: String,
    pub name: String,
}

impl From<&TaskNode> for ActiveTaskRef {
    fn from(node: &TaskNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
        }
    }
}

/// Last tool call the gate refused, for retry detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCall {
    pub tool: String,
    pub at: DateTime<Utc>,
}

/// Governance state of one agent session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<ActiveTaskRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_block: Option<BlockedCall>,
    /// Agent identity captured for this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            active_task: None,
            last_block: None,
            agent: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether `tool` was already refused within `window` of `now`
    pub fn is_retry(&self, tool: &str, window: std::time::Duration, now: DateTime<Utc>) -> bool {
        let Some(block) = &self.last_block else {
            return false;
        };
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(30));
        block.tool == tool && now - block.at <= window
    }

    /// Drop the active task if it is the given node
    pub fn clear_task(&mut self, task_id: &str) {
        if self.active_task.as_ref().map(|t| t.id == task_id).unwrap_or(false) {
            self.active_task = None;
        }
    }
}
