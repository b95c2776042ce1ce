//! Delegation records: work handed from one agent to another

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegationStatus::Pending => write!(f, "pending"),
            DelegationStatus::Completed => write!(f, "completed"),
            DelegationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DelegationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(DelegationStatus::Pending),
            "completed" | "done" => Ok(DelegationStatus::Completed),
            "failed" => Ok(DelegationStatus::Failed),
            _ => Err(format!("Unknown delegation status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<String>,
    pub assigned_to: String,
    /// Task node the delegated work belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub status: DelegationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationStore {
    #[serde(default)]
    pub delegations: Vec<Delegation>,
}

impl DelegationStore {
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Delegation> {
        self.delegations.iter_mut().find(|d| d.id == id)
    }
}
