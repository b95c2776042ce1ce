//! Priority-tagged context notes keyed by session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::new_id;

/// Anchor priority, highest first when listed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl std::fmt::Display for AnchorPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnchorPriority::Critical => write!(f, "critical"),
            AnchorPriority::High => write!(f, "high"),
            AnchorPriority::Normal => write!(f, "normal"),
            AnchorPriority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for AnchorPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(AnchorPriority::Critical),
            "high" => Ok(AnchorPriority::High),
            "normal" | "medium" => Ok(AnchorPriority::Normal),
            "low" => Ok(AnchorPriority::Low),
            _ => Err(format!("Unknown anchor priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub priority: AnchorPriority,
    pub created_at: DateTime<Utc>,
}

impl Anchor {
    pub fn new(
        session_id: impl Into<String>,
        content: impl Into<String>,
        priority: AnchorPriority,
    ) -> Self {
        Self {
            id: new_id("an"),
            session_id: session_id.into(),
            content: content.into(),
            priority,
            created_at: Utc::now(),
        }
    }
}
