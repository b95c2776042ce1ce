//! Storage contract shared by the document and relational backends

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::anchor::Anchor;
use super::delegation::DelegationStore;
use super::session::SessionState;
use crate::constants::storage::STORE_VERSION;
use crate::graph::{LegacyTaskStore, TaskGraph};

/// Storage error type
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store present but unreadable
    #[error("malformed {store} store: {reason}")]
    Malformed { store: StoreKind, reason: String },

    #[error("storage error: {0}")]
    Other(#[from] anyhow::Error),
}

/// One logical store; each is persisted and flushed independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Session states and anchors
    State,
    /// Legacy two-level task store
    Tasks,
    Delegations,
    Graph,
}

impl StoreKind {
    pub const ALL: [StoreKind; 4] = [
        StoreKind::State,
        StoreKind::Tasks,
        StoreKind::Delegations,
        StoreKind::Graph,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StoreKind::State => "state",
            StoreKind::Tasks => "tasks",
            StoreKind::Delegations => "delegations",
            StoreKind::Graph => "graph",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Session and anchor state, persisted together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub sessions: HashMap<String, SessionState>,
    #[serde(default)]
    pub anchors: HashMap<String, Vec<Anchor>>,
}

/// Version and save stamp wrapped around every persisted store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: String,
    pub last_saved: DateTime<Utc>,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn wrap(data: T) -> Self {
        Self {
            version: STORE_VERSION.to_string(),
            last_saved: Utc::now(),
            data,
        }
    }
}

/// Read/write contract for one durable backend.
///
/// `load_*` returns `Ok(None)` when the store has never been written and
/// `Err(StorageError::Malformed)` when it exists but cannot be decoded.
pub trait StorageBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    fn load_state(&self) -> Result<Option<StateSnapshot>, StorageError>;
    fn save_state(&self, state: &StateSnapshot) -> Result<(), StorageError>;

    fn load_tasks(&self) -> Result<Option<LegacyTaskStore>, StorageError>;
    fn save_tasks(&self, tasks: &LegacyTaskStore) -> Result<(), StorageError>;

    fn load_delegations(&self) -> Result<Option<DelegationStore>, StorageError>;
    fn save_delegations(&self, delegations: &DelegationStore) -> Result<(), StorageError>;

    fn load_graph(&self) -> Result<Option<TaskGraph>, StorageError>;
    fn save_graph(&self, graph: &TaskGraph) -> Result<(), StorageError>;
}
