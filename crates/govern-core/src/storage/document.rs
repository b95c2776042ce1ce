//! Document-store backend: one JSON file per logical store

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::backend::{Envelope, StateSnapshot, StorageBackend, StorageError, StoreKind};
use super::delegation::DelegationStore;
use crate::graph::{LegacyTaskStore, TaskGraph};

pub struct DocumentBackend {
    dir: PathBuf,
}

impl DocumentBackend {
    /// Create a backend rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a logical store
    pub fn path_for(&self, kind: StoreKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.name()))
    }

    fn read<T: DeserializeOwned>(&self, kind: StoreKind) -> Result<Option<T>, StorageError> {
        let path = self.path_for(kind);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope<T> =
            serde_json::from_str(&raw).map_err(|e| StorageError::Malformed {
                store: kind,
                reason: e.to_string(),
            })?;
        debug!(store = %kind, version = %envelope.version, "Loaded document store");
        Ok(Some(envelope.data))
    }

    /// Write through a temp file and rename so readers never see a torn file
    fn write<T: Serialize>(&self, kind: StoreKind, data: &T) -> Result<(), StorageError> {
        let path = self.path_for(kind);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&Envelope::wrap(data))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl StorageBackend for DocumentBackend {
    fn name(&self) -> &'static str {
        "document"
    }

    fn load_state(&self) -> Result<Option<StateSnapshot>, StorageError> {
        self.read(StoreKind::State)
    }

    fn save_state(&self, state: &StateSnapshot) -> Result<(), StorageError> {
        self.write(StoreKind::State, state)
    }

    fn load_tasks(&self) -> Result<Option<LegacyTaskStore>, StorageError> {
        self.read(StoreKind::Tasks)
    }

    fn save_tasks(&self, tasks: &LegacyTaskStore) -> Result<(), StorageError> {
        self.write(StoreKind::Tasks, tasks)
    }

    fn load_delegations(&self) -> Result<Option<DelegationStore>, StorageError> {
        self.read(StoreKind::Delegations)
    }

    fn save_delegations(&self, delegations: &DelegationStore) -> Result<(), StorageError> {
        self.write(StoreKind::Delegations, delegations)
    }

    fn load_graph(&self) -> Result<Option<TaskGraph>, StorageError> {
        self.read(StoreKind::Graph)
    }

    fn save_graph(&self, graph: &TaskGraph) -> Result<(), StorageError> {
        self.write(StoreKind::Graph, graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{TaskNode, WorkPlan};
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_as_none() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let backend = DocumentBackend::new(temp.path()).unwrap();
        assert!(backend.load_graph().unwrap().is_none());
        assert!(backend.load_state().unwrap().is_none());
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let backend = DocumentBackend::new(temp.path()).unwrap();
        std::fs::write(backend.path_for(StoreKind::Graph), "{ not json").unwrap();
        assert!(matches!(
            backend.load_graph(),
            Err(StorageError::Malformed {
                store: StoreKind::Graph,
                ..
            })
        ));
    }

    #[test]
    fn test_envelope_carries_version_and_timestamp() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let backend = DocumentBackend::new(temp.path()).unwrap();
        backend.save_delegations(&DelegationStore::default()).unwrap();

        let raw = std::fs::read_to_string(backend.path_for(StoreKind::Delegations)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], crate::constants::storage::STORE_VERSION);
        assert!(value["last_saved"].is_string());
        assert!(!backend.path_for(StoreKind::Delegations).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_graph_round_trip() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut plan = WorkPlan::new("P");
        plan.acceptance = vec!["ships".into()];
        plan.tasks.push(TaskNode::new(&plan.id, "A", "out").with_temporal_gate("tn-x", "order"));
        let graph = TaskGraph {
            active_work_plan_id: Some(plan.id.clone()),
            work_plans: vec![plan],
        };

        DocumentBackend::new(temp.path()).unwrap().save_graph(&graph).unwrap();
        let reloaded = DocumentBackend::new(temp.path()).unwrap().load_graph().unwrap();
        assert_eq!(reloaded, Some(graph));
    }
}
