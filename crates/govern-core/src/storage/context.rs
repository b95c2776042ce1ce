//! Canonical in-memory state plus its durable mirror
//!
//! `PersistenceContext` is constructed once and shared by `Arc`. Reads are
//! served from memory; every mutation updates memory first and then
//! schedules a debounced write of the affected store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use super::anchor::Anchor;
use super::backend::{StateSnapshot, StorageBackend, StorageError, StoreKind};
use super::delegation::DelegationStore;
use super::document::DocumentBackend;
use super::relational::RelationalBackend;
use super::scheduler::{FlushScheduler, FlushTarget};
use super::session::SessionState;
use crate::config::{BackendKind, GovernConfig};
use crate::constants::graph::ABANDONED_PURGE_THRESHOLD;
use crate::constants::storage::STORE_VERSION;
use crate::graph::{
    migrate_legacy, purge_abandoned_plans, LegacyTaskStore, MigrationReport, TaskGraph,
};

/// SQLite file name inside the data directory
const DATABASE_FILE: &str = "govern.db";

/// The in-memory stores, written out by the scheduler
struct Stores {
    backend: Box<dyn StorageBackend>,
    sessions: DashMap<String, SessionState>,
    anchors: DashMap<String, Vec<Anchor>>,
    tasks: RwLock<LegacyTaskStore>,
    delegations: RwLock<DelegationStore>,
    graph: RwLock<TaskGraph>,
}

impl Stores {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            sessions: self
                .sessions
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            anchors: self
                .anchors
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }
}

impl FlushTarget for Stores {
    fn write_store(&self, kind: StoreKind) -> Result<(), StorageError> {
        // Clone under the lock, write without it
        match kind {
            StoreKind::State => self.backend.save_state(&self.snapshot()),
            StoreKind::Tasks => {
                let tasks = self.tasks.read().clone();
                self.backend.save_tasks(&tasks)
            }
            StoreKind::Delegations => {
                let delegations = self.delegations.read().clone();
                self.backend.save_delegations(&delegations)
            }
            StoreKind::Graph => {
                let graph = self.graph.read().clone();
                self.backend.save_graph(&graph)
            }
        }
    }
}

/// Load one store, falling back to empty on a missing or unreadable store
fn load_or_default<T: Default>(
    kind: StoreKind,
    backend: &str,
    result: Result<Option<T>, StorageError>,
) -> T {
    match result {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            error!(store = %kind, backend, error = %e, "Failed to load store, starting empty");
            T::default()
        }
    }
}

/// What startup maintenance changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub migration: MigrationReport,
    pub purged: Vec<String>,
}

pub struct PersistenceContext {
    stores: Arc<Stores>,
    scheduler: FlushScheduler,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PersistenceContext {
    /// Load every store from `backend`. Never fails: unreadable stores start empty.
    pub fn new(backend: Box<dyn StorageBackend>, quiet_period: Duration) -> Self {
        let name = backend.name();
        let state = load_or_default(StoreKind::State, name, backend.load_state());
        let tasks = load_or_default(StoreKind::Tasks, name, backend.load_tasks());
        let delegations =
            load_or_default(StoreKind::Delegations, name, backend.load_delegations());
        let graph = load_or_default(StoreKind::Graph, name, backend.load_graph());

        let stores = Arc::new(Stores {
            backend,
            sessions: state.sessions.into_iter().collect(),
            anchors: state.anchors.into_iter().collect(),
            tasks: RwLock::new(tasks),
            delegations: RwLock::new(delegations),
            graph: RwLock::new(graph),
        });
        let target: Arc<dyn FlushTarget> = stores.clone();
        Self {
            scheduler: FlushScheduler::new(target, quiet_period),
            stores,
            session_locks: DashMap::new(),
        }
    }

    /// Open the configured backend and run startup maintenance
    pub fn open(config: &GovernConfig) -> Result<Self, StorageError> {
        let dir = config.data_dir();
        let backend: Box<dyn StorageBackend> = match config.backend {
            BackendKind::Document => Box::new(DocumentBackend::new(&dir)?),
            BackendKind::Relational => {
                Box::new(RelationalBackend::open(&dir.join(DATABASE_FILE))?)
            }
        };
        info!(backend = %config.backend, dir = %dir.display(), "Opening governance store");
        let ctx = Self::new(backend, config.quiet_period());
        ctx.run_maintenance(Utc::now());
        Ok(ctx)
    }

    /// Migrate a legacy store into an empty graph, then purge stale abandoned plans.
    /// A migrated legacy store is stamped with the current version so it is
    /// never folded in again, even after the graph empties.
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let legacy = self.legacy_tasks();
        let report = self.update_graph(|graph| {
            let migration = if graph.work_plans.is_empty() {
                migrate_legacy(&legacy, graph)
            } else {
                MigrationReport::default()
            };
            let purged = purge_abandoned_plans(graph, ABANDONED_PURGE_THRESHOLD, now);
            MaintenanceReport { migration, purged }
        });
        if !report.migration.is_noop() {
            self.update_legacy_tasks(|tasks| tasks.version = STORE_VERSION.to_string());
        }
        report
    }

    pub fn backend_name(&self) -> &'static str {
        self.stores.backend.name()
    }

    /// Lock serializing all work for one session
    pub fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current state of a session (a fresh state if it was never seen)
    pub fn session(&self, session_id: &str) -> SessionState {
        self.stores
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| SessionState::new(session_id))
    }

    /// Mutate a session, creating it on first access
    pub fn update_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> R {
        let result = {
            let mut entry = self
                .stores
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionState::new(session_id));
            let result = f(entry.value_mut());
            entry.updated_at = Utc::now();
            result
        };
        self.scheduler.schedule(StoreKind::State);
        result
    }

    /// Sessions whose active task is `task_id`
    pub fn sessions_on_task(&self, task_id: &str) -> Vec<String> {
        self.stores
            .sessions
            .iter()
            .filter(|e| e.active_task.as_ref().map(|t| t.id == task_id).unwrap_or(false))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn graph(&self) -> TaskGraph {
        self.stores.graph.read().clone()
    }

    /// Read the graph without cloning it
    pub fn with_graph<R>(&self, f: impl FnOnce(&TaskGraph) -> R) -> R {
        f(&self.stores.graph.read())
    }

    pub fn update_graph<R>(&self, f: impl FnOnce(&mut TaskGraph) -> R) -> R {
        let result = f(&mut self.stores.graph.write());
        self.scheduler.schedule(StoreKind::Graph);
        result
    }

    /// Mutate the graph, scheduling a write only when `f` succeeds
    pub fn try_update_graph<T, E>(
        &self,
        f: impl FnOnce(&mut TaskGraph) -> Result<T, E>,
    ) -> Result<T, E> {
        let result = f(&mut self.stores.graph.write());
        if result.is_ok() {
            self.scheduler.schedule(StoreKind::Graph);
        }
        result
    }

    pub fn legacy_tasks(&self) -> LegacyTaskStore {
        self.stores.tasks.read().clone()
    }

    pub fn update_legacy_tasks<R>(&self, f: impl FnOnce(&mut LegacyTaskStore) -> R) -> R {
        let result = f(&mut self.stores.tasks.write());
        self.scheduler.schedule(StoreKind::Tasks);
        result
    }

    pub fn delegations(&self) -> DelegationStore {
        self.stores.delegations.read().clone()
    }

    pub fn update_delegations<R>(&self, f: impl FnOnce(&mut DelegationStore) -> R) -> R {
        let result = f(&mut self.stores.delegations.write());
        self.scheduler.schedule(StoreKind::Delegations);
        result
    }

    pub fn add_anchor(&self, anchor: Anchor) {
        self.stores
            .anchors
            .entry(anchor.session_id.clone())
            .or_default()
            .push(anchor);
        self.scheduler.schedule(StoreKind::State);
    }

    /// Anchors of a session, highest priority first, oldest first within a priority
    pub fn anchors(&self, session_id: &str) -> Vec<Anchor> {
        let mut anchors = self
            .stores
            .anchors
            .get(session_id)
            .map(|a| a.clone())
            .unwrap_or_default();
        anchors.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        anchors
    }

    /// Write every pending store now
    pub fn flush_now(&self) {
        self.scheduler.flush_now();
    }

    pub fn is_degraded(&self) -> bool {
        self.scheduler.is_degraded()
    }

    pub fn reset_degraded(&self) {
        warn!("Leaving degraded persistence mode");
        self.scheduler.reset_degraded();
    }

    pub fn pending(&self) -> Vec<StoreKind> {
        self.scheduler.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::legacy::{Epic, EpicStatus, LegacyTask, LegacyTaskStatus};
    use crate::graph::{add_task, start_task, PlanStatus, TaskNode, WorkPlan};
    use crate::storage::anchor::AnchorPriority;
    use crate::storage::session::ActiveTaskRef;
    use tempfile::TempDir;

    fn config(temp: &TempDir, backend: BackendKind) -> GovernConfig {
        GovernConfig {
            backend,
            data_dir: Some(temp.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn build_graph(ctx: &PersistenceContext) -> String {
        ctx.try_update_graph(|graph| {
            let plan = WorkPlan::new("P");
            let plan_id = plan.id.clone();
            graph.work_plans.push(plan);
            let a = add_task(graph, TaskNode::new(&plan_id, "A", "out"), false)?;
            let b = TaskNode::new(&plan_id, "B", "out").with_depends_on(vec![a.clone()]);
            add_task(graph, b, true)?;
            start_task(graph, &a, Utc::now())?;
            Ok::<_, crate::graph::TransitionError>(a)
        })
        .expect("graph builds")
    }

    fn round_trip(backend: BackendKind) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let (graph, task_id) = {
            let ctx = PersistenceContext::open(&config(&temp, backend)).unwrap();
            let task_id = build_graph(&ctx);
            ctx.update_session("s1", |s| {
                s.agent = Some("executor".into());
                s.active_task = Some(ActiveTaskRef {
                    id: task_id.clone(),
                    name: "A".into(),
                });
            });
            ctx.add_anchor(Anchor::new("s1", "keep api stable", AnchorPriority::High));
            ctx.flush_now();
            (ctx.graph(), task_id)
        };

        let ctx = PersistenceContext::open(&config(&temp, backend)).unwrap();
        assert_eq!(ctx.graph(), graph);
        assert_eq!(ctx.backend_name(), backend.to_string());
        let session = ctx.session("s1");
        assert_eq!(session.agent.as_deref(), Some("executor"));
        assert_eq!(session.active_task.map(|t| t.id), Some(task_id));
        assert_eq!(ctx.anchors("s1").len(), 1);
    }

    #[test]
    fn test_round_trip_document_backend() {
        round_trip(BackendKind::Document);
    }

    #[test]
    fn test_round_trip_relational_backend() {
        round_trip(BackendKind::Relational);
    }

    #[test]
    fn test_malformed_store_starts_empty() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(temp.path().join("graph.json"), "not json").unwrap();
        let ctx = PersistenceContext::open(&config(&temp, BackendKind::Document)).unwrap();
        assert!(ctx.graph().work_plans.is_empty());
        assert!(!ctx.is_degraded());
    }

    /// Records the level of every event emitted while installed
    #[derive(Clone, Default)]
    struct LevelRecorder(Arc<Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelRecorder {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().push(*event.metadata().level());
        }
    }

    #[test]
    fn test_unreadable_store_logs_at_error() {
        use tracing_subscriber::layer::SubscriberExt;

        let temp = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(temp.path().join("state.json"), "{ truncated").unwrap();
        let recorder = LevelRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());

        tracing::subscriber::with_default(subscriber, || {
            let backend = DocumentBackend::new(temp.path()).unwrap();
            let _ctx = PersistenceContext::new(Box::new(backend), Duration::from_millis(10));
        });
        assert!(recorder.0.lock().contains(&tracing::Level::ERROR));
    }

    #[test]
    fn test_failed_write_degrades_but_memory_keeps_working() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let ctx = PersistenceContext::open(&config(&temp, BackendKind::Document)).unwrap();

        // Replace the data directory with a file so writes fail
        std::fs::remove_dir_all(temp.path()).unwrap();
        std::fs::write(temp.path(), "blocker").unwrap();

        ctx.update_session("s1", |s| s.agent = Some("planner".into()));
        assert!(ctx.is_degraded());
        assert_eq!(ctx.session("s1").agent.as_deref(), Some("planner"));
        assert_eq!(ctx.pending(), vec![StoreKind::State]);

        std::fs::remove_file(temp.path()).unwrap();
        std::fs::create_dir_all(temp.path()).unwrap();
        ctx.reset_degraded();
        ctx.flush_now();
        assert!(!ctx.is_degraded());
        assert!(temp.path().join("state.json").exists());
    }

    fn legacy_store() -> LegacyTaskStore {
        let now = Utc::now();
        LegacyTaskStore {
            active_epic_id: Some("ep-1".into()),
            epics: vec![Epic {
                id: "ep-1".into(),
                name: "Legacy".into(),
                status: EpicStatus::InProgress,
                tasks: vec![LegacyTask {
                    id: "lt-1".into(),
                    name: "Old task".into(),
                    status: LegacyTaskStatus::InProgress,
                    depends_on: vec![],
                    subtasks: vec![],
                    created_at: now,
                    updated_at: now,
                }],
                created_at: now,
                updated_at: now,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_startup_migrates_legacy_store() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        DocumentBackend::new(temp.path())
            .unwrap()
            .save_tasks(&legacy_store())
            .unwrap();

        let ctx = PersistenceContext::open(&config(&temp, BackendKind::Document)).unwrap();
        let graph = ctx.graph();
        assert_eq!(graph.active_work_plan_id.as_deref(), Some("ep-1"));
        assert_eq!(graph.find_plan("ep-1").map(|p| p.status), Some(PlanStatus::Active));
        assert!(graph.find_node("lt-1").is_some());
    }

    #[test]
    fn test_migrated_legacy_store_is_not_folded_in_twice() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        DocumentBackend::new(temp.path())
            .unwrap()
            .save_tasks(&legacy_store())
            .unwrap();

        let first = PersistenceContext::open(&config(&temp, BackendKind::Document)).unwrap();
        assert!(first.graph().find_plan("ep-1").is_some());
        assert_eq!(first.legacy_tasks().version, STORE_VERSION);
        first.flush_now();
        drop(first);

        // An emptied graph must not pull the legacy epics back in
        std::fs::remove_file(temp.path().join("graph.json")).unwrap();
        let second = PersistenceContext::open(&config(&temp, BackendKind::Document)).unwrap();
        assert!(second.graph().work_plans.is_empty());
        assert_eq!(second.legacy_tasks().epics.len(), 1);
        assert!(second.run_maintenance(Utc::now()).migration.is_noop());
        assert!(second.graph().work_plans.is_empty());
    }

    #[test]
    fn test_anchors_sorted_by_priority() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let ctx = PersistenceContext::open(&config(&temp, BackendKind::Document)).unwrap();
        ctx.add_anchor(Anchor::new("s1", "low", AnchorPriority::Low));
        ctx.add_anchor(Anchor::new("s1", "critical", AnchorPriority::Critical));
        ctx.add_anchor(Anchor::new("s2", "other", AnchorPriority::Critical));
        let contents: Vec<String> = ctx.anchors("s1").into_iter().map(|a| a.content).collect();
        assert_eq!(contents, vec!["critical", "low"]);
    }
}
