//! SQLite database wrapper with versioned migrations

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

/// SQLite database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps a concurrent CLI invocation from failing on lock contention
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Get the current schema version from database
    pub(crate) fn get_schema_version(&self) -> i32 {
        if let Err(e) = self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        ) {
            tracing::warn!("Failed to create schema_version table: {}", e);
            return 0;
        }

        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0)
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
        Ok(())
    }

    /// Run database migrations incrementally
    pub(crate) fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version();
        info!(
            "Database schema version: {} (target: {})",
            current_version, SCHEMA_VERSION
        );

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        // Migration 1: session state, anchors, legacy tasks, delegations
        if current_version < 1 {
            info!("Running migration 1: Session and delegation stores");
            self.conn.execute_batch(
                r#"
                -- One row per logical store that has been written at least once
                CREATE TABLE IF NOT EXISTS store_meta (
                    store TEXT PRIMARY KEY,
                    version TEXT NOT NULL,
                    last_saved TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    active_task_id TEXT,
                    active_task_name TEXT,
                    last_block_tool TEXT,
                    last_block_at TEXT,
                    agent TEXT,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS anchors (
                    id TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    priority TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_anchors_session
                    ON anchors(session_id);

                -- Legacy epic store is read for migration only; kept as one document
                CREATE TABLE IF NOT EXISTS legacy_tasks (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    version TEXT NOT NULL,
                    payload TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS delegations (
                    id TEXT PRIMARY KEY,
                    position INTEGER NOT NULL,
                    session_id TEXT,
                    delegated_by TEXT,
                    assigned_to TEXT NOT NULL,
                    task_id TEXT,
                    description TEXT NOT NULL,
                    status TEXT NOT NULL,
                    result TEXT,
                    created_at TEXT NOT NULL,
                    completed_at TEXT
                );
                "#,
            )?;
            self.set_schema_version(1)?;
        }

        // Migration 2: task graph
        if current_version < 2 {
            info!("Running migration 2: Task graph tables");
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS graph_meta (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    active_work_plan_id TEXT
                );

                CREATE TABLE IF NOT EXISTS work_plans (
                    id TEXT PRIMARY KEY,
                    position INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    acceptance TEXT NOT NULL,
                    category TEXT NOT NULL,
                    governance_level TEXT NOT NULL,
                    status TEXT NOT NULL,
                    owner_agent TEXT,
                    created_at TEXT NOT NULL,
                    modified_at TEXT NOT NULL,
                    purged_at TEXT
                );

                -- list: 'committed' or 'plan_ahead'
                CREATE TABLE IF NOT EXISTS task_nodes (
                    id TEXT PRIMARY KEY,
                    plan_id TEXT NOT NULL REFERENCES work_plans(id) ON DELETE CASCADE,
                    list TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    expected_output TEXT NOT NULL,
                    status TEXT NOT NULL,
                    delegated_by TEXT,
                    assigned_to TEXT,
                    allowed_tools TEXT NOT NULL,
                    depends_on TEXT NOT NULL,
                    temporal_gate TEXT,
                    artifacts TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    modified_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    result TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_task_nodes_plan
                    ON task_nodes(plan_id, list, position);

                CREATE TABLE IF NOT EXISTS checkpoints (
                    task_id TEXT NOT NULL REFERENCES task_nodes(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    id TEXT NOT NULL,
                    tool TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    files TEXT NOT NULL,
                    PRIMARY KEY (task_id, position)
                );
                "#,
            )?;
            self.set_schema_version(2)?;
        }

        info!("Migrations complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_migrations_reach_target_and_are_idempotent() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("govern.db");

        let db = Database::new(&path).expect("Failed to open database");
        assert_eq!(db.get_schema_version(), SCHEMA_VERSION);
        drop(db);

        let db = Database::new(&path).expect("Failed to reopen database");
        assert_eq!(db.get_schema_version(), SCHEMA_VERSION);
        let rows: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_creates_parent_directory() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("nested").join("govern.db");
        Database::new(&path).expect("Failed to open database");
        assert!(path.exists());
    }
}
