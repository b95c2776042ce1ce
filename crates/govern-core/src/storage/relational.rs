//! Relational backend: the same logical stores mapped onto SQLite tables

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::anchor::Anchor;
use super::backend::{StateSnapshot, StorageBackend, StorageError, StoreKind};
use super::database::Database;
use super::delegation::{Delegation, DelegationStore};
use super::session::{ActiveTaskRef, BlockedCall, SessionState};
use crate::constants::storage::STORE_VERSION;
use crate::graph::{Checkpoint, LegacyTaskStore, TaskGraph, TaskNode, WorkPlan};

const LIST_COMMITTED: &str = "committed";
const LIST_PLAN_AHEAD: &str = "plan_ahead";

pub struct RelationalBackend {
    db: Mutex<Database>,
}

impl RelationalBackend {
    /// Open the database file, running any pending migrations
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Database::new(path)?;
        Ok(Self { db: Mutex::new(db) })
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn malformed(store: StoreKind, reason: impl std::fmt::Display) -> StorageError {
    StorageError::Malformed {
        store,
        reason: reason.to_string(),
    }
}

fn parse_ts(store: StoreKind, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| malformed(store, format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_opt_ts(
    store: StoreKind,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.map(|r| parse_ts(store, &r)).transpose()
}

fn parse_enum<T: FromStr<Err = String>>(store: StoreKind, raw: &str) -> Result<T, StorageError> {
    raw.parse::<T>().map_err(|e| malformed(store, e))
}

fn parse_json<T: DeserializeOwned>(store: StoreKind, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| malformed(store, e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}

fn has_store(conn: &Connection, kind: StoreKind) -> Result<bool, StorageError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT version FROM store_meta WHERE store = ?1",
            [kind.name()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn mark_saved(tx: &Transaction<'_>, kind: StoreKind) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO store_meta (store, version, last_saved) VALUES (?1, ?2, ?3)
         ON CONFLICT(store) DO UPDATE SET version = excluded.version, last_saved = excluded.last_saved",
        params![kind.name(), STORE_VERSION, ts(&Utc::now())],
    )?;
    Ok(())
}

struct PlanRow {
    id: String,
    name: String,
    acceptance: String,
    category: String,
    governance_level: String,
    status: String,
    owner_agent: Option<String>,
    created_at: String,
    modified_at: String,
    purged_at: Option<String>,
}

struct NodeRow {
    id: String,
    plan_id: String,
    list: String,
    name: String,
    expected_output: String,
    status: String,
    delegated_by: Option<String>,
    assigned_to: Option<String>,
    allowed_tools: String,
    depends_on: String,
    temporal_gate: Option<String>,
    artifacts: String,
    created_at: String,
    modified_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    result: Option<String>,
}

struct CheckpointRow {
    task_id: String,
    id: String,
    tool: String,
    timestamp: String,
    summary: String,
    files: String,
}

impl NodeRow {
    fn into_node(self, checkpoints: Vec<Checkpoint>) -> Result<TaskNode, StorageError> {
        const G: StoreKind = StoreKind::Graph;
        Ok(TaskNode {
            id: self.id,
            plan_id: self.plan_id,
            name: self.name,
            expected_output: self.expected_output,
            status: parse_enum(G, &self.status)?,
            delegated_by: self.delegated_by,
            assigned_to: self.assigned_to,
            allowed_tools: parse_json(G, &self.allowed_tools)?,
            depends_on: parse_json(G, &self.depends_on)?,
            temporal_gate: self.temporal_gate.map(|g| parse_json(G, &g)).transpose()?,
            checkpoints,
            artifacts: parse_json(G, &self.artifacts)?,
            created_at: parse_ts(G, &self.created_at)?,
            modified_at: parse_ts(G, &self.modified_at)?,
            started_at: parse_opt_ts(G, self.started_at)?,
            completed_at: parse_opt_ts(G, self.completed_at)?,
            result: self.result.map(|r| parse_json(G, &r)).transpose()?,
        })
    }
}

fn insert_node(
    tx: &Transaction<'_>,
    plan_id: &str,
    list: &str,
    position: usize,
    node: &TaskNode,
) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO task_nodes (id, plan_id, list, position, name, expected_output, status,
            delegated_by, assigned_to, allowed_tools, depends_on, temporal_gate, artifacts,
            created_at, modified_at, started_at, completed_at, result)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            node.id,
            plan_id,
            list,
            position as i64,
            node.name,
            node.expected_output,
            node.status.to_string(),
            node.delegated_by,
            node.assigned_to,
            to_json(&node.allowed_tools)?,
            to_json(&node.depends_on)?,
            node.temporal_gate.as_ref().map(to_json).transpose()?,
            to_json(&node.artifacts)?,
            ts(&node.created_at),
            ts(&node.modified_at),
            opt_ts(&node.started_at),
            opt_ts(&node.completed_at),
            node.result.as_ref().map(to_json).transpose()?,
        ],
    )?;
    for (i, cp) in node.checkpoints.iter().enumerate() {
        tx.execute(
            "INSERT INTO checkpoints (task_id, position, id, tool, timestamp, summary, files)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                node.id,
                i as i64,
                cp.id,
                cp.tool,
                ts(&cp.timestamp),
                cp.summary,
                to_json(&cp.files)?,
            ],
        )?;
    }
    Ok(())
}

impl StorageBackend for RelationalBackend {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn load_state(&self) -> Result<Option<StateSnapshot>, StorageError> {
        const S: StoreKind = StoreKind::State;
        let db = self.db.lock();
        let conn = db.conn();
        if !has_store(conn, S)? {
            return Ok(None);
        }

        let mut snapshot = StateSnapshot::default();
        let mut stmt = conn.prepare(
            "SELECT session_id, active_task_id, active_task_name, last_block_tool, last_block_at,
                    agent, updated_at
             FROM sessions ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (session_id, task_id, task_name, block_tool, block_at, agent, updated_at) in rows {
            let active_task = match (task_id, task_name) {
                (Some(id), Some(name)) => Some(ActiveTaskRef { id, name }),
                _ => None,
            };
            let last_block = match (block_tool, block_at) {
                (Some(tool), Some(at)) => Some(BlockedCall {
                    tool,
                    at: parse_ts(S, &at)?,
                }),
                _ => None,
            };
            let state = SessionState {
                session_id: session_id.clone(),
                active_task,
                last_block,
                agent,
                updated_at: parse_ts(S, &updated_at)?,
            };
            snapshot.sessions.insert(session_id, state);
        }

        let mut stmt = conn.prepare(
            "SELECT id, session_id, content, priority, created_at FROM anchors ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (id, session_id, content, priority, created_at) in rows {
            let anchor = Anchor {
                id,
                session_id: session_id.clone(),
                content,
                priority: parse_enum(S, &priority)?,
                created_at: parse_ts(S, &created_at)?,
            };
            snapshot.anchors.entry(session_id).or_default().push(anchor);
        }

        Ok(Some(snapshot))
    }

    fn save_state(&self, state: &StateSnapshot) -> Result<(), StorageError> {
        let mut db = self.db.lock();
        let tx = db.conn_mut().transaction()?;
        tx.execute("DELETE FROM sessions", [])?;
        tx.execute("DELETE FROM anchors", [])?;
        for s in state.sessions.values() {
            tx.execute(
                "INSERT INTO sessions (session_id, active_task_id, active_task_name,
                    last_block_tool, last_block_at, agent, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    s.session_id,
                    s.active_task.as_ref().map(|t| t.id.as_str()),
                    s.active_task.as_ref().map(|t| t.name.as_str()),
                    s.last_block.as_ref().map(|b| b.tool.as_str()),
                    s.last_block.as_ref().map(|b| ts(&b.at)),
                    s.agent,
                    ts(&s.updated_at),
                ],
            )?;
        }
        for anchor in state.anchors.values().flatten() {
            tx.execute(
                "INSERT INTO anchors (id, session_id, content, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    anchor.id,
                    anchor.session_id,
                    anchor.content,
                    anchor.priority.to_string(),
                    ts(&anchor.created_at),
                ],
            )?;
        }
        mark_saved(&tx, StoreKind::State)?;
        tx.commit()?;
        debug!(sessions = state.sessions.len(), "Saved state to relational store");
        Ok(())
    }

    fn load_tasks(&self) -> Result<Option<LegacyTaskStore>, StorageError> {
        let db = self.db.lock();
        let payload: Option<String> = db
            .conn()
            .query_row("SELECT payload FROM legacy_tasks WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        payload
            .map(|p| parse_json(StoreKind::Tasks, &p))
            .transpose()
    }

    fn save_tasks(&self, tasks: &LegacyTaskStore) -> Result<(), StorageError> {
        let mut db = self.db.lock();
        let tx = db.conn_mut().transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO legacy_tasks (id, version, payload) VALUES (1, ?1, ?2)",
            params![tasks.version, to_json(tasks)?],
        )?;
        mark_saved(&tx, StoreKind::Tasks)?;
        tx.commit()?;
        Ok(())
    }

    fn load_delegations(&self) -> Result<Option<DelegationStore>, StorageError> {
        const D: StoreKind = StoreKind::Delegations;
        let db = self.db.lock();
        let conn = db.conn();
        if !has_store(conn, D)? {
            return Ok(None);
        }
        let mut stmt = conn.prepare(
            "SELECT id, session_id, delegated_by, assigned_to, task_id, description, status,
                    result, created_at, completed_at
             FROM delegations ORDER BY position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut store = DelegationStore::default();
        for (
            id,
            session_id,
            delegated_by,
            assigned_to,
            task_id,
            description,
            status,
            result,
            created_at,
            completed_at,
        ) in rows
        {
            store.delegations.push(Delegation {
                id,
                session_id,
                delegated_by,
                assigned_to,
                task_id,
                description,
                status: parse_enum(D, &status)?,
                result,
                created_at: parse_ts(D, &created_at)?,
                completed_at: parse_opt_ts(D, completed_at)?,
            });
        }
        Ok(Some(store))
    }

    fn save_delegations(&self, delegations: &DelegationStore) -> Result<(), StorageError> {
        let mut db = self.db.lock();
        let tx = db.conn_mut().transaction()?;
        tx.execute("DELETE FROM delegations", [])?;
        for (i, d) in delegations.delegations.iter().enumerate() {
            tx.execute(
                "INSERT INTO delegations (id, position, session_id, delegated_by, assigned_to,
                    task_id, description, status, result, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    d.id,
                    i as i64,
                    d.session_id,
                    d.delegated_by,
                    d.assigned_to,
                    d.task_id,
                    d.description,
                    d.status.to_string(),
                    d.result,
                    ts(&d.created_at),
                    opt_ts(&d.completed_at),
                ],
            )?;
        }
        mark_saved(&tx, StoreKind::Delegations)?;
        tx.commit()?;
        Ok(())
    }

    fn load_graph(&self) -> Result<Option<TaskGraph>, StorageError> {
        const G: StoreKind = StoreKind::Graph;
        let db = self.db.lock();
        let conn = db.conn();
        if !has_store(conn, G)? {
            return Ok(None);
        }

        let active_work_plan_id: Option<String> = conn
            .query_row(
                "SELECT active_work_plan_id FROM graph_meta WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let mut stmt = conn.prepare(
            "SELECT task_id, id, tool, timestamp, summary, files
             FROM checkpoints ORDER BY task_id, position",
        )?;
        let cp_rows = stmt
            .query_map([], |row| {
                Ok(CheckpointRow {
                    task_id: row.get(0)?,
                    id: row.get(1)?,
                    tool: row.get(2)?,
                    timestamp: row.get(3)?,
                    summary: row.get(4)?,
                    files: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut checkpoints: HashMap<String, Vec<Checkpoint>> = HashMap::new();
        for row in cp_rows {
            let cp = Checkpoint {
                id: row.id,
                tool: row.tool,
                timestamp: parse_ts(G, &row.timestamp)?,
                summary: row.summary,
                files: parse_json(G, &row.files)?,
            };
            checkpoints.entry(row.task_id).or_default().push(cp);
        }

        let mut stmt = conn.prepare(
            "SELECT id, plan_id, list, name, expected_output, status, delegated_by, assigned_to,
                    allowed_tools, depends_on, temporal_gate, artifacts, created_at, modified_at,
                    started_at, completed_at, result
             FROM task_nodes ORDER BY plan_id, list, position",
        )?;
        let node_rows = stmt
            .query_map([], |row| {
                Ok(NodeRow {
                    id: row.get(0)?,
                    plan_id: row.get(1)?,
                    list: row.get(2)?,
                    name: row.get(3)?,
                    expected_output: row.get(4)?,
                    status: row.get(5)?,
                    delegated_by: row.get(6)?,
                    assigned_to: row.get(7)?,
                    allowed_tools: row.get(8)?,
                    depends_on: row.get(9)?,
                    temporal_gate: row.get(10)?,
                    artifacts: row.get(11)?,
                    created_at: row.get(12)?,
                    modified_at: row.get(13)?,
                    started_at: row.get(14)?,
                    completed_at: row.get(15)?,
                    result: row.get(16)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut committed: HashMap<String, Vec<TaskNode>> = HashMap::new();
        let mut plan_ahead: HashMap<String, Vec<TaskNode>> = HashMap::new();
        for row in node_rows {
            let target = match row.list.as_str() {
                LIST_COMMITTED => &mut committed,
                LIST_PLAN_AHEAD => &mut plan_ahead,
                other => return Err(malformed(G, format!("unknown node list {:?}", other))),
            };
            let plan_id = row.plan_id.clone();
            let cps = checkpoints.remove(&row.id).unwrap_or_default();
            target.entry(plan_id).or_default().push(row.into_node(cps)?);
        }

        let mut stmt = conn.prepare(
            "SELECT id, name, acceptance, category, governance_level, status, owner_agent,
                    created_at, modified_at, purged_at
             FROM work_plans ORDER BY position",
        )?;
        let plan_rows = stmt
            .query_map([], |row| {
                Ok(PlanRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    acceptance: row.get(2)?,
                    category: row.get(3)?,
                    governance_level: row.get(4)?,
                    status: row.get(5)?,
                    owner_agent: row.get(6)?,
                    created_at: row.get(7)?,
                    modified_at: row.get(8)?,
                    purged_at: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut work_plans = Vec::with_capacity(plan_rows.len());
        for row in plan_rows {
            work_plans.push(WorkPlan {
                tasks: committed.remove(&row.id).unwrap_or_default(),
                plan_ahead: plan_ahead.remove(&row.id).unwrap_or_default(),
                acceptance: parse_json(G, &row.acceptance)?,
                category: parse_enum(G, &row.category)?,
                governance_level: parse_enum(G, &row.governance_level)?,
                status: parse_enum(G, &row.status)?,
                owner_agent: row.owner_agent,
                created_at: parse_ts(G, &row.created_at)?,
                modified_at: parse_ts(G, &row.modified_at)?,
                purged_at: parse_opt_ts(G, row.purged_at)?,
                id: row.id,
                name: row.name,
            });
        }

        Ok(Some(TaskGraph {
            active_work_plan_id,
            work_plans,
        }))
    }

    fn save_graph(&self, graph: &TaskGraph) -> Result<(), StorageError> {
        let mut db = self.db.lock();
        let tx = db.conn_mut().transaction()?;
        tx.execute("DELETE FROM checkpoints", [])?;
        tx.execute("DELETE FROM task_nodes", [])?;
        tx.execute("DELETE FROM work_plans", [])?;
        tx.execute(
            "INSERT OR REPLACE INTO graph_meta (id, active_work_plan_id) VALUES (1, ?1)",
            params![graph.active_work_plan_id],
        )?;
        for (i, plan) in graph.work_plans.iter().enumerate() {
            tx.execute(
                "INSERT INTO work_plans (id, position, name, acceptance, category,
                    governance_level, status, owner_agent, created_at, modified_at, purged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    plan.id,
                    i as i64,
                    plan.name,
                    to_json(&plan.acceptance)?,
                    plan.category.to_string(),
                    plan.governance_level.to_string(),
                    plan.status.to_string(),
                    plan.owner_agent,
                    ts(&plan.created_at),
                    ts(&plan.modified_at),
                    opt_ts(&plan.purged_at),
                ],
            )?;
            for (pos, node) in plan.tasks.iter().enumerate() {
                insert_node(&tx, &plan.id, LIST_COMMITTED, pos, node)?;
            }
            for (pos, node) in plan.plan_ahead.iter().enumerate() {
                insert_node(&tx, &plan.id, LIST_PLAN_AHEAD, pos, node)?;
            }
        }
        mark_saved(&tx, StoreKind::Graph)?;
        tx.commit()?;
        debug!(plans = graph.work_plans.len(), "Saved graph to relational store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PlanCategory, PlanStatus, TaskResult, TaskStatus};
    use crate::storage::anchor::AnchorPriority;
    use crate::storage::delegation::DelegationStatus;
    use tempfile::TempDir;

    fn backend(temp: &TempDir) -> RelationalBackend {
        RelationalBackend::open(&temp.path().join("govern.db")).expect("Failed to open backend")
    }

    fn sample_graph() -> TaskGraph {
        let mut plan = WorkPlan::new("Ship parser");
        plan.category = PlanCategory::SpecKit;
        plan.status = PlanStatus::Active;
        plan.acceptance = vec!["tests pass".into()];

        let mut done = TaskNode::new(&plan.id, "Lexer", "tokens");
        done.status = TaskStatus::Completed;
        done.completed_at = Some(Utc::now());
        done.result = Some(TaskResult::evidence("lexer.rs written"));
        done.record_checkpoint(Checkpoint::new(
            "write",
            "write: lexer.rs",
            vec!["lexer.rs".into()],
        ));
        done.record_checkpoint(Checkpoint::new("bash", "bash: cargo test", vec![]));

        let next = TaskNode::new(&plan.id, "Parser", "ast")
            .with_depends_on(vec![done.id.clone()])
            .with_allowed_tools(vec!["read".into(), "write".into()]);
        let later =
            TaskNode::new(&plan.id, "Docs", "readme").with_temporal_gate(&next.id, "after parser");

        plan.tasks.push(done);
        plan.tasks.push(next);
        plan.plan_ahead.push(later);

        let mut other = WorkPlan::new("Old");
        other.status = PlanStatus::Abandoned;
        other.purged_at = Some(Utc::now());

        TaskGraph {
            active_work_plan_id: Some(plan.id.clone()),
            work_plans: vec![plan, other],
        }
    }

    #[test]
    fn test_empty_database_loads_as_none() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let backend = backend(&temp);
        assert!(backend.load_graph().unwrap().is_none());
        assert!(backend.load_state().unwrap().is_none());
        assert!(backend.load_tasks().unwrap().is_none());
        assert!(backend.load_delegations().unwrap().is_none());
    }

    #[test]
    fn test_graph_round_trip_preserves_order_and_lists() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let graph = sample_graph();
        backend(&temp).save_graph(&graph).unwrap();

        let reloaded = backend(&temp).load_graph().unwrap().expect("graph stored");
        assert_eq!(reloaded, graph);
    }

    #[test]
    fn test_graph_save_replaces_previous_contents() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let backend = backend(&temp);
        backend.save_graph(&sample_graph()).unwrap();

        let empty = TaskGraph::default();
        backend.save_graph(&empty).unwrap();
        assert_eq!(backend.load_graph().unwrap(), Some(empty));
    }

    #[test]
    fn test_state_round_trip() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut snapshot = StateSnapshot::default();
        let mut session = SessionState::new("s1");
        session.agent = Some("builder".into());
        session.active_task = Some(ActiveTaskRef {
            id: "tn-1".into(),
            name: "Lexer".into(),
        });
        session.last_block = Some(BlockedCall {
            tool: "write".into(),
            at: Utc::now(),
        });
        snapshot.sessions.insert("s1".into(), session);
        snapshot.sessions.insert("s2".into(), SessionState::new("s2"));
        snapshot.anchors.insert(
            "s1".into(),
            vec![
                Anchor::new("s1", "never touch prod", AnchorPriority::Critical),
                Anchor::new("s1", "prefer small diffs", AnchorPriority::Low),
            ],
        );

        backend(&temp).save_state(&snapshot).unwrap();
        assert_eq!(backend(&temp).load_state().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_delegations_and_legacy_round_trip() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let backend = backend(&temp);
        let store = DelegationStore {
            delegations: vec![Delegation {
                id: "dl-1".into(),
                session_id: Some("s1".into()),
                delegated_by: Some("planner".into()),
                assigned_to: "builder".into(),
                task_id: Some("tn-1".into()),
                description: "write the lexer".into(),
                status: DelegationStatus::Completed,
                result: Some("done".into()),
                created_at: Utc::now(),
                completed_at: Some(Utc::now()),
            }],
        };
        backend.save_delegations(&store).unwrap();
        assert_eq!(backend.load_delegations().unwrap(), Some(store));

        let legacy = LegacyTaskStore::default();
        backend.save_tasks(&legacy).unwrap();
        assert_eq!(backend.load_tasks().unwrap(), Some(legacy));
    }

    #[test]
    fn test_migrated_graph_with_shared_legacy_ids_saves() {
        use crate::graph::legacy::{Epic, EpicStatus, LegacyTask, LegacyTaskStatus};
        use crate::graph::migrate_legacy;

        let now = Utc::now();
        let epic = |id: &str| Epic {
            id: id.into(),
            name: format!("Epic {}", id),
            status: EpicStatus::Done,
            tasks: vec![LegacyTask {
                id: "task-1".into(),
                name: "Setup".into(),
                status: LegacyTaskStatus::Done,
                depends_on: vec![],
                subtasks: vec![],
                created_at: now,
                updated_at: now,
            }],
            created_at: now,
            updated_at: now,
        };
        let legacy = LegacyTaskStore {
            epics: vec![epic("ep-1"), epic("ep-2")],
            ..Default::default()
        };
        let mut graph = TaskGraph::default();
        migrate_legacy(&legacy, &mut graph);

        let temp = TempDir::new().expect("Failed to create temp dir");
        backend(&temp).save_graph(&graph).unwrap();
        assert_eq!(backend(&temp).load_graph().unwrap(), Some(graph));
    }
}
