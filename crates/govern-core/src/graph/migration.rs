//! Legacy store → task graph migration
//!
//! Epic → WorkPlan, Task → TaskNode, and only `done` subtasks become
//! Checkpoints. Pending and skipped subtasks carry no evidence and are
//! dropped. Ids are carried across, so re-running never duplicates a plan.
//! Node ids are unique graph-wide; a legacy task whose id is already taken
//! gets a fresh one, and dependencies inside its epic follow the rename.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use super::legacy::{EpicStatus, LegacyTask, LegacyTaskStatus, LegacyTaskStore, SubtaskStatus};
use super::types::{new_id, Checkpoint, PlanStatus, TaskGraph, TaskNode, TaskStatus, WorkPlan};
use crate::constants::storage::STORE_VERSION;

/// What a migration run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub plans_added: usize,
    pub checkpoints_created: usize,
    pub subtasks_dropped: usize,
    pub ids_reassigned: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.plans_added == 0
    }
}

fn plan_status(status: EpicStatus) -> PlanStatus {
    match status {
        EpicStatus::Planning => PlanStatus::Draft,
        EpicStatus::InProgress => PlanStatus::Active,
        EpicStatus::Done => PlanStatus::Completed,
        EpicStatus::Abandoned => PlanStatus::Abandoned,
    }
}

fn task_status(status: LegacyTaskStatus) -> TaskStatus {
    match status {
        LegacyTaskStatus::Pending => TaskStatus::Planned,
        LegacyTaskStatus::InProgress => TaskStatus::Active,
        LegacyTaskStatus::Blocked => TaskStatus::Blocked,
        LegacyTaskStatus::Done => TaskStatus::Completed,
        LegacyTaskStatus::Failed => TaskStatus::Failed,
    }
}

fn migrate_task(plan_id: &str, task: &LegacyTask, report: &mut MigrationReport) -> TaskNode {
    let mut node = TaskNode::new(plan_id, task.name.clone(), String::new());
    node.id = task.id.clone();
    node.status = task_status(task.status);
    node.depends_on = task.depends_on.clone();
    node.created_at = task.created_at;
    node.modified_at = task.updated_at;
    if node.status == TaskStatus::Active {
        node.started_at = Some(task.updated_at);
    }
    if node.status.is_terminal() {
        node.completed_at = Some(task.updated_at);
    }

    for subtask in &task.subtasks {
        if subtask.status != SubtaskStatus::Done {
            report.subtasks_dropped += 1;
            continue;
        }
        node.record_checkpoint(Checkpoint {
            id: subtask.id.clone(),
            tool: subtask.tool.clone().unwrap_or_else(|| "legacy".to_string()),
            timestamp: subtask.timestamp,
            summary: subtask.description.clone(),
            files: subtask.files.clone(),
        });
        report.checkpoints_created += 1;
    }
    // record_checkpoint moves modified_at forward; keep the legacy stamp
    node.modified_at = task.updated_at;
    node
}

/// Fold a legacy store into `graph`.
///
/// A legacy store already stamped with the current version, or epics whose
/// ids already exist in the graph, are skipped.
pub fn migrate_legacy(legacy: &LegacyTaskStore, graph: &mut TaskGraph) -> MigrationReport {
    let mut report = MigrationReport::default();
    if legacy.version == STORE_VERSION {
        return report;
    }

    let mut taken: HashSet<String> = graph
        .work_plans
        .iter()
        .flat_map(|p| p.all_nodes())
        .map(|n| n.id.clone())
        .collect();

    for epic in &legacy.epics {
        if graph.find_plan(&epic.id).is_some() {
            continue;
        }
        let mut plan = WorkPlan::new(epic.name.clone());
        plan.id = epic.id.clone();
        plan.status = plan_status(epic.status);
        plan.created_at = epic.created_at;
        plan.modified_at = epic.updated_at;

        let mut renamed: HashMap<String, String> = HashMap::new();
        let mut tasks: Vec<TaskNode> = Vec::with_capacity(epic.tasks.len());
        for task in &epic.tasks {
            let mut node = migrate_task(&epic.id, task, &mut report);
            if !taken.insert(node.id.clone()) {
                let fresh = new_id("tn");
                warn!(
                    epic = %epic.id,
                    old = %node.id,
                    new = %fresh,
                    "Legacy task id collides, reassigned"
                );
                renamed.insert(node.id.clone(), fresh.clone());
                taken.insert(fresh.clone());
                node.id = fresh;
                report.ids_reassigned += 1;
            }
            tasks.push(node);
        }
        for node in &mut tasks {
            for dep in &mut node.depends_on {
                if let Some(fresh) = renamed.get(dep) {
                    *dep = fresh.clone();
                }
            }
        }
        plan.tasks = tasks;
        graph.work_plans.push(plan);
        report.plans_added += 1;
    }

    if graph.active_work_plan_id.is_none() {
        if let Some(active) = legacy.active_epic_id.as_deref() {
            if graph
                .find_plan(active)
                .map(|p| p.status == PlanStatus::Active)
                .unwrap_or(false)
            {
                graph.active_work_plan_id = Some(active.to_string());
            }
        }
    }

    if !report.is_noop() {
        info!(
            plans = report.plans_added,
            checkpoints = report.checkpoints_created,
            dropped = report.subtasks_dropped,
            reassigned = report.ids_reassigned,
            "Migrated legacy task store"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::legacy::{Epic, Subtask};
    use chrono::{Duration, Utc};

    fn subtask(id: &str, status: SubtaskStatus, tool: Option<&str>) -> Subtask {
        Subtask {
            id: id.to_string(),
            description: format!("subtask {}", id),
            status,
            tool: tool.map(String::from),
            timestamp: Utc::now() - Duration::hours(2),
            files: vec![format!("{}.rs", id)],
        }
    }

    fn legacy_store() -> LegacyTaskStore {
        let now = Utc::now();
        LegacyTaskStore {
            active_epic_id: Some("ep-1".into()),
            epics: vec![Epic {
                id: "ep-1".into(),
                name: "Epic".into(),
                status: EpicStatus::InProgress,
                tasks: vec![LegacyTask {
                    id: "t-1".into(),
                    name: "Task".into(),
                    status: LegacyTaskStatus::InProgress,
                    depends_on: vec![],
                    subtasks: vec![
                        subtask("s-1", SubtaskStatus::Done, Some("write")),
                        subtask("s-2", SubtaskStatus::Pending, None),
                        subtask("s-3", SubtaskStatus::Skipped, None),
                        subtask("s-4", SubtaskStatus::Done, None),
                    ],
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
    fn test_only_done_subtasks_become_checkpoints() {
        let legacy = legacy_store();
        let mut graph = TaskGraph::default();
        let report = migrate_legacy(&legacy, &mut graph);

        assert_eq!(report.plans_added, 1);
        assert_eq!(report.checkpoints_created, 2);
        assert_eq!(report.subtasks_dropped, 2);

        let node = graph.find_node("t-1").unwrap();
        assert_eq!(node.status, TaskStatus::Active);
        assert_eq!(node.checkpoints.len(), 2);

        let original = &legacy.epics[0].tasks[0].subtasks[0];
        assert_eq!(node.checkpoints[0].id, "s-1");
        assert_eq!(node.checkpoints[0].tool, "write");
        assert_eq!(node.checkpoints[0].timestamp, original.timestamp);
        assert_eq!(node.checkpoints[1].tool, "legacy");
        assert_eq!(node.artifacts, vec!["s-1.rs".to_string(), "s-4.rs".to_string()]);
    }

    #[test]
    fn test_active_epic_becomes_active_pointer() {
        let mut graph = TaskGraph::default();
        migrate_legacy(&legacy_store(), &mut graph);
        assert_eq!(graph.active_work_plan_id.as_deref(), Some("ep-1"));
        assert_eq!(graph.active_plan().map(|p| p.status), Some(PlanStatus::Active));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let legacy = legacy_store();
        let mut graph = TaskGraph::default();
        migrate_legacy(&legacy, &mut graph);
        let snapshot = graph.clone();

        let again = migrate_legacy(&legacy, &mut graph);
        assert!(again.is_noop());
        assert_eq!(graph, snapshot);
    }

    #[test]
    fn test_colliding_task_ids_get_fresh_ids() {
        let mut legacy = legacy_store();
        let mut second = legacy.epics[0].clone();
        second.id = "ep-2".into();
        second.status = EpicStatus::Planning;
        let mut dependent = second.tasks[0].clone();
        dependent.id = "t-2".into();
        dependent.depends_on = vec!["t-1".into()];
        second.tasks.push(dependent);
        legacy.epics.push(second);

        let mut graph = TaskGraph::default();
        let report = migrate_legacy(&legacy, &mut graph);
        assert_eq!(report.plans_added, 2);
        assert_eq!(report.ids_reassigned, 1);

        let ids: Vec<&str> = graph
            .work_plans
            .iter()
            .flat_map(|p| p.all_nodes())
            .map(|n| n.id.as_str())
            .collect();
        let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len());

        let plan = graph.find_plan("ep-2").unwrap();
        let renamed = &plan.tasks[0].id;
        assert_ne!(renamed, "t-1");
        assert_eq!(plan.tasks[1].depends_on, vec![renamed.clone()]);
        assert_eq!(graph.find_node("t-1").map(|n| n.plan_id.as_str()), Some("ep-1"));
    }

    #[test]
    fn test_current_version_store_is_noop() {
        let mut legacy = legacy_store();
        legacy.version = STORE_VERSION.to_string();
        let mut graph = TaskGraph::default();
        assert!(migrate_legacy(&legacy, &mut graph).is_noop());
        assert!(graph.work_plans.is_empty());
    }
}
