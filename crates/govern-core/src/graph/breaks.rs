//! Chain-break detection and abandoned-plan purging

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::types::{PlanStatus, TaskGraph, TaskStatus};

/// An inconsistency found in an active plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphBreak {
    /// Active plan with unfinished work but nothing in flight
    NoActiveTask {
        plan_id: String,
        startable: usize,
        blocked: usize,
    },
    /// Task active past the staleness threshold with no checkpoints
    StaleTask {
        plan_id: String,
        task_id: String,
        active_minutes: i64,
    },
    /// Dependency or temporal gate pointing at nothing
    BrokenReference {
        plan_id: String,
        task_id: String,
        missing: String,
    },
}

impl std::fmt::Display for GraphBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphBreak::NoActiveTask {
                plan_id,
                startable,
                blocked,
            } => {
                if *startable > 0 {
                    write!(
                        f,
                        "plan {} has no active task but {} startable task(s)",
                        plan_id, startable
                    )
                } else {
                    write!(
                        f,
                        "plan {} has no active task and all {} remaining task(s) are blocked",
                        plan_id, blocked
                    )
                }
            }
            GraphBreak::StaleTask {
                task_id,
                active_minutes,
                ..
            } => write!(
                f,
                "task {} active for {} minutes with no checkpoints",
                task_id, active_minutes
            ),
            GraphBreak::BrokenReference {
                task_id, missing, ..
            } => write!(f, "task {} references missing task {}", task_id, missing),
        }
    }
}

/// Scan every active plan for chain breaks
pub fn detect_graph_breaks(
    graph: &TaskGraph,
    stale_after: std::time::Duration,
    now: DateTime<Utc>,
) -> Vec<GraphBreak> {
    let stale_after = Duration::from_std(stale_after).unwrap_or_else(|_| Duration::minutes(30));
    let mut breaks = Vec::new();

    for plan in graph
        .visible_plans()
        .filter(|p| p.status == PlanStatus::Active)
    {
        let in_flight = plan
            .tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Active | TaskStatus::Review));
        let startable = plan.count_with_status(TaskStatus::Planned);
        let blocked = plan.count_with_status(TaskStatus::Blocked);
        if !in_flight && startable + blocked > 0 {
            breaks.push(GraphBreak::NoActiveTask {
                plan_id: plan.id.clone(),
                startable,
                blocked,
            });
        }

        for task in plan.tasks.iter().filter(|t| t.status == TaskStatus::Active) {
            let Some(started) = task.started_at else {
                continue;
            };
            let elapsed = now - started;
            if elapsed > stale_after && task.checkpoints.is_empty() {
                breaks.push(GraphBreak::StaleTask {
                    plan_id: plan.id.clone(),
                    task_id: task.id.clone(),
                    active_minutes: elapsed.num_minutes(),
                });
            }
        }

        for task in plan.all_nodes() {
            let refs = task
                .depends_on
                .iter()
                .chain(task.temporal_gate.as_ref().map(|g| &g.after));
            for missing in refs.filter(|id| graph.find_node(id).is_none()) {
                breaks.push(GraphBreak::BrokenReference {
                    plan_id: plan.id.clone(),
                    task_id: task.id.clone(),
                    missing: missing.clone(),
                });
            }
        }
    }

    breaks
}

/// Soft-delete abandoned plans untouched for longer than `threshold`.
///
/// Purged plans stay in the graph for audit; views skip them.
pub fn purge_abandoned_plans(
    graph: &mut TaskGraph,
    threshold: std::time::Duration,
    now: DateTime<Utc>,
) -> Vec<String> {
    let threshold = Duration::from_std(threshold).unwrap_or_else(|_| Duration::hours(48));
    let mut purged = Vec::new();
    for plan in graph.work_plans.iter_mut() {
        if plan.status == PlanStatus::Abandoned
            && plan.purged_at.is_none()
            && now - plan.modified_at > threshold
        {
            plan.purged_at = Some(now);
            purged.push(plan.id.clone());
        }
    }
    if !purged.is_empty() {
        info!(count = purged.len(), "Purged abandoned plans");
    }
    purged
}
