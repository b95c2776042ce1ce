//! State transitions over the task graph
//!
//! Every mutation of plan or node status goes through here so the
//! dependency rules hold in one place: completion relaxes blocked
//! dependents to `planned`, failure forces dependents to `blocked`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use super::types::{PlanStatus, TaskGraph, TaskNode, TaskResult, TaskStatus, WorkPlan};
use super::validation::{
    prerequisites_met, validate_task_completion, validate_task_start, Denial, Validation,
};

/// Why a transition could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("{0}")]
    Denied(Denial),

    #[error("plan conflict: {0}")]
    PlanConflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<Denial> for TransitionError {
    fn from(denial: Denial) -> Self {
        TransitionError::Denied(denial)
    }
}

/// Side effects of completing a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    /// Sibling nodes relaxed from `blocked` to `planned`
    pub unblocked: Vec<String>,
    /// Whether the owning plan became `completed`
    pub plan_completed: bool,
}

/// Side effects of failing a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureReport {
    /// Dependents forced to `blocked`
    pub blocked: Vec<String>,
    pub plan_completed: bool,
}

/// Make `plan` the single active plan
pub fn activate_plan(
    graph: &mut TaskGraph,
    plan_id: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if let Some(current) = graph.active_plan() {
        if current.id != plan_id {
            return Err(TransitionError::PlanConflict(format!(
                "plan {} \"{}\" is already active",
                current.id, current.name
            )));
        }
    }
    let plan = graph
        .find_plan_mut(plan_id)
        .ok_or_else(|| TransitionError::PlanNotFound(plan_id.to_string()))?;
    if !matches!(plan.status, PlanStatus::Draft | PlanStatus::Active) {
        return Err(TransitionError::PlanConflict(format!(
            "plan {} is {} and cannot be activated",
            plan.id, plan.status
        )));
    }
    plan.status = PlanStatus::Active;
    plan.modified_at = now;
    graph.active_work_plan_id = Some(plan_id.to_string());
    Ok(())
}

/// Add `node` to its plan, auto-blocking it when prerequisites are pending.
///
/// Dependency and temporal-gate references must resolve somewhere in the
/// graph; a dangling reference is refused as a broken chain.
pub fn add_task(
    graph: &mut TaskGraph,
    mut node: TaskNode,
    plan_ahead: bool,
) -> Result<String, TransitionError> {
    let refs = node
        .depends_on
        .iter()
        .chain(node.temporal_gate.as_ref().map(|g| &g.after));
    for dep in refs {
        if graph.find_node(dep).is_none() {
            return Err(Denial::BrokenChain {
                task_id: node.id.clone(),
                missing: dep.clone(),
            }
            .into());
        }
    }

    node.status = if prerequisites_met(graph, &node) {
        TaskStatus::Planned
    } else {
        TaskStatus::Blocked
    };

    let plan = graph
        .find_plan_mut(&node.plan_id)
        .ok_or_else(|| TransitionError::PlanNotFound(node.plan_id.clone()))?;
    plan.modified_at = node.created_at;
    let id = node.id.clone();
    debug!(task_id = %id, status = %node.status, plan_ahead, "Task added");
    if plan_ahead {
        plan.plan_ahead.push(node);
    } else {
        plan.tasks.push(node);
    }
    Ok(id)
}

/// Move a plan-ahead node into the committed list (no-op if already committed)
fn promote_plan_ahead(plan: &mut WorkPlan, task_id: &str) {
    if let Some(pos) = plan.plan_ahead.iter().position(|t| t.id == task_id) {
        let node = plan.plan_ahead.remove(pos);
        plan.tasks.push(node);
    }
}

/// Start a node: validate, mark `active`, and activate its plan if needed
pub fn start_task(
    graph: &mut TaskGraph,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let node = graph
        .find_node(task_id)
        .ok_or_else(|| TransitionError::TaskNotFound(task_id.to_string()))?;
    if let Validation::Denied(denial) = validate_task_start(graph, node) {
        return Err(denial.into());
    }
    let plan_id = node.plan_id.clone();
    activate_plan(graph, &plan_id, now)?;

    let plan = graph
        .find_plan_mut(&plan_id)
        .ok_or_else(|| TransitionError::PlanNotFound(plan_id.clone()))?;
    promote_plan_ahead(plan, task_id);
    plan.modified_at = now;
    if let Some(node) = plan.find_task_mut(task_id) {
        node.status = TaskStatus::Active;
        node.started_at = Some(now);
        node.modified_at = now;
    }
    info!(task_id, plan_id = %plan_id, "Task started");
    Ok(())
}

/// Move an active node into review
pub fn review_task(
    graph: &mut TaskGraph,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let node = graph
        .find_node_mut(task_id)
        .ok_or_else(|| TransitionError::TaskNotFound(task_id.to_string()))?;
    if node.status != TaskStatus::Active {
        return Err(TransitionError::InvalidState(format!(
            "task {} is {}; only active tasks can move to review",
            node.id, node.status
        )));
    }
    node.status = TaskStatus::Review;
    node.modified_at = now;
    Ok(())
}

/// Mark the owning plan completed if every committed node is terminal
fn settle_plan(graph: &mut TaskGraph, plan_id: &str, now: DateTime<Utc>) -> bool {
    let Some(plan) = graph.find_plan_mut(plan_id) else {
        return false;
    };
    if plan.status != PlanStatus::Active || !plan.is_complete() {
        return false;
    }
    plan.status = PlanStatus::Completed;
    plan.modified_at = now;
    if graph.active_work_plan_id.as_deref() == Some(plan_id) {
        graph.active_work_plan_id = None;
    }
    info!(plan_id, "Plan completed");
    true
}

/// Complete a node with evidence.
///
/// Blocked siblings whose prerequisites are now all completed are relaxed to
/// `planned`; they are never started implicitly.
pub fn complete_task(
    graph: &mut TaskGraph,
    task_id: &str,
    result: TaskResult,
    now: DateTime<Utc>,
) -> Result<CompletionReport, TransitionError> {
    let node = graph
        .find_node(task_id)
        .ok_or_else(|| TransitionError::TaskNotFound(task_id.to_string()))?;
    if let Validation::Denied(denial) = validate_task_completion(node, &result.evidence) {
        return Err(denial.into());
    }
    let plan_id = node.plan_id.clone();

    if let Some(node) = graph.find_node_mut(task_id) {
        node.status = TaskStatus::Completed;
        node.completed_at = Some(now);
        node.modified_at = now;
        node.result = Some(result);
    }

    let unblocked: Vec<String> = graph
        .find_plan(&plan_id)
        .map(|plan| {
            plan.all_nodes()
                .filter(|t| t.status == TaskStatus::Blocked && prerequisites_met(graph, t))
                .map(|t| t.id.clone())
                .collect()
        })
        .unwrap_or_default();

    if let Some(plan) = graph.find_plan_mut(&plan_id) {
        for id in &unblocked {
            if let Some(t) = plan.find_task_mut(id) {
                t.status = TaskStatus::Planned;
                t.modified_at = now;
            }
        }
        plan.modified_at = now;
    }

    let plan_completed = settle_plan(graph, &plan_id, now);
    info!(task_id, unblocked = unblocked.len(), plan_completed, "Task completed");
    Ok(CompletionReport {
        unblocked,
        plan_completed,
    })
}

/// Fail a node and force its `planned`/`blocked` dependents to `blocked`
pub fn fail_task(
    graph: &mut TaskGraph,
    task_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<FailureReport, TransitionError> {
    let node = graph
        .find_node_mut(task_id)
        .ok_or_else(|| TransitionError::TaskNotFound(task_id.to_string()))?;
    match node.status {
        TaskStatus::Completed => return Err(Denial::AlreadyCompleted.into()),
        TaskStatus::Failed => return Err(Denial::AlreadyFailed.into()),
        _ => {}
    }
    node.status = TaskStatus::Failed;
    node.modified_at = now;
    node.completed_at = Some(now);
    node.result = Some(TaskResult::evidence(reason));
    let plan_id = node.plan_id.clone();

    let mut blocked = Vec::new();
    if let Some(plan) = graph.find_plan_mut(&plan_id) {
        for t in plan.tasks.iter_mut().chain(plan.plan_ahead.iter_mut()) {
            if t.depends_on.iter().any(|d| d == task_id)
                && matches!(t.status, TaskStatus::Planned | TaskStatus::Blocked)
            {
                t.status = TaskStatus::Blocked;
                t.modified_at = now;
                blocked.push(t.id.clone());
            }
        }
        plan.modified_at = now;
    }

    let plan_completed = settle_plan(graph, &plan_id, now);
    info!(task_id, blocked = blocked.len(), "Task failed");
    Ok(FailureReport {
        blocked,
        plan_completed,
    })
}
