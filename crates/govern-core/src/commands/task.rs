//! Task-level commands: quick_start, start, complete, fail, review, status

use chrono::Utc;
use tracing::info;

use super::plan::{format_breaks, format_task};
use super::{required, CommandError, CommandResult};
use crate::graph::{
    activate_plan, add_task, complete_task, fail_task, review_task, start_task, PlanCategory,
    TaskNode, TaskResult, TaskStatus, WorkPlan,
};
use crate::storage::{ActiveTaskRef, PersistenceContext};

/// Evidence supplied with `complete`
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub target_id: Option<String>,
    pub evidence: String,
    pub files: Vec<String>,
    pub tests: Vec<String>,
}

/// Explicit target, or the session's active task
fn resolve_target(
    ctx: &PersistenceContext,
    session_id: &str,
    target_id: Option<&str>,
) -> Result<String, CommandError> {
    if let Some(id) = target_id.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(id.to_string());
    }
    ctx.session(session_id)
        .active_task
        .map(|t| t.id)
        .ok_or(CommandError::MissingArgument("target_id"))
}

/// Drop `task_id` from every session that has it active
fn release_sessions(ctx: &PersistenceContext, task_id: &str) {
    for session_id in ctx.sessions_on_task(task_id) {
        ctx.update_session(&session_id, |s| s.clear_task(task_id));
    }
}

fn adopt(ctx: &PersistenceContext, session_id: &str, task: ActiveTaskRef) {
    ctx.update_session(session_id, |s| s.active_task = Some(task));
}

/// Create-and-start in one step, reusing the active plan when there is one
pub fn quick_start(
    ctx: &PersistenceContext,
    session_id: &str,
    agent: Option<&str>,
    name: Option<&str>,
    expected_output: Option<&str>,
) -> CommandResult {
    let name = required(name, "name")?;
    let lock = ctx.session_lock(session_id);
    let _guard = lock.lock();
    let expected_output = expected_output
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or(name);

    if let Some(current) = ctx.session(session_id).active_task {
        let live = ctx.with_graph(|g| {
            g.find_node(&current.id)
                .map(|n| matches!(n.status, TaskStatus::Active | TaskStatus::Review))
                .unwrap_or(false)
        });
        if live {
            return Err(CommandError::InvalidState(format!(
                "session already working on {} \"{}\"; complete or fail it first",
                current.id, current.name
            )));
        }
    }

    let (plan_id, created, task) = ctx.try_update_graph(|graph| {
        let now = Utc::now();
        let (plan_id, created) = match graph.active_plan() {
            Some(plan) => (plan.id.clone(), false),
            None => {
                let mut plan = WorkPlan::new(name);
                plan.category = PlanCategory::AdHoc;
                plan.owner_agent = agent.map(String::from);
                let id = plan.id.clone();
                graph.work_plans.push(plan);
                activate_plan(graph, &id, now)?;
                (id, true)
            }
        };
        let task_id = add_task(graph, TaskNode::new(&plan_id, name, expected_output), false)?;
        start_task(graph, &task_id, now)?;
        Ok::<_, CommandError>((
            plan_id,
            created,
            ActiveTaskRef {
                id: task_id,
                name: name.to_string(),
            },
        ))
    })?;

    let task_id = task.id.clone();
    adopt(ctx, session_id, task);
    info!(session_id, task_id = %task_id, plan_id = %plan_id, created, "Quick start");
    let plan_note = if created {
        format!("created plan {}", plan_id)
    } else {
        format!("in active plan {}", plan_id)
    };
    Ok(format!(
        "Started task {} \"{}\" ({}). Writes are now permitted for this session.",
        task_id, name, plan_note
    ))
}

/// Start a task and make it the session's active task
pub fn start(
    ctx: &PersistenceContext,
    session_id: &str,
    target_id: Option<&str>,
) -> CommandResult {
    let task_id = required(target_id, "target_id")?;
    let lock = ctx.session_lock(session_id);
    let _guard = lock.lock();
    let task = ctx.try_update_graph(|graph| {
        start_task(graph, task_id, Utc::now())?;
        graph
            .find_node(task_id)
            .map(ActiveTaskRef::from)
            .ok_or_else(|| CommandError::NotFound(format!("task {}", task_id)))
    })?;
    let name = task.name.clone();
    adopt(ctx, session_id, task);
    info!(session_id, task_id, "Session task started");
    Ok(format!("Started task {} \"{}\"", task_id, name))
}

/// Complete a task with evidence; defaults to the session's active task
pub fn complete(
    ctx: &PersistenceContext,
    session_id: &str,
    completion: Completion,
) -> CommandResult {
    let lock = ctx.session_lock(session_id);
    let _guard = lock.lock();
    let task_id = resolve_target(ctx, session_id, completion.target_id.as_deref())?;

    let started_at = ctx.with_graph(|g| g.find_node(&task_id).and_then(|n| n.started_at));
    let anchors: Vec<String> = match started_at {
        Some(since) => ctx
            .anchors(session_id)
            .into_iter()
            .filter(|a| a.created_at >= since)
            .map(|a| a.id)
            .collect(),
        None => Vec::new(),
    };

    let result = TaskResult {
        evidence: completion.evidence,
        files: completion.files,
        tests: completion.tests,
        anchors,
    };
    let report = ctx.try_update_graph(|graph| complete_task(graph, &task_id, result, Utc::now()))?;
    release_sessions(ctx, &task_id);

    let mut out = format!("Completed task {}", task_id);
    if !report.unblocked.is_empty() {
        out.push_str(&format!("\nUnblocked (now planned): {}", report.unblocked.join(", ")));
    }
    if report.plan_completed {
        out.push_str("\nPlan completed");
    }
    Ok(out)
}

/// Fail a task with a reason; dependents become blocked
pub fn fail(
    ctx: &PersistenceContext,
    target_id: Option<&str>,
    reason: Option<&str>,
) -> CommandResult {
    let task_id = required(target_id, "target_id")?;
    let reason = required(reason, "reason")?;
    let report = ctx.try_update_graph(|graph| fail_task(graph, task_id, reason, Utc::now()))?;
    release_sessions(ctx, task_id);

    let mut out = format!("Failed task {}: {}", task_id, reason);
    if !report.blocked.is_empty() {
        out.push_str(&format!("\nBlocked dependents: {}", report.blocked.join(", ")));
    }
    if report.plan_completed {
        out.push_str("\nPlan completed");
    }
    Ok(out)
}

/// Move a task into review; defaults to the session's active task
pub fn review(
    ctx: &PersistenceContext,
    session_id: &str,
    target_id: Option<&str>,
) -> CommandResult {
    let lock = ctx.session_lock(session_id);
    let _guard = lock.lock();
    let task_id = resolve_target(ctx, session_id, target_id)?;
    ctx.try_update_graph(|graph| review_task(graph, &task_id, Utc::now()))?;
    Ok(format!("Task {} is in review", task_id))
}

/// The session's active task and any graph breaks
pub fn status(ctx: &PersistenceContext, session_id: &str) -> CommandResult {
    let session = ctx.session(session_id);
    ctx.with_graph(|graph| {
        let mut sections = Vec::new();
        match &session.active_task {
            Some(task) => match graph.find_node(&task.id) {
                Some(node) => sections.push(format_task(node)),
                None => {
                    sections.push(format!("Active task {} \"{}\" (legacy)", task.id, task.name))
                }
            },
            None => sections.push(format!("Session {} has no active task", session_id)),
        }
        if let Some(agent) = &session.agent {
            sections.push(format!("Agent: {}", agent));
        }
        if let Some(warnings) = format_breaks(graph) {
            sections.push(warnings);
        }
        Ok(sections.join("\n\n"))
    })
}
