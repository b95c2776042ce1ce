//! Plan-level commands: create, add_task, status, archive, abandon

use chrono::Utc;
use tracing::info;

use super::{required, CommandError, CommandResult};
use crate::constants::graph::STALE_ACTIVE_TASK;
use crate::graph::{
    activate_plan, add_task as add_graph_task, detect_graph_breaks, PlanCategory, PlanStatus,
    TaskGraph, TaskNode, TaskStatus, WorkPlan,
};
use crate::storage::PersistenceContext;

/// Arguments of `add_task`
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Plan to add to; the active plan when unset
    pub plan_id: Option<String>,
    pub name: String,
    pub expected_output: String,
    pub depends_on: Vec<String>,
    pub plan_ahead: bool,
    pub allowed_tools: Vec<String>,
    pub temporal_gate: Option<(String, String)>,
}

/// Create a plan and make it the active one
pub fn create(
    ctx: &PersistenceContext,
    agent: Option<&str>,
    name: Option<&str>,
    acceptance: Vec<String>,
    category: Option<&str>,
) -> CommandResult {
    let name = required(name, "name")?;
    let category = match category {
        Some(raw) => raw
            .parse::<PlanCategory>()
            .map_err(CommandError::InvalidArgument)?,
        None => PlanCategory::default(),
    };

    let mut plan = WorkPlan::new(name);
    plan.acceptance = acceptance;
    plan.category = category;
    plan.owner_agent = agent.map(String::from);
    let plan_id = plan.id.clone();

    ctx.try_update_graph(|graph| {
        if let Some(active) = graph.active_plan() {
            return Err(CommandError::InvalidState(format!(
                "plan {} \"{}\" is already active; complete, archive or abandon it first",
                active.id, active.name
            )));
        }
        graph.work_plans.push(plan);
        activate_plan(graph, &plan_id, Utc::now())?;
        Ok(())
    })?;
    info!(plan_id = %plan_id, category = %category, "Plan created");
    Ok(format!("Created plan {} \"{}\" ({}), now active", plan_id, name, category))
}

/// Add a task node to a plan; it starts `blocked` when prerequisites are pending
pub fn add_task(ctx: &PersistenceContext, task: NewTask) -> CommandResult {
    let name = required(Some(task.name.as_str()), "name")?.to_string();
    let expected_output =
        required(Some(task.expected_output.as_str()), "expected_output")?.to_string();

    let (task_id, status) = ctx.try_update_graph(|graph| {
        let plan_id = match task.plan_id.as_deref() {
            Some(id) => graph
                .find_plan(id)
                .map(|p| p.id.clone())
                .ok_or_else(|| CommandError::NotFound(format!("plan {}", id)))?,
            None => graph
                .active_plan()
                .map(|p| p.id.clone())
                .ok_or_else(|| {
                    CommandError::InvalidState("no active plan; create one first".into())
                })?,
        };
        if let Some(plan) = graph.find_plan(&plan_id) {
            if !matches!(plan.status, PlanStatus::Draft | PlanStatus::Active) {
                return Err(CommandError::InvalidState(format!(
                    "plan {} is {}; tasks can only be added to draft or active plans",
                    plan.id, plan.status
                )));
            }
        }

        let mut node = TaskNode::new(&plan_id, name.as_str(), expected_output.as_str())
            .with_depends_on(task.depends_on.clone())
            .with_allowed_tools(task.allowed_tools.clone());
        if let Some((after, reason)) = &task.temporal_gate {
            node = node.with_temporal_gate(after.as_str(), reason.as_str());
        }
        let id = add_graph_task(graph, node, task.plan_ahead)?;
        let status = graph
            .find_node(&id)
            .map(|n| n.status)
            .unwrap_or_default();
        Ok::<_, CommandError>((id, status))
    })?;

    let list = if task.plan_ahead { " to plan-ahead" } else { "" };
    Ok(format!("Added task {} \"{}\"{} (status: {})", task_id, name, list, status))
}

/// Move a completed plan to `archived`
pub fn archive(ctx: &PersistenceContext, target_id: Option<&str>) -> CommandResult {
    let plan_id = required(target_id, "target_id")?;
    ctx.try_update_graph(|graph| {
        let plan = graph
            .find_plan_mut(plan_id)
            .ok_or_else(|| CommandError::NotFound(format!("plan {}", plan_id)))?;
        if plan.status != PlanStatus::Completed {
            return Err(CommandError::InvalidState(format!(
                "plan {} is {}; only completed plans can be archived",
                plan.id, plan.status
            )));
        }
        plan.status = PlanStatus::Archived;
        plan.modified_at = Utc::now();
        Ok(())
    })?;
    info!(plan_id, "Plan archived");
    Ok(format!("Archived plan {}", plan_id))
}

/// Abandon a draft or active plan and release every session working on it
pub fn abandon(ctx: &PersistenceContext, target_id: Option<&str>) -> CommandResult {
    let plan_id = required(target_id, "target_id")?;
    let task_ids = ctx.try_update_graph(|graph| {
        let plan = graph
            .find_plan_mut(plan_id)
            .ok_or_else(|| CommandError::NotFound(format!("plan {}", plan_id)))?;
        if !matches!(plan.status, PlanStatus::Draft | PlanStatus::Active) {
            return Err(CommandError::InvalidState(format!(
                "plan {} is {} and cannot be abandoned",
                plan.id, plan.status
            )));
        }
        plan.status = PlanStatus::Abandoned;
        plan.modified_at = Utc::now();
        let ids: Vec<String> = plan.all_nodes().map(|t| t.id.clone()).collect();
        if graph.active_work_plan_id.as_deref() == Some(plan_id) {
            graph.active_work_plan_id = None;
        }
        Ok(ids)
    })?;

    for task_id in &task_ids {
        for session_id in ctx.sessions_on_task(task_id) {
            ctx.update_session(&session_id, |s| s.clear_task(task_id));
        }
    }
    info!(plan_id, "Plan abandoned");
    Ok(format!("Abandoned plan {}", plan_id))
}

fn format_task_line(task: &TaskNode) -> String {
    let mut line = format!("  - [{}] {} \"{}\"", task.status, task.id, task.name);
    if !task.depends_on.is_empty() {
        line.push_str(&format!(" (after: {})", task.depends_on.join(", ")));
    }
    if let Some(gate) = &task.temporal_gate {
        line.push_str(&format!(" (gate: {} - {})", gate.after, gate.reason));
    }
    if !task.checkpoints.is_empty() {
        line.push_str(&format!(" [{} checkpoints]", task.checkpoints.len()));
    }
    line
}

/// Multi-line summary of one plan
pub fn format_plan(plan: &WorkPlan) -> String {
    let mut out = format!(
        "Plan {} \"{}\" [{}] ({}, {})",
        plan.id, plan.name, plan.status, plan.category, plan.governance_level
    );
    if let Some(owner) = &plan.owner_agent {
        out.push_str(&format!(" owner: {}", owner));
    }
    for criterion in &plan.acceptance {
        out.push_str(&format!("\n  acceptance: {}", criterion));
    }
    out.push_str(&format!(
        "\n  {} of {} tasks completed",
        plan.count_with_status(TaskStatus::Completed),
        plan.tasks.len()
    ));
    for task in &plan.tasks {
        out.push('\n');
        out.push_str(&format_task_line(task));
    }
    if !plan.plan_ahead.is_empty() {
        out.push_str("\n  plan-ahead:");
        for task in &plan.plan_ahead {
            out.push('\n');
            out.push_str(&format_task_line(task));
        }
    }
    out
}

/// Detailed view of one task node
pub fn format_task(task: &TaskNode) -> String {
    let mut out = format!(
        "Task {} \"{}\" [{}] in plan {}\n  expected output: {}",
        task.id, task.name, task.status, task.plan_id, task.expected_output
    );
    if !task.allowed_tools.is_empty() {
        out.push_str(&format!("\n  allowed tools: {}", task.allowed_tools.join(", ")));
    }
    if let Some(by) = &task.delegated_by {
        out.push_str(&format!("\n  delegated by: {}", by));
    }
    if let Some(to) = &task.assigned_to {
        out.push_str(&format!("\n  assigned to: {}", to));
    }
    for cp in &task.checkpoints {
        out.push_str(&format!("\n  checkpoint {} {}", cp.timestamp.format("%H:%M:%S"), cp.summary));
    }
    if !task.artifacts.is_empty() {
        out.push_str(&format!("\n  artifacts: {}", task.artifacts.join(", ")));
    }
    if let Some(result) = &task.result {
        out.push_str(&format!("\n  result: {}", result.evidence));
    }
    out
}

/// Graph-break warnings, one per line
pub fn format_breaks(graph: &TaskGraph) -> Option<String> {
    let breaks = detect_graph_breaks(graph, STALE_ACTIVE_TASK, Utc::now());
    if breaks.is_empty() {
        return None;
    }
    let lines: Vec<String> = breaks.iter().map(|b| format!("  ! {}", b)).collect();
    Some(format!("Warnings:\n{}", lines.join("\n")))
}

/// Status of a plan, a task, or (with no target) every visible plan
pub fn status(ctx: &PersistenceContext, target_id: Option<&str>) -> CommandResult {
    ctx.with_graph(|graph| {
        if let Some(target) = target_id.map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(plan) = graph.find_plan(target) {
                return Ok(format_plan(plan));
            }
            if let Some(task) = graph.find_node(target) {
                return Ok(format_task(task));
            }
            return Err(CommandError::NotFound(target.to_string()));
        }

        let plans: Vec<&WorkPlan> = graph.visible_plans().collect();
        if plans.is_empty() {
            return Ok(
                "No plans. Create one with govern_plan action=create or govern_task action=quick_start"
                    .to_string(),
            );
        }
        let mut sections: Vec<String> = Vec::new();
        match graph.active_plan() {
            Some(active) => sections.push(format!("Active: {}", format_plan(active))),
            None => sections.push("No active plan".to_string()),
        }
        let others: Vec<String> = plans
            .iter()
            .filter(|p| Some(p.id.as_str()) != graph.active_work_plan_id.as_deref())
            .map(|p| format!("  {} \"{}\" [{}]", p.id, p.name, p.status))
            .collect();
        if !others.is_empty() {
            sections.push(format!("Other plans:\n{}", others.join("\n")));
        }
        if let Some(warnings) = format_breaks(graph) {
            sections.push(warnings);
        }
        Ok(sections.join("\n\n"))
    })
}
