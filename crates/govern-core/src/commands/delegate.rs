//! Delegation commands: hand work from one agent to another

use chrono::Utc;
use tracing::info;

use super::{required, CommandError, CommandResult};
use crate::graph::new_id;
use crate::storage::{Delegation, DelegationStatus, PersistenceContext};

/// Arguments of `create`
#[derive(Debug, Clone, Default)]
pub struct NewDelegation {
    pub assigned_to: String,
    pub description: String,
    pub task_id: Option<String>,
}

/// Record a delegation; stamps the task node when one is named
pub fn create(
    ctx: &PersistenceContext,
    session_id: &str,
    agent: Option<&str>,
    request: NewDelegation,
) -> CommandResult {
    let assigned_to = required(Some(request.assigned_to.as_str()), "assigned_to")?.to_string();
    let description = required(Some(request.description.as_str()), "description")?.to_string();
    let lock = ctx.session_lock(session_id);
    let _guard = lock.lock();
    let task_id = request
        .task_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);

    if let Some(task_id) = &task_id {
        ctx.try_update_graph(|graph| {
            let node = graph
                .find_node_mut(task_id)
                .ok_or_else(|| CommandError::NotFound(format!("task {}", task_id)))?;
            if node.status.is_terminal() {
                return Err(CommandError::InvalidState(format!(
                    "task {} is {} and cannot be delegated",
                    node.id, node.status
                )));
            }
            node.delegated_by = agent.map(String::from);
            node.assigned_to = Some(assigned_to.clone());
            node.modified_at = Utc::now();
            Ok(())
        })?;
    }

    let delegation = Delegation {
        id: new_id("dl"),
        session_id: Some(session_id.to_string()),
        delegated_by: agent.map(String::from),
        assigned_to: assigned_to.clone(),
        task_id,
        description,
        status: DelegationStatus::Pending,
        result: None,
        created_at: Utc::now(),
        completed_at: None,
    };
    let id = delegation.id.clone();
    ctx.update_delegations(|store| store.delegations.push(delegation));
    info!(delegation_id = %id, assigned_to = %assigned_to, "Delegation created");
    Ok(format!("Delegated {} to {}", id, assigned_to))
}

/// Close a pending delegation as completed or failed
pub fn complete(
    ctx: &PersistenceContext,
    id: Option<&str>,
    result: Option<&str>,
    status: Option<&str>,
) -> CommandResult {
    let id = required(id, "target_id")?;
    let result = required(result, "result")?;
    let status = match status {
        Some(raw) => raw
            .parse::<DelegationStatus>()
            .map_err(CommandError::InvalidArgument)?,
        None => DelegationStatus::Completed,
    };
    if status == DelegationStatus::Pending {
        return Err(CommandError::InvalidArgument(
            "a delegation can only be closed as completed or failed".into(),
        ));
    }

    ctx.update_delegations(|store| {
        let delegation = store
            .find_mut(id)
            .ok_or_else(|| CommandError::NotFound(format!("delegation {}", id)))?;
        if delegation.status != DelegationStatus::Pending {
            return Err(CommandError::InvalidState(format!(
                "delegation {} is already {}",
                id, delegation.status
            )));
        }
        delegation.status = status;
        delegation.result = Some(result.to_string());
        delegation.completed_at = Some(Utc::now());
        Ok(())
    })?;
    Ok(format!("Delegation {} {}", id, status))
}

/// Delegations, optionally only those still pending
pub fn list(ctx: &PersistenceContext, pending_only: bool) -> CommandResult {
    let store = ctx.delegations();
    let lines: Vec<String> = store
        .delegations
        .iter()
        .filter(|d| !pending_only || d.status == DelegationStatus::Pending)
        .map(|d| {
            let mut line = format!(
                "  - [{}] {} → {}: {}",
                d.status, d.id, d.assigned_to, d.description
            );
            if let Some(task) = &d.task_id {
                line.push_str(&format!(" (task {})", task));
            }
            if let Some(result) = &d.result {
                line.push_str(&format!("\n      result: {}", result));
            }
            line
        })
        .collect();
    if lines.is_empty() {
        return Ok("No delegations".to_string());
    }
    Ok(format!("Delegations:\n{}", lines.join("\n")))
}
