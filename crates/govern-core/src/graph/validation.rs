//! Start and completion validation
//!
//! Pure checks over a `TaskGraph`. Denials are values, never errors: the
//! caller decides whether to surface them as a tool failure, a hook block,
//! or a status warning.

use super::types::{TaskGraph, TaskNode, TaskStatus};

/// Why a transition was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// A dependency or temporal gate points at a node that does not exist
    BrokenChain { task_id: String, missing: String },
    /// A dependency exists but has not completed
    BlockedBy {
        blocker_id: String,
        blocker_name: String,
        blocker_status: TaskStatus,
    },
    /// The temporal gate's prerequisite has not completed
    TemporalGate {
        after_id: String,
        after_name: String,
        reason: String,
    },
    AlreadyActive,
    AlreadyCompleted,
    AlreadyFailed,
    /// `complete` requires an active or in-review node
    NotCompletable { status: TaskStatus },
    /// `complete` requires non-blank evidence
    MissingEvidence {
        expected_output: String,
        checkpoint_count: usize,
    },
}

impl Denial {
    /// Short machine-friendly tag
    pub fn code(&self) -> &'static str {
        match self {
            Denial::BrokenChain { .. } => "broken_chain",
            Denial::BlockedBy { .. } => "blocked_by_dependency",
            Denial::TemporalGate { .. } => "temporal_gate",
            Denial::AlreadyActive => "already_active",
            Denial::AlreadyCompleted => "already_completed",
            Denial::AlreadyFailed => "already_failed",
            Denial::NotCompletable { .. } => "not_completable",
            Denial::MissingEvidence { .. } => "missing_evidence",
        }
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::BrokenChain { task_id, missing } => write!(
                f,
                "broken chain: {} references {} which does not exist",
                task_id, missing
            ),
            Denial::BlockedBy {
                blocker_id,
                blocker_name,
                blocker_status,
            } => write!(
                f,
                "blocked by {} \"{}\" (status: {})",
                blocker_id, blocker_name, blocker_status
            ),
            Denial::TemporalGate {
                after_id,
                after_name,
                reason,
            } => write!(
                f,
                "temporal gate: must follow {} \"{}\" ({})",
                after_id, after_name, reason
            ),
            Denial::AlreadyActive => write!(f, "task is already active"),
            Denial::AlreadyCompleted => write!(f, "task is already completed"),
            Denial::AlreadyFailed => write!(f, "task has failed and cannot be restarted"),
            Denial::NotCompletable { status } => write!(
                f,
                "task is {}; only active or review tasks can be completed",
                status
            ),
            Denial::MissingEvidence {
                expected_output,
                checkpoint_count,
            } => write!(
                f,
                "evidence is required. Expected output: {}. Checkpoints recorded: {}",
                expected_output, checkpoint_count
            ),
        }
    }
}

/// Outcome of a validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Allowed,
    Denied(Denial),
}

impl Validation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Validation::Allowed)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Validation::Allowed => None,
            Validation::Denied(d) => Some(d),
        }
    }
}

/// Check whether `node` may transition to `active`.
///
/// Order matters: dependencies, then the temporal gate, then the node's own
/// status. A missing dependency anywhere in the list is reported as a broken
/// chain before any incomplete one.
pub fn validate_task_start(graph: &TaskGraph, node: &TaskNode) -> Validation {
    if let Some(missing) = node
        .depends_on
        .iter()
        .find(|dep_id| graph.find_node(dep_id).is_none())
    {
        return Validation::Denied(Denial::BrokenChain {
            task_id: node.id.clone(),
            missing: missing.clone(),
        });
    }

    let blocker = node
        .depends_on
        .iter()
        .filter_map(|dep_id| graph.find_node(dep_id))
        .find(|dep| dep.status != TaskStatus::Completed);
    if let Some(dep) = blocker {
        return Validation::Denied(Denial::BlockedBy {
            blocker_id: dep.id.clone(),
            blocker_name: dep.name.clone(),
            blocker_status: dep.status,
        });
    }

    if let Some(gate) = &node.temporal_gate {
        match graph.find_node(&gate.after) {
            None => {
                return Validation::Denied(Denial::BrokenChain {
                    task_id: node.id.clone(),
                    missing: gate.after.clone(),
                })
            }
            Some(after) if after.status != TaskStatus::Completed => {
                return Validation::Denied(Denial::TemporalGate {
                    after_id: after.id.clone(),
                    after_name: after.name.clone(),
                    reason: gate.reason.clone(),
                })
            }
            Some(_) => {}
        }
    }

    match node.status {
        TaskStatus::Active => Validation::Denied(Denial::AlreadyActive),
        TaskStatus::Completed => Validation::Denied(Denial::AlreadyCompleted),
        TaskStatus::Failed => Validation::Denied(Denial::AlreadyFailed),
        _ => Validation::Allowed,
    }
}

/// Check whether `node` may complete with the given evidence
pub fn validate_task_completion(node: &TaskNode, evidence: &str) -> Validation {
    if !matches!(node.status, TaskStatus::Active | TaskStatus::Review) {
        return Validation::Denied(Denial::NotCompletable {
            status: node.status,
        });
    }
    if evidence.trim().is_empty() {
        return Validation::Denied(Denial::MissingEvidence {
            expected_output: node.expected_output.clone(),
            checkpoint_count: node.checkpoints.len(),
        });
    }
    Validation::Allowed
}

/// Whether every dependency and the temporal gate of `node` are completed
pub fn prerequisites_met(graph: &TaskGraph, node: &TaskNode) -> bool {
    let completed = |id: &str| {
        graph
            .find_node(id)
            .map(|t| t.status == TaskStatus::Completed)
            .unwrap_or(false)
    };
    node.depends_on.iter().all(|d| completed(d))
        && node
            .temporal_gate
            .as_ref()
            .map(|g| completed(&g.after))
            .unwrap_or(true)
}
