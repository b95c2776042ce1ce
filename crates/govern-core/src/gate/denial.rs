//! Denial messages returned to agents
//!
//! Every denial has the same three parts so agents can parse it:
//!
//! ```text
//! [GOVERNANCE DENIED] <what was refused and why>
//! → Next: <what to do instead>
//! → State: <graph state behind the decision>
//! ```

use crate::constants::gate::DENIAL_MARKER;
use crate::graph::{TaskGraph, TaskStatus};
use crate::storage::SessionState;

/// Appended to the first line when the same tool was refused moments ago
pub const RETRY_MARKER: &str = "(retry: this call was already denied; follow → Next instead of retrying)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialMessage {
    pub what: String,
    pub next: String,
    pub state: String,
    pub retry: bool,
}

impl DenialMessage {
    pub fn new(what: impl Into<String>, next: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            next: next.into(),
            state: state.into(),
            retry: false,
        }
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Display for DenialMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", DENIAL_MARKER, self.what)?;
        if self.retry {
            write!(f, " {}", RETRY_MARKER)?;
        }
        write!(f, "\n→ Next: {}\n→ State: {}", self.next, self.state)
    }
}

/// One-line description of the graph as a session sees it
pub fn describe_state(graph: &TaskGraph, session: &SessionState) -> String {
    let task = session
        .active_task
        .as_ref()
        .map(|t| format!("{} \"{}\"", t.id, t.name))
        .unwrap_or_else(|| "none".to_string());
    let Some(plan) = graph.active_plan() else {
        let drafts = graph
            .visible_plans()
            .filter(|p| p.status == crate::graph::PlanStatus::Draft)
            .count();
        return format!("no active plan ({} draft); session task: {}", drafts, task);
    };
    format!(
        "plan {} \"{}\" active: {} planned, {} active, {} blocked, {} completed, {} failed; session task: {}",
        plan.id,
        plan.name,
        plan.count_with_status(TaskStatus::Planned),
        plan.count_with_status(TaskStatus::Active),
        plan.count_with_status(TaskStatus::Blocked),
        plan.count_with_status(TaskStatus::Completed),
        plan.count_with_status(TaskStatus::Failed),
        task
    )
}
