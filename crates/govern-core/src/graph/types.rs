//! Task graph data model
//!
//! Three-level hierarchy: `WorkPlan` → `TaskNode` → `Checkpoint`.
//! Everything here is plain data; validation and transitions live in
//! sibling modules and operate on references to these values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a short prefixed identifier like `tn-1a2b3c4d`
pub fn new_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &raw[..8])
}

/// Kind of work a plan governs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanCategory {
    #[default]
    Development,
    Research,
    Governance,
    Maintenance,
    SpecKit,
    AdHoc,
}

impl std::fmt::Display for PlanCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanCategory::Development => write!(f, "development"),
            PlanCategory::Research => write!(f, "research"),
            PlanCategory::Governance => write!(f, "governance"),
            PlanCategory::Maintenance => write!(f, "maintenance"),
            PlanCategory::SpecKit => write!(f, "spec-kit"),
            PlanCategory::AdHoc => write!(f, "ad-hoc"),
        }
    }
}

impl std::str::FromStr for PlanCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "development" | "dev" => Ok(PlanCategory::Development),
            "research" => Ok(PlanCategory::Research),
            "governance" => Ok(PlanCategory::Governance),
            "maintenance" => Ok(PlanCategory::Maintenance),
            "spec-kit" | "speckit" => Ok(PlanCategory::SpecKit),
            "ad-hoc" | "adhoc" => Ok(PlanCategory::AdHoc),
            _ => Err(format!("Unknown plan category: {}", s)),
        }
    }
}

/// How strictly the gate treats work under a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceLevel {
    Strict,
    #[default]
    Standard,
    Relaxed,
}

impl std::str::FromStr for GovernanceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(GovernanceLevel::Strict),
            "standard" => Ok(GovernanceLevel::Standard),
            "relaxed" => Ok(GovernanceLevel::Relaxed),
            _ => Err(format!("Unknown governance level: {}", s)),
        }
    }
}

impl std::fmt::Display for GovernanceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GovernanceLevel::Strict => write!(f, "strict"),
            GovernanceLevel::Standard => write!(f, "standard"),
            GovernanceLevel::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// Plan status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Archived,
    Abandoned,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Draft => write!(f, "draft"),
            PlanStatus::Active => write!(f, "active"),
            PlanStatus::Completed => write!(f, "completed"),
            PlanStatus::Archived => write!(f, "archived"),
            PlanStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(PlanStatus::Draft),
            "active" => Ok(PlanStatus::Active),
            "completed" | "complete" | "done" => Ok(PlanStatus::Completed),
            "archived" => Ok(PlanStatus::Archived),
            "abandoned" | "cancelled" | "canceled" => Ok(PlanStatus::Abandoned),
            _ => Err(format!("Unknown plan status: {}", s)),
        }
    }
}

/// Task node status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Planned,
    Active,
    Blocked,
    Completed,
    Failed,
    Review,
}

impl TaskStatus {
    /// Completed or failed: no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Planned => write!(f, "planned"),
            TaskStatus::Active => write!(f, "active"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Review => write!(f, "review"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "planned" | "pending" => Ok(TaskStatus::Planned),
            "active" | "in_progress" => Ok(TaskStatus::Active),
            "blocked" => Ok(TaskStatus::Blocked),
            "completed" | "complete" | "done" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "review" => Ok(TaskStatus::Review),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Append-only evidence record produced by a successful tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    /// Tool that produced this checkpoint
    pub tool: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl Checkpoint {
    pub fn new(tool: impl Into<String>, summary: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            id: new_id("cp"),
            tool: tool.into(),
            timestamp: Utc::now(),
            summary: summary.into(),
            files,
        }
    }
}

/// Evidence attached when a node completes (or the reason it failed)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<String>,
    /// Anchor ids created while the node was active
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<String>,
}

impl TaskResult {
    pub fn evidence(evidence: impl Into<String>) -> Self {
        Self {
            evidence: evidence.into(),
            ..Default::default()
        }
    }
}

/// Single named prerequisite that must complete before a node starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalGate {
    /// Node that must be completed first
    pub after: String,
    /// Human-readable reason shown on denial
    pub reason: String,
}

/// Atomic unit of governed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub plan_id: String,
    pub name: String,
    pub expected_output: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Permitted tool names (empty = unrestricted)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_gate: Option<TemporalGate>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl TaskNode {
    pub fn new(
        plan_id: impl Into<String>,
        name: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("tn"),
            plan_id: plan_id.into(),
            name: name.into(),
            expected_output: expected_output.into(),
            status: TaskStatus::Planned,
            delegated_by: None,
            assigned_to: None,
            allowed_tools: Vec::new(),
            depends_on: Vec::new(),
            temporal_gate: None,
            checkpoints: Vec::new(),
            artifacts: Vec::new(),
            created_at: now,
            modified_at: now,
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_temporal_gate(
        mut self,
        after: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.temporal_gate = Some(TemporalGate {
            after: after.into(),
            reason: reason.into(),
        });
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    /// Whether the given tool may run while this node is active
    pub fn permits_tool(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }

    /// Append a checkpoint and fold its files into the artifact list
    pub fn record_checkpoint(&mut self, checkpoint: Checkpoint) {
        for file in &checkpoint.files {
            if !self.artifacts.contains(file) {
                self.artifacts.push(file.clone());
            }
        }
        self.modified_at = checkpoint.timestamp;
        self.checkpoints.push(checkpoint);
    }
}

/// Top-level governed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub category: PlanCategory,
    #[serde(default)]
    pub governance_level: GovernanceLevel,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Soft-delete stamp for abandoned plans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<TaskNode>,
    /// Nodes sketched ahead of time, not yet committed
    #[serde(default)]
    pub plan_ahead: Vec<TaskNode>,
}

impl WorkPlan {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("wp"),
            name: name.into(),
            acceptance: Vec::new(),
            category: PlanCategory::default(),
            governance_level: GovernanceLevel::default(),
            status: PlanStatus::Draft,
            owner_agent: None,
            created_at: now,
            modified_at: now,
            purged_at: None,
            tasks: Vec::new(),
            plan_ahead: Vec::new(),
        }
    }

    /// Committed and plan-ahead nodes together
    pub fn all_nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.tasks.iter().chain(self.plan_ahead.iter())
    }

    pub fn find_task(&self, task_id: &str) -> Option<&TaskNode> {
        self.all_nodes().find(|t| t.id == task_id)
    }

    pub fn find_task_mut(&mut self, task_id: &str) -> Option<&mut TaskNode> {
        self.tasks
            .iter_mut()
            .chain(self.plan_ahead.iter_mut())
            .find(|t| t.id == task_id)
    }

    /// All committed tasks terminal and at least one completed
    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty()
            && self.tasks.iter().all(|t| t.status.is_terminal())
            && self.tasks.iter().any(|t| t.status == TaskStatus::Completed)
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// Whole-repository task graph with a single active-plan pointer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_work_plan_id: Option<String>,
    #[serde(default)]
    pub work_plans: Vec<WorkPlan>,
}

impl TaskGraph {
    pub fn find_plan(&self, plan_id: &str) -> Option<&WorkPlan> {
        self.work_plans.iter().find(|p| p.id == plan_id)
    }

    pub fn find_plan_mut(&mut self, plan_id: &str) -> Option<&mut WorkPlan> {
        self.work_plans.iter_mut().find(|p| p.id == plan_id)
    }

    /// The plan behind the active pointer, if it is still active
    pub fn active_plan(&self) -> Option<&WorkPlan> {
        self.active_work_plan_id
            .as_deref()
            .and_then(|id| self.find_plan(id))
            .filter(|p| p.status == PlanStatus::Active)
    }

    /// Find a node anywhere in the graph (committed or plan-ahead)
    pub fn find_node(&self, task_id: &str) -> Option<&TaskNode> {
        self.work_plans.iter().find_map(|p| p.find_task(task_id))
    }

    pub fn find_node_mut(&mut self, task_id: &str) -> Option<&mut TaskNode> {
        self.work_plans
            .iter_mut()
            .find_map(|p| p.find_task_mut(task_id))
    }

    /// Plan owning the given node
    pub fn plan_of(&self, task_id: &str) -> Option<&WorkPlan> {
        self.work_plans
            .iter()
            .find(|p| p.find_task(task_id).is_some())
    }

    /// First `active` node of the active plan
    pub fn active_node(&self) -> Option<&TaskNode> {
        self.active_plan()?
            .tasks
            .iter()
            .find(|t| t.status == TaskStatus::Active)
    }

    /// Plans not soft-deleted
    pub fn visible_plans(&self) -> impl Iterator<Item = &WorkPlan> {
        self.work_plans.iter().filter(|p| p.purged_at.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_prefix_and_uniqueness() {
        let a = new_id("tn");
        let b = new_id("tn");
        assert!(a.starts_with("tn-"));
        assert_eq!(a.len(), 11);
        assert_ne!(a, b);
    }

    #[test]
    fn test_category_parse_and_display() {
        assert_eq!("spec-kit".parse::<PlanCategory>(), Ok(PlanCategory::SpecKit));
        assert_eq!("ad_hoc".parse::<PlanCategory>(), Ok(PlanCategory::AdHoc));
        assert_eq!(PlanCategory::AdHoc.to_string(), "ad-hoc");
        assert!("unknown".parse::<PlanCategory>().is_err());
    }

    #[test]
    fn test_task_status_serde_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Review).unwrap();
        assert_eq!(json, "\"review\"");
        let parsed: TaskStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(parsed, TaskStatus::Blocked);
    }

    #[test]
    fn test_plan_is_complete_requires_one_completed() {
        let mut plan = WorkPlan::new("P");
        assert!(!plan.is_complete());

        let mut a = TaskNode::new(&plan.id, "A", "out");
        a.status = TaskStatus::Failed;
        plan.tasks.push(a);
        assert!(!plan.is_complete(), "all failed is not completion");

        let mut b = TaskNode::new(&plan.id, "B", "out");
        b.status = TaskStatus::Completed;
        plan.tasks.push(b);
        assert!(plan.is_complete());
    }

    #[test]
    fn test_record_checkpoint_merges_artifacts() {
        let mut node = TaskNode::new("wp-1", "A", "out");
        node.record_checkpoint(Checkpoint::new("write", "write: a.rs", vec!["a.rs".into()]));
        node.record_checkpoint(Checkpoint::new(
            "edit",
            "edit: a.rs",
            vec!["a.rs".into(), "b.rs".into()],
        ));
        assert_eq!(node.checkpoints.len(), 2);
        assert_eq!(node.artifacts, vec!["a.rs".to_string(), "b.rs".to_string()]);
    }

    #[test]
    fn test_permits_tool() {
        let open = TaskNode::new("wp-1", "A", "out");
        assert!(open.permits_tool("bash"));

        let narrow = open.clone().with_allowed_tools(vec!["read".into()]);
        assert!(narrow.permits_tool("read"));
        assert!(!narrow.permits_tool("write"));
    }

    #[test]
    fn test_active_plan_requires_active_status() {
        let mut graph = TaskGraph::default();
        let mut plan = WorkPlan::new("P");
        graph.active_work_plan_id = Some(plan.id.clone());
        plan.status = PlanStatus::Completed;
        graph.work_plans.push(plan);
        assert!(graph.active_plan().is_none());
    }
}
