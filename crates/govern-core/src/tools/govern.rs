//! Lifecycle tools exposed to agents
//!
//! Thin adapters from JSON parameters onto the command surface. Every
//! failure comes back as a `ToolResult` starting with the error sentinel.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::commands::{self, anchor, delegate, plan, task, CommandResult};
use crate::constants::tools::{GOVERN_ANCHOR, GOVERN_DELEGATE, GOVERN_PLAN, GOVERN_TASK};
use crate::storage::PersistenceContext;
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolRegistry, ToolResult};

fn into_result(result: CommandResult) -> ToolResult {
    match result {
        Ok(text) => ToolResult::success(text),
        Err(e) => ToolResult::error(e),
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PlanAction {
    Create,
    AddTask,
    Status,
    Archive,
    Abandon,
}

#[derive(Debug, Deserialize)]
struct PlanParams {
    action: PlanAction,
    name: Option<String>,
    #[serde(default)]
    acceptance: Vec<String>,
    category: Option<String>,
    target_id: Option<String>,
    expected_output: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    plan_ahead: bool,
    #[serde(default)]
    allowed_tools: Vec<String>,
    /// Temporal gate prerequisite
    after: Option<String>,
    gate_reason: Option<String>,
}

pub struct GovernPlanTool {
    ctx: Arc<PersistenceContext>,
}

impl GovernPlanTool {
    pub fn new(ctx: Arc<PersistenceContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GovernPlanTool {
    fn name(&self) -> &str {
        GOVERN_PLAN
    }

    fn description(&self) -> &str {
        "Manage work plans. Actions: create (name, acceptance?, category?), add_task (name, expected_output, depends_on?, plan_ahead?, allowed_tools?, after?, gate_reason?, target_id? = plan), status (target_id?), archive (target_id), abandon (target_id)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "add_task", "status", "archive", "abandon"]
                },
                "name": {"type": "string", "description": "Plan or task name"},
                "acceptance": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Acceptance criteria for a new plan"
                },
                "category": {
                    "type": "string",
                    "enum": ["development", "research", "governance", "maintenance", "spec-kit", "ad-hoc"]
                },
                "target_id": {"type": "string", "description": "Plan or task id"},
                "expected_output": {"type": "string", "description": "What the task must produce"},
                "depends_on": {"type": "array", "items": {"type": "string"}},
                "plan_ahead": {"type": "boolean", "description": "Sketch the task without committing it"},
                "allowed_tools": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Tools permitted while the task is active (empty = any)"
                },
                "after": {"type": "string", "description": "Task that must complete before this one may start"},
                "gate_reason": {"type": "string", "description": "Why the ordering matters"}
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: PlanParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let result = match params.action {
            PlanAction::Create => plan::create(
                &self.ctx,
                ctx.agent.as_deref(),
                params.name.as_deref(),
                params.acceptance,
                params.category.as_deref(),
            ),
            PlanAction::AddTask => {
                let temporal_gate = params.after.map(|after| {
                    let reason = params
                        .gate_reason
                        .unwrap_or_else(|| "ordering constraint".to_string());
                    (after, reason)
                });
                plan::add_task(
                    &self.ctx,
                    plan::NewTask {
                        plan_id: params.target_id,
                        name: params.name.unwrap_or_default(),
                        expected_output: params.expected_output.unwrap_or_default(),
                        depends_on: params.depends_on,
                        plan_ahead: params.plan_ahead,
                        allowed_tools: params.allowed_tools,
                        temporal_gate,
                    },
                )
            }
            PlanAction::Status => plan::status(&self.ctx, params.target_id.as_deref()),
            PlanAction::Archive => plan::archive(&self.ctx, params.target_id.as_deref()),
            PlanAction::Abandon => plan::abandon(&self.ctx, params.target_id.as_deref()),
        };
        into_result(result)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaskAction {
    QuickStart,
    Start,
    Complete,
    Fail,
    Review,
    Status,
}

#[derive(Debug, Deserialize)]
struct TaskParams {
    action: TaskAction,
    name: Option<String>,
    expected_output: Option<String>,
    target_id: Option<String>,
    evidence: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    tests: Vec<String>,
    reason: Option<String>,
}

pub struct GovernTaskTool {
    ctx: Arc<PersistenceContext>,
}

impl GovernTaskTool {
    pub fn new(ctx: Arc<PersistenceContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GovernTaskTool {
    fn name(&self) -> &str {
        GOVERN_TASK
    }

    fn description(&self) -> &str {
        "Drive governed tasks. Actions: quick_start (name, expected_output?), start (target_id), complete (evidence, target_id?, files?, tests?), fail (target_id, reason), review (target_id?), status. File writes require an active task."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["quick_start", "start", "complete", "fail", "review", "status"]
                },
                "name": {"type": "string"},
                "expected_output": {"type": "string"},
                "target_id": {"type": "string", "description": "Task id; defaults to the session's active task where optional"},
                "evidence": {"type": "string", "description": "Proof the expected output exists"},
                "files": {"type": "array", "items": {"type": "string"}},
                "tests": {"type": "array", "items": {"type": "string"}},
                "reason": {"type": "string", "description": "Why the task failed"}
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: TaskParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let session = ctx.session_id.as_str();
        let result = match params.action {
            TaskAction::QuickStart => task::quick_start(
                &self.ctx,
                session,
                ctx.agent.as_deref(),
                params.name.as_deref(),
                params.expected_output.as_deref(),
            ),
            TaskAction::Start => task::start(&self.ctx, session, params.target_id.as_deref()),
            TaskAction::Complete => task::complete(
                &self.ctx,
                session,
                task::Completion {
                    target_id: params.target_id,
                    evidence: params.evidence.unwrap_or_default(),
                    files: params.files,
                    tests: params.tests,
                },
            ),
            TaskAction::Fail => task::fail(
                &self.ctx,
                params.target_id.as_deref(),
                params.reason.as_deref(),
            ),
            TaskAction::Review => task::review(&self.ctx, session, params.target_id.as_deref()),
            TaskAction::Status => task::status(&self.ctx, session),
        };
        into_result(result)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DelegateAction {
    Create,
    Complete,
    List,
}

#[derive(Debug, Deserialize)]
struct DelegateParams {
    action: DelegateAction,
    assigned_to: Option<String>,
    description: Option<String>,
    task_id: Option<String>,
    target_id: Option<String>,
    result: Option<String>,
    status: Option<String>,
    #[serde(default)]
    pending_only: bool,
}

pub struct GovernDelegateTool {
    ctx: Arc<PersistenceContext>,
}

impl GovernDelegateTool {
    pub fn new(ctx: Arc<PersistenceContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GovernDelegateTool {
    fn name(&self) -> &str {
        GOVERN_DELEGATE
    }

    fn description(&self) -> &str {
        "Hand work to another agent. Actions: create (assigned_to, description, task_id?), complete (target_id, result, status?), list (pending_only?)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["create", "complete", "list"]},
                "assigned_to": {"type": "string", "description": "Agent receiving the work"},
                "description": {"type": "string"},
                "task_id": {"type": "string", "description": "Task node the work belongs to"},
                "target_id": {"type": "string", "description": "Delegation id"},
                "result": {"type": "string"},
                "status": {"type": "string", "enum": ["completed", "failed"]},
                "pending_only": {"type": "boolean"}
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: DelegateParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let result = match params.action {
            DelegateAction::Create => delegate::create(
                &self.ctx,
                &ctx.session_id,
                ctx.agent.as_deref(),
                delegate::NewDelegation {
                    assigned_to: params.assigned_to.unwrap_or_default(),
                    description: params.description.unwrap_or_default(),
                    task_id: params.task_id,
                },
            ),
            DelegateAction::Complete => delegate::complete(
                &self.ctx,
                params.target_id.as_deref(),
                params.result.as_deref(),
                params.status.as_deref(),
            ),
            DelegateAction::List => delegate::list(&self.ctx, params.pending_only),
        };
        into_result(result)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AnchorAction {
    Add,
    List,
}

#[derive(Debug, Deserialize)]
struct AnchorParams {
    action: AnchorAction,
    content: Option<String>,
    priority: Option<String>,
}

pub struct GovernAnchorTool {
    ctx: Arc<PersistenceContext>,
}

impl GovernAnchorTool {
    pub fn new(ctx: Arc<PersistenceContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GovernAnchorTool {
    fn name(&self) -> &str {
        GOVERN_ANCHOR
    }

    fn description(&self) -> &str {
        "Pin notes that must survive context loss. Actions: add (content, priority?), list."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["add", "list"]},
                "content": {"type": "string"},
                "priority": {"type": "string", "enum": ["critical", "high", "normal", "low"]}
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: AnchorParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let result = match params.action {
            AnchorAction::Add => anchor::add(
                &self.ctx,
                &ctx.session_id,
                params.content.as_deref(),
                params.priority.as_deref(),
            ),
            AnchorAction::List => anchor::list(&self.ctx, &ctx.session_id),
        };
        into_result(result)
    }
}

/// Register the four lifecycle tools
pub async fn register_govern_tools(registry: &ToolRegistry, ctx: Arc<PersistenceContext>) {
    registry.register(Arc::new(GovernPlanTool::new(ctx.clone()))).await;
    registry.register(Arc::new(GovernTaskTool::new(ctx.clone()))).await;
    registry.register(Arc::new(GovernDelegateTool::new(ctx.clone()))).await;
    registry.register(Arc::new(GovernAnchorTool::new(ctx))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DocumentBackend;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn registry(temp: &TempDir) -> ToolRegistry {
        let backend = DocumentBackend::new(temp.path()).expect("Failed to create backend");
        let ctx = Arc::new(PersistenceContext::new(Box::new(backend), Duration::from_millis(10)));
        let registry = ToolRegistry::new();
        register_govern_tools(&registry, ctx).await;
        registry
    }

    #[tokio::test]
    async fn test_registers_all_lifecycle_tools() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let registry = registry(&temp).await;
        let names: Vec<String> = registry.definitions().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["govern_anchor", "govern_delegate", "govern_plan", "govern_task"]);
    }

    #[tokio::test]
    async fn test_unknown_action_is_sentinel_error() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let registry = registry(&temp).await;
        let result = registry
            .execute(GOVERN_TASK, json!({"action": "teleport"}), &ToolContext::new("s"))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.output.starts_with(commands::ERROR_SENTINEL));
    }

    #[tokio::test]
    async fn test_quick_start_then_complete_through_tools() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let registry = registry(&temp).await;
        let ctx = ToolContext::new("s").with_agent("executor");

        let started = registry
            .execute(GOVERN_TASK, json!({"action": "quick_start", "name": "Bump deps"}), &ctx)
            .await
            .unwrap();
        assert!(!started.is_error, "{}", started.output);

        let blank = registry
            .execute(GOVERN_TASK, json!({"action": "complete", "evidence": "  "}), &ctx)
            .await
            .unwrap();
        assert!(blank.output.starts_with("ERROR: denied (missing_evidence)"));

        let done = registry
            .execute(
                GOVERN_TASK,
                json!({"action": "complete", "evidence": "cargo update ran"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(done.output.contains("Plan completed"), "{}", done.output);
    }

    #[tokio::test]
    async fn test_anchor_round_trip_through_tools() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let registry = registry(&temp).await;
        let ctx = ToolContext::new("s");
        registry
            .execute(
                GOVERN_ANCHOR,
                json!({"action": "add", "content": "no force pushes", "priority": "critical"}),
                &ctx,
            )
            .await
            .unwrap();
        let listed = registry
            .execute(GOVERN_ANCHOR, json!({"action": "list"}), &ctx)
            .await
            .unwrap();
        assert!(listed.output.contains("[critical] no force pushes"));
    }
}
