//! Governance gate
//!
//! Runs around every tool call. The before phase decides allow/deny in a
//! fixed order:
//! 1. agent rules
//! 2. dependency re-check on `govern_task action=start`
//! 3. the active task's tool allow-list
//! 4. passthrough for agents the gate does not manage
//! 5. the write gate (active task, auto-inherit, executor grace)
//!
//! The after phase hides outputs of writes that slipped past the gate and
//! records checkpoints on the active task.

mod checkpoint;
mod denial;
mod policy;

pub use checkpoint::{is_checkpoint_worthy, is_productive_command, summarize, touched_files};
pub use denial::{describe_state, DenialMessage, RETRY_MARKER};
pub use policy::{AgentPolicy, AgentToolRule, RuleViolation};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, GovernConfig, GovernanceConfig};
use crate::constants::gate::RETRY_WINDOW;
use crate::constants::tools::{GOVERN_TASK, LIFECYCLE};
use crate::graph::{validate_task_start, Checkpoint, TaskGraph, TaskStatus, Validation};
use crate::hooks::{HookResult, PostToolHook, PreToolHook, ToolCall, ToolOutput};
use crate::storage::{ActiveTaskRef, BlockedCall, PersistenceContext};

/// Outcome of the before phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Three-part denial message
    Deny(String),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// How a write got (or did not get) a governed task
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteAccess {
    ActiveTask,
    Inherited(ActiveTaskRef),
    ExecutorGrace,
    Denied,
}

pub struct GovernanceGate {
    ctx: Arc<PersistenceContext>,
    policy: AgentPolicy,
    config: GovernanceConfig,
}

/// Concrete next step for an agent that has no task
fn next_action(graph: &TaskGraph) -> String {
    match graph.active_plan() {
        Some(plan) => match plan.tasks.iter().find(|t| t.status == TaskStatus::Planned) {
            Some(task) => format!(
                "start a task first: govern_task action=start target_id={} (\"{}\")",
                task.id, task.name
            ),
            None => format!(
                "add a task to plan {}: govern_plan action=add_task name=\"...\" expected_output=\"...\"",
                plan.id
            ),
        },
        None => {
            "create governed work first: govern_task action=quick_start name=\"...\"".to_string()
        }
    }
}

impl GovernanceGate {
    pub fn new(
        ctx: Arc<PersistenceContext>,
        policy: AgentPolicy,
        config: GovernanceConfig,
    ) -> Self {
        Self { ctx, policy, config }
    }

    pub fn from_config(
        ctx: Arc<PersistenceContext>,
        config: &GovernConfig,
    ) -> Result<Self, ConfigError> {
        let policy = AgentPolicy::from_rules(&config.agent_rules)?;
        Ok(Self::new(ctx, policy, config.governance.clone()))
    }

    pub fn context(&self) -> &Arc<PersistenceContext> {
        &self.ctx
    }

    /// Record the agent identity running a session
    pub fn capture_agent(&self, session_id: &str, agent: &str) {
        let lock = self.ctx.session_lock(session_id);
        let _guard = lock.lock();
        self.store_agent(session_id, agent);
    }

    fn store_agent(&self, session_id: &str, agent: &str) {
        if self.ctx.session(session_id).agent.as_deref() != Some(agent) {
            debug!(session_id, agent, "Captured agent identity");
            self.ctx
                .update_session(session_id, |s| s.agent = Some(agent.to_string()));
        }
    }

    /// Agent for this call: the one the host reports, else the captured one
    fn resolve_agent(&self, call: &ToolCall) -> Option<String> {
        match &call.agent {
            Some(agent) => {
                self.store_agent(&call.session_id, agent);
                Some(agent.clone())
            }
            None => self.ctx.session(&call.session_id).agent,
        }
    }

    /// Before phase. Internal failures allow the call.
    pub fn before(&self, call: &ToolCall) -> GateDecision {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.before_inner(call, Utc::now()))) {
            Ok(decision) => decision,
            Err(_) => {
                error!(
                    session_id = %call.session_id,
                    tool = %call.tool,
                    "Governance check panicked, allowing call"
                );
                GateDecision::Allow
            }
        }
    }

    /// After phase. Internal failures leave the output untouched.
    pub fn after(&self, call: &ToolCall, output: &mut ToolOutput) {
        let original = output.clone();
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.after_inner(call, output)));
        if outcome.is_err() {
            error!(
                session_id = %call.session_id,
                tool = %call.tool,
                "Governance post-processing panicked, output unchanged"
            );
            *output = original;
        }
    }

    fn before_inner(&self, call: &ToolCall, now: DateTime<Utc>) -> GateDecision {
        let lock = self.ctx.session_lock(&call.session_id);
        let _guard = lock.lock();
        let agent = self.resolve_agent(call);
        let action = call.action();

        if let Some(agent) = agent.as_deref() {
            if self.config.is_governed_tool(&call.tool) {
                if let Err(violation) = self.policy.check(agent, &call.tool, action) {
                    let next = "use a tool this agent is permitted to call, or hand the work to another agent";
                    return self.deny(call, now, violation.to_string(), next.to_string());
                }
            }
        }

        if call.tool == GOVERN_TASK && action == Some("start") {
            if let Some(target) = call.arg_str("target_id") {
                let verdict = self
                    .ctx
                    .with_graph(|g| g.find_node(target).map(|node| validate_task_start(g, node)));
                if let Some(Validation::Denied(denial)) = verdict {
                    let next = "complete the prerequisite first, then retry the start";
                    let what = format!("cannot start {}: {}", target, denial);
                    return self.deny(call, now, what, next.to_string());
                }
            }
        }

        if !LIFECYCLE.contains(&call.tool.as_str()) {
            if let Some(active) = self.ctx.session(&call.session_id).active_task {
                let allowed = self.ctx.with_graph(|g| {
                    g.find_node(&active.id)
                        .filter(|node| !node.permits_tool(&call.tool))
                        .map(|node| node.allowed_tools.join(", "))
                });
                if let Some(allowed) = allowed {
                    return self.deny(
                        call,
                        now,
                        format!("{} is not allowed while task {} is active", call.tool, active.id),
                        format!("use one of the task's allowed tools: {}", allowed),
                    );
                }
            }
        }

        let Some(agent) = agent.filter(|a| self.config.is_governed_agent(a)) else {
            return GateDecision::Allow;
        };

        if !self.config.is_write_tool(&call.tool) {
            return GateDecision::Allow;
        }

        match self.write_access(&call.session_id, &agent) {
            WriteAccess::Denied => {
                let next = self.ctx.with_graph(next_action);
                self.deny(
                    call,
                    now,
                    format!("{} requires an active governed task", call.tool),
                    next,
                )
            }
            _ => GateDecision::Allow,
        }
    }

    fn after_inner(&self, call: &ToolCall, output: &mut ToolOutput) {
        if output.is_error {
            return;
        }
        let lock = self.ctx.session_lock(&call.session_id);
        let _guard = lock.lock();

        let agent = call
            .agent
            .clone()
            .or_else(|| self.ctx.session(&call.session_id).agent)
            .filter(|a| self.config.is_governed_agent(a));

        if let Some(agent) = agent.as_deref() {
            if self.config.is_write_tool(&call.tool)
                && self.write_access(&call.session_id, agent) == WriteAccess::Denied
            {
                let session = self.ctx.session(&call.session_id);
                let message = self.ctx.with_graph(|g| {
                    DenialMessage::new(
                        format!(
                            "{} ran without an active governed task; its output is withheld",
                            call.tool
                        ),
                        next_action(g),
                        describe_state(g, &session),
                    )
                });
                warn!(
                    session_id = %call.session_id,
                    tool = %call.tool,
                    "Ungoverned write reached post hook"
                );
                output.title = "Blocked by governance".to_string();
                output.output = message.to_string();
                output.is_error = true;
                return;
            }
        }

        if !is_checkpoint_worthy(&self.config, call) {
            return;
        }
        let Some(active) = self.ctx.session(&call.session_id).active_task else {
            return;
        };
        let files = touched_files(call, output);
        let summary = summarize(call, &files);
        let recorded = self.ctx.try_update_graph(|g| {
            let node = g
                .find_node_mut(&active.id)
                .filter(|n| matches!(n.status, TaskStatus::Active | TaskStatus::Review))
                .ok_or(())?;
            node.record_checkpoint(Checkpoint::new(&call.tool, summary, files));
            Ok::<usize, ()>(node.checkpoints.len())
        });
        if let Ok(count) = recorded {
            debug!(
                session_id = %call.session_id,
                task_id = %active.id,
                tool = %call.tool,
                count,
                "Checkpoint recorded"
            );
        }
    }

    /// Resolve a governed task for a write, adopting one into the session if possible
    fn write_access(&self, session_id: &str, agent: &str) -> WriteAccess {
        if let Some(active) = self.ctx.session(session_id).active_task {
            let live = self.ctx.with_graph(|g| {
                g.find_node(&active.id)
                    .map(|n| matches!(n.status, TaskStatus::Active | TaskStatus::Review))
            });
            match live {
                // Not in the graph: a legacy task reference
                Some(true) | None => return WriteAccess::ActiveTask,
                Some(false) => {
                    debug!(session_id, task_id = %active.id, "Dropping finished task from session");
                    self.ctx.update_session(session_id, |s| s.clear_task(&active.id));
                }
            }
        }

        let inherited = self
            .ctx
            .with_graph(|g| g.active_node().map(ActiveTaskRef::from))
            .or_else(|| {
                self.ctx.legacy_tasks().active_task().map(|t| ActiveTaskRef {
                    id: t.id.clone(),
                    name: t.name.clone(),
                })
            });
        if let Some(task) = inherited {
            info!(session_id, task_id = %task.id, "Session inherited active task");
            let adopted = task.clone();
            self.ctx
                .update_session(session_id, move |s| s.active_task = Some(adopted));
            return WriteAccess::Inherited(task);
        }

        if agent == self.config.executor_agent
            && self.ctx.with_graph(|g| g.active_plan().is_none())
        {
            debug!(session_id, agent, "Executor write allowed without governance context");
            return WriteAccess::ExecutorGrace;
        }
        WriteAccess::Denied
    }

    fn deny(
        &self,
        call: &ToolCall,
        now: DateTime<Utc>,
        what: String,
        next: String,
    ) -> GateDecision {
        let session = self.ctx.session(&call.session_id);
        let retry = session.is_retry(&call.tool, RETRY_WINDOW, now);
        let state = self.ctx.with_graph(|g| describe_state(g, &session));
        let tool = call.tool.clone();
        self.ctx.update_session(&call.session_id, |s| {
            s.last_block = Some(BlockedCall { tool, at: now });
        });
        info!(session_id = %call.session_id, tool = %call.tool, retry, "Governance denied call");
        GateDecision::Deny(DenialMessage::new(what, next, state).retry(retry).to_string())
    }
}

#[async_trait]
impl PreToolHook for GovernanceGate {
    async fn before_execute(&self, call: &ToolCall) -> HookResult {
        match self.before(call) {
            GateDecision::Allow => HookResult::Continue,
            GateDecision::Deny(reason) => HookResult::Block { reason },
        }
    }
}

#[async_trait]
impl PostToolHook for GovernanceGate {
    async fn after_execute(&self, call: &ToolCall, output: &mut ToolOutput, _duration: Duration) {
        self.after(call, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::gate::DENIAL_MARKER;
    use crate::graph::{activate_plan, add_task, start_task, TaskNode, WorkPlan};
    use crate::storage::DocumentBackend;
    use serde_json::json;
    use tempfile::TempDir;

    fn gate(temp: &TempDir) -> GovernanceGate {
        let backend = DocumentBackend::new(temp.path()).expect("Failed to create backend");
        let ctx = Arc::new(PersistenceContext::new(Box::new(backend), Duration::from_millis(10)));
        GovernanceGate::from_config(ctx, &GovernConfig::default()).expect("default config is valid")
    }

    /// Active plan with one node; returns (plan id, node id)
    fn seed_plan(gate: &GovernanceGate, start: bool, allowed: Vec<String>) -> (String, String) {
        gate.context()
            .try_update_graph(|g| {
                let plan = WorkPlan::new("P");
                let plan_id = plan.id.clone();
                g.work_plans.push(plan);
                let node = TaskNode::new(&plan_id, "A", "out").with_allowed_tools(allowed);
                let task_id = add_task(g, node, false)?;
                if start {
                    start_task(g, &task_id, Utc::now())?;
                } else {
                    activate_plan(g, &plan_id, Utc::now())?;
                }
                Ok::<_, crate::graph::TransitionError>((plan_id, task_id))
            })
            .expect("seed graph")
    }

    fn write_call(agent: &str) -> ToolCall {
        ToolCall::new("write", "s1", json!({"file_path": "src/lib.rs"})).with_agent(agent)
    }

    fn ok_output() -> ToolOutput {
        ToolOutput {
            title: "write".into(),
            output: "wrote 10 lines".into(),
            metadata: json!({"path": "src/lib.rs"}),
            is_error: false,
        }
    }

    #[test]
    fn test_ungoverned_agent_passes_through() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        assert_eq!(gate.before(&write_call("assistant")), GateDecision::Allow);
        assert_eq!(
            gate.before(&ToolCall::new("write", "s2", json!({}))),
            GateDecision::Allow,
            "no identity at all is not governed"
        );
    }

    #[test]
    fn test_governed_write_without_task_is_denied_with_retry() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);

        let GateDecision::Deny(first) = gate.before(&write_call("coordinator")) else {
            panic!("expected denial");
        };
        assert!(first.starts_with(DENIAL_MARKER));
        assert!(first.contains("→ Next: create governed work first"));
        assert!(first.contains("→ State: no active plan"));
        assert!(!first.contains(RETRY_MARKER));
        assert_eq!(
            gate.context().session("s1").last_block.map(|b| b.tool),
            Some("write".to_string())
        );

        let GateDecision::Deny(second) = gate.before(&write_call("coordinator")) else {
            panic!("expected denial");
        };
        assert!(second.contains(RETRY_MARKER));
    }

    #[test]
    fn test_non_write_tools_pass_for_governed_agents() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        let read = ToolCall::new("read", "s1", json!({"file_path": "a"})).with_agent("coordinator");
        assert!(gate.before(&read).is_allowed());
    }

    #[test]
    fn test_executor_grace_only_without_active_plan() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        assert!(gate.before(&write_call("executor")).is_allowed());
        assert!(gate.before(&write_call("executor")).is_allowed(), "grace holds on every write");

        let (_, task_id) = seed_plan(&gate, false, vec![]);
        let GateDecision::Deny(message) = gate.before(&write_call("executor")) else {
            panic!("executor must be denied once a plan is active");
        };
        assert!(message.contains(&task_id), "next action names the startable task");
    }

    #[test]
    fn test_auto_inherits_active_node() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        let (_, task_id) = seed_plan(&gate, true, vec![]);

        assert!(gate.before(&write_call("coordinator")).is_allowed());
        assert_eq!(
            gate.context().session("s1").active_task.map(|t| t.id),
            Some(task_id)
        );
    }

    #[test]
    fn test_allow_list_blocks_other_tools_but_not_lifecycle() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        seed_plan(&gate, true, vec!["read".into(), "write".into()]);
        assert!(gate.before(&write_call("coordinator")).is_allowed());

        let bash =
            ToolCall::new("bash", "s1", json!({"command": "cargo test"})).with_agent("coordinator");
        let GateDecision::Deny(message) = gate.before(&bash) else {
            panic!("bash is outside the allow-list");
        };
        assert!(message.contains("read, write"));

        let status = ToolCall::new("govern_task", "s1", json!({"action": "status"}))
            .with_agent("coordinator");
        assert!(gate.before(&status).is_allowed());
    }

    #[test]
    fn test_start_is_revalidated_at_the_hook() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        let (plan_id, first) = seed_plan(&gate, false, vec![]);
        let blocked = gate
            .context()
            .try_update_graph(|g| {
                let node = TaskNode::new(&plan_id, "B", "out").with_depends_on(vec![first.clone()]);
                add_task(g, node, false)
            })
            .unwrap();

        let start =
            ToolCall::new("govern_task", "s1", json!({"action": "start", "target_id": blocked}));
        let GateDecision::Deny(message) = gate.before(&start) else {
            panic!("dependent start must be denied");
        };
        assert!(message.contains(&first));

        let start_first =
            ToolCall::new("govern_task", "s1", json!({"action": "start", "target_id": first}));
        assert!(gate.before(&start_first).is_allowed());
    }

    #[test]
    fn test_agent_rules_apply_to_governed_tools() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        gate.capture_agent("s1", "investigator");

        let delegate = ToolCall::new("govern_delegate", "s1", json!({"action": "list"}));
        assert!(!gate.before(&delegate).is_allowed());
        let create = ToolCall::new("govern_plan", "s1", json!({"action": "create", "name": "x"}));
        assert!(!gate.before(&create).is_allowed());
        let status = ToolCall::new("govern_plan", "s1", json!({"action": "status"}));
        assert!(gate.before(&status).is_allowed());
    }

    #[test]
    fn test_after_records_checkpoint_with_artifacts() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        let (_, task_id) = seed_plan(&gate, true, vec![]);
        let call = write_call("coordinator");
        assert!(gate.before(&call).is_allowed());

        let mut output = ok_output();
        gate.after(&call, &mut output);
        assert_eq!(output, ok_output(), "allowed output is untouched");

        let inspect =
            ToolCall::new("bash", "s1", json!({"command": "ls -la"})).with_agent("coordinator");
        gate.after(&inspect, &mut ok_output());

        let node = gate.context().graph().find_node(&task_id).cloned().unwrap();
        assert_eq!(node.checkpoints.len(), 1);
        assert_eq!(node.checkpoints[0].tool, "write");
        assert_eq!(node.artifacts, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_after_withholds_ungoverned_write_output() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let gate = gate(&temp);
        seed_plan(&gate, false, vec![]);

        let mut output = ok_output();
        gate.after(&write_call("reviewer"), &mut output);
        assert!(output.is_error);
        assert_eq!(output.title, "Blocked by governance");
        assert!(output.output.starts_with(DENIAL_MARKER));
    }
}
