//! Tool-call interception contract
//!
//! A host runs every [`PreToolHook`] before a tool executes (any hook may
//! block it) and every [`PostToolHook`] afterwards (hooks may rewrite the
//! output the caller sees).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Result of a pre-execution hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
    Continue,
    /// Refuse the call; `reason` is returned to the caller verbatim
    Block { reason: String },
}

/// One tool invocation as seen by hooks
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool: String,
    pub session_id: String,
    pub call_id: String,
    /// Agent identity reported by the host, if any
    pub agent: Option<String>,
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, session_id: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            session_id: session_id.into(),
            call_id: uuid::Uuid::new_v4().to_string(),
            agent: None,
            args,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// String argument by name
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// The `action` argument of lifecycle tools
    pub fn action(&self) -> Option<&str> {
        self.arg_str("action")
    }
}

/// What a tool produced, as seen (and possibly rewritten) by post hooks
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub title: String,
    pub output: String,
    /// Tool-specific details, e.g. the paths a write touched
    pub metadata: Value,
    pub is_error: bool,
}

#[async_trait]
pub trait PreToolHook: Send + Sync {
    async fn before_execute(&self, call: &ToolCall) -> HookResult;
}

#[async_trait]
pub trait PostToolHook: Send + Sync {
    async fn after_execute(&self, call: &ToolCall, output: &mut ToolOutput, duration: Duration);
}
