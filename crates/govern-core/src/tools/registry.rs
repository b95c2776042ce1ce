//! Tool registry for managing available tools
//!
//! Every call runs the pre hooks (any may block), the tool under a timeout,
//! then the post hooks, which may rewrite what the caller sees.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::constants::gate::ERROR_SENTINEL;
use crate::hooks::{HookResult, PostToolHook, PreToolHook, ToolCall, ToolOutput};

/// Default tool execution timeout (2 minutes)
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool execution result
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
    /// Tool-specific details surfaced to post hooks
    pub metadata: Value,
    pub title: Option<String>,
}

impl ToolResult {
    /// Create a success result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
            metadata: Value::Null,
            title: None,
        }
    }

    /// Create an error result carrying the error sentinel
    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            output: format!("{}{}", ERROR_SENTINEL, msg),
            is_error: true,
            metadata: Value::Null,
            title: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl From<ToolOutput> for ToolResult {
    fn from(out: ToolOutput) -> Self {
        Self {
            output: out.output,
            is_error: out.is_error,
            metadata: out.metadata,
            title: Some(out.title),
        }
    }
}

/// Parse tool parameters, returning a ToolResult error on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|e| ToolResult::error(format!("Invalid parameters: {}", e)))
}

/// Context for tool execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub call_id: String,
    /// Agent identity reported by the host
    pub agent: Option<String>,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: uuid::Uuid::new_v4().to_string(),
            agent: None,
            timeout: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The hook-facing view of one call
    fn tool_call(&self, name: &str, params: &Value) -> ToolCall {
        ToolCall {
            tool: name.to_string(),
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
            agent: self.agent.clone(),
            args: params.clone(),
        }
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description for the agent
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Tool definition as advertised to an agent host
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Registry for managing tools with hook support
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
    /// Default timeout for tool execution
    default_timeout: Duration,
    /// Pre-execution hooks (run before each tool)
    pre_hooks: Vec<Arc<dyn PreToolHook>>,
    /// Post-execution hooks (run after each tool)
    post_hooks: Vec<Arc<dyn PostToolHook>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    /// Register a tool
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        tools.insert(name, tool);
    }

    /// Add a pre-execution hook
    pub fn add_pre_hook(&mut self, hook: Arc<dyn PreToolHook>) {
        self.pre_hooks.push(hook);
    }

    /// Add a post-execution hook
    pub fn add_post_hook(&mut self, hook: Arc<dyn PostToolHook>) {
        self.post_hooks.push(hook);
    }

    /// Get a tool by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// All registered tools, sorted by name
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name with hooks and timeout
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Option<ToolResult> {
        let tool = self.get(name).await?;
        tracing::debug!(tool = name, session_id = %ctx.session_id, "Executing tool");
        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let call = ctx.tool_call(name, &params);
        let start = Instant::now();

        // Run pre-hooks - they can block execution
        for hook in &self.pre_hooks {
            match hook.before_execute(&call).await {
                HookResult::Continue => {}
                HookResult::Block { reason } => {
                    tracing::info!(
                        tool = name,
                        session_id = %ctx.session_id,
                        "Pre-hook blocked execution"
                    );
                    return Some(ToolResult {
                        output: reason,
                        is_error: true,
                        metadata: Value::Null,
                        title: Some("Blocked".to_string()),
                    });
                }
            }
        }

        // Execute the tool with timeout
        let result = match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    tool = name,
                    timeout_secs = timeout.as_secs(),
                    "Tool execution timed out"
                );
                ToolResult::error(format!(
                    "Tool '{}' timed out after {} seconds",
                    name,
                    timeout.as_secs()
                ))
            }
        };

        if self.post_hooks.is_empty() {
            return Some(result);
        }

        let duration = start.elapsed();
        let mut output = ToolOutput {
            title: result.title.clone().unwrap_or_else(|| name.to_string()),
            output: result.output,
            metadata: result.metadata,
            is_error: result.is_error,
        };
        for hook in &self.post_hooks {
            hook.after_execute(&call, &mut output, duration).await;
        }

        Some(output.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
            let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
            ToolResult::success(text).with_metadata(json!({"len": text.len()}))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(600)).await;
            ToolResult::success("late")
        }
    }

    struct BlockAll;

    #[async_trait]
    impl PreToolHook for BlockAll {
        async fn before_execute(&self, call: &ToolCall) -> HookResult {
            HookResult::Block {
                reason: format!("no {} for {}", call.tool, call.session_id),
            }
        }
    }

    #[derive(Default)]
    struct Shout {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PostToolHook for Shout {
        async fn after_execute(
            &self,
            _call: &ToolCall,
            output: &mut ToolOutput,
            _duration: Duration,
        ) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            output.output = output.output.to_uppercase();
        }
    }

    #[tokio::test]
    async fn test_tool_registry_nonexistent_tool() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::new("s");

        let result = registry.execute("nonexistent_tool", json!({}), &ctx).await;

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_execute_without_hooks_returns_tool_result() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let result = registry
            .execute("echo", json!({"text": "hi"}), &ToolContext::new("s"))
            .await
            .unwrap();
        assert_eq!(result, ToolResult::success("hi").with_metadata(json!({"len": 2})));
    }

    #[tokio::test]
    async fn test_pre_hook_block_returns_reason_verbatim() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        registry.add_pre_hook(Arc::new(BlockAll));

        let result = registry
            .execute("echo", json!({"text": "hi"}), &ToolContext::new("s1"))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.output, "no echo for s1");
    }

    #[tokio::test]
    async fn test_post_hook_rewrites_output() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let hook = Arc::new(Shout::default());
        registry.add_post_hook(hook.clone());

        let result = registry
            .execute("echo", json!({"text": "hi"}), &ToolContext::new("s"))
            .await
            .unwrap();
        assert_eq!(result.output, "HI");
        assert_eq!(result.title.as_deref(), Some("echo"));
        assert_eq!(result.metadata, json!({"len": 2}));
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_produces_error() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool)).await;
        let ctx = ToolContext::new("s").with_timeout(Duration::from_secs(1));

        let result = registry.execute("slow", json!({}), &ctx).await.unwrap();
        assert!(result.is_error);
        assert!(result.output.starts_with(ERROR_SENTINEL));
        assert!(result.output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_definitions_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool)).await;
        registry.register(Arc::new(EchoTool)).await;
        let names: Vec<String> = registry.definitions().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "slow"]);
    }

    #[test]
    fn test_tool_result_error() {
        let result = ToolResult::error("Test error");
        assert!(result.is_error);
        assert_eq!(result.output, "ERROR: Test error");
    }

    #[test]
    fn test_parse_params_success() {
        #[derive(serde::Deserialize)]
        struct TestParams {
            name: String,
            count: i32,
        }

        let params = json!({"name": "test", "count": 42});
        let result: Result<TestParams, ToolResult> = parse_params(params);

        assert!(result.is_ok());
        let parsed = result.unwrap();
        assert_eq!(parsed.name, "test");
        assert_eq!(parsed.count, 42);
    }

    #[test]
    fn test_parse_params_invalid_json() {
        #[derive(serde::Deserialize, Debug)]
        struct TestParams {
            #[allow(dead_code)]
            name: String,
        }

        let params = json!({"name": 123}); // Wrong type
        let result: Result<TestParams, ToolResult> = parse_params(params);

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.is_error);
        assert!(err.output.contains("Invalid parameters"));
    }
}
