//! Tool registry and the lifecycle tools agents call

pub mod govern;
pub mod registry;

pub use govern::{
    register_govern_tools, GovernAnchorTool, GovernDelegateTool, GovernPlanTool, GovernTaskTool,
};
pub use registry::{parse_params, Tool, ToolContext, ToolDefinition, ToolRegistry, ToolResult};
