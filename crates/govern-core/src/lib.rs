//! Govern Core - governance engine for autonomous coding agents
//!
//! This crate provides:
//! - The plan/task/checkpoint graph and its validation rules
//! - A persistence context with document and SQLite backends
//! - The governance gate run before and after every tool call
//! - The lifecycle commands and tools agents use to drive their work

pub mod commands;
pub mod config;
pub mod constants;
pub mod gate;
pub mod graph;
pub mod hooks;
pub mod paths;
pub mod storage;
pub mod tools;

// Re-exports for convenience
pub use config::{BackendKind, GovernConfig};
pub use gate::{GateDecision, GovernanceGate};
pub use graph::{TaskGraph, TaskNode, WorkPlan};
pub use hooks::{HookResult, PostToolHook, PreToolHook, ToolCall, ToolOutput};
pub use storage::{PersistenceContext, StorageBackend};
pub use tools::{register_govern_tools, ToolContext, ToolRegistry, ToolResult};
