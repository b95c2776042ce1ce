//! Task graph model
//!
//! Pure data and validation for the WorkPlan → TaskNode → Checkpoint
//! hierarchy. Nothing in this module performs I/O or caches state; the
//! persistence context owns the canonical graph and passes references in.

mod breaks;
pub mod legacy;
mod migration;
mod transitions;
mod types;
mod validation;

pub use breaks::{detect_graph_breaks, purge_abandoned_plans, GraphBreak};
pub use legacy::LegacyTaskStore;
pub use migration::{migrate_legacy, MigrationReport};
pub use transitions::{
    activate_plan, add_task, complete_task, fail_task, review_task, start_task, CompletionReport,
    FailureReport, TransitionError,
};
pub use types::{
    new_id, Checkpoint, GovernanceLevel, PlanCategory, PlanStatus, TaskGraph, TaskNode,
    TaskResult, TaskStatus, TemporalGate, WorkPlan,
};
pub use validation::{
    prerequisites_met, validate_task_completion, validate_task_start, Denial, Validation,
};
