//! Anchor commands: priority-tagged notes that survive context loss

use tracing::debug;

use super::{required, CommandError, CommandResult};
use crate::storage::{Anchor, AnchorPriority, PersistenceContext};

pub fn add(
    ctx: &PersistenceContext,
    session_id: &str,
    content: Option<&str>,
    priority: Option<&str>,
) -> CommandResult {
    let content = required(content, "content")?;
    let priority = match priority {
        Some(raw) => raw
            .parse::<AnchorPriority>()
            .map_err(CommandError::InvalidArgument)?,
        None => AnchorPriority::default(),
    };
    let lock = ctx.session_lock(session_id);
    let _guard = lock.lock();
    let anchor = Anchor::new(session_id, content, priority);
    let id = anchor.id.clone();
    ctx.add_anchor(anchor);
    debug!(session_id, anchor_id = %id, %priority, "Anchor added");
    Ok(format!("Anchored {} ({})", id, priority))
}

pub fn list(ctx: &PersistenceContext, session_id: &str) -> CommandResult {
    let anchors = ctx.anchors(session_id);
    if anchors.is_empty() {
        return Ok("No anchors".to_string());
    }
    let lines: Vec<String> = anchors
        .iter()
        .map(|a| format!("  - [{}] {}", a.priority, a.content))
        .collect();
    Ok(format!("Anchors:\n{}", lines.join("\n")))
}
