//! Lifecycle command surface
//!
//! The only sanctioned way to mutate the task graph. Commands return
//! `Result<String, CommandError>`; the tool boundary renders errors as text
//! starting with [`ERROR_SENTINEL`] so nothing escapes as a panic or `Err`.
//! Commands acting on a session hold that session's lock, the same one the
//! gate takes, so concurrent calls for one session apply one at a time.

pub mod anchor;
pub mod delegate;
pub mod plan;
pub mod task;

use thiserror::Error;

pub use crate::constants::gate::ERROR_SENTINEL;
use crate::graph::{Denial, TransitionError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("denied ({code}): {0}", code = .0.code())]
    Denied(Denial),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<TransitionError> for CommandError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::TaskNotFound(id) => CommandError::NotFound(format!("task {}", id)),
            TransitionError::PlanNotFound(id) => CommandError::NotFound(format!("plan {}", id)),
            TransitionError::Denied(denial) => CommandError::Denied(denial),
            TransitionError::PlanConflict(msg) | TransitionError::InvalidState(msg) => {
                CommandError::InvalidState(msg)
            }
        }
    }
}

pub type CommandResult = Result<String, CommandError>;

/// Render a command result for the tool boundary
pub fn render(result: CommandResult) -> String {
    match result {
        Ok(text) => text,
        Err(e) => format!("{}{}", ERROR_SENTINEL, e),
    }
}

/// Trimmed, non-empty required argument
pub(crate) fn required<'a>(
    value: Option<&'a str>,
    name: &'static str,
) -> Result<&'a str, CommandError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(CommandError::MissingArgument(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_sentinel() {
        assert_eq!(render(Ok("done".into())), "done");
        let rendered = render(Err(CommandError::MissingArgument("evidence")));
        assert_eq!(rendered, "ERROR: missing argument: evidence");
    }

    #[test]
    fn test_denial_carries_code() {
        let err = CommandError::from(TransitionError::Denied(Denial::AlreadyActive));
        assert_eq!(err.to_string(), "denied (already_active): task is already active");
    }

    #[test]
    fn test_required_rejects_blank() {
        assert_eq!(required(Some("  x "), "name"), Ok("x"));
        assert_eq!(required(Some("   "), "name"), Err(CommandError::MissingArgument("name")));
        assert_eq!(required(None, "name"), Err(CommandError::MissingArgument("name")));
    }
}
