//! Which successful tool calls leave evidence on the active task

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::config::GovernanceConfig;
use crate::hooks::{ToolCall, ToolOutput};

/// Shell commands that change or verify the project
static RE_PRODUCTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?:^|&&|;|\|\|)\s*(?:sudo\s+)?(?:
            cargo\s+(?:build|test|check|clippy|fmt|run|bench|install|publish|nextest)
          | (?:npm|pnpm|yarn|bun)\s+(?:run\s+)?(?:build|test|lint|install|ci|publish)
          | git\s+(?:commit|merge|rebase|push|tag|cherry-pick|revert|apply|am)
          | make\b | cmake\b | ninja\b
          | pytest\b | python3?\s+-m\s+(?:pytest|unittest|build)
          | go\s+(?:build|test|vet|generate)
          | (?:mvn|gradle|gradlew|\./gradlew)\b
          | tsc\b | eslint\b | prettier\s+--write
          | docker\s+(?:build|compose\s+build)
          | mkdir\b | mv\b | cp\b | rm\b | touch\b | chmod\b
        )",
    )
    .unwrap()
});

/// Read-only commands that never count on their own
static RE_INSPECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:ls|cat|head|tail|less|more|grep|rg|find|fd|tree|pwd|echo|which|wc|du|df|stat|file|diff|git\s+(?:status|log|diff|show|branch|blame))\b",
    )
    .unwrap()
});

/// Whether a shell command is worth a checkpoint
pub fn is_productive_command(command: &str) -> bool {
    if RE_INSPECTION.is_match(command) && !RE_PRODUCTIVE.is_match(command) {
        return false;
    }
    RE_PRODUCTIVE.is_match(command)
}

/// Whether this call should append a checkpoint
pub fn is_checkpoint_worthy(config: &GovernanceConfig, call: &ToolCall) -> bool {
    if config.is_write_tool(&call.tool) {
        return true;
    }
    if config.is_shell_tool(&call.tool) {
        return call
            .arg_str("command")
            .map(is_productive_command)
            .unwrap_or(false);
    }
    false
}

fn push_path(files: &mut Vec<String>, value: &Value) {
    match value {
        Value::String(s) if !s.is_empty() => {
            if !files.contains(s) {
                files.push(s.clone());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| push_path(files, v)),
        _ => {}
    }
}

/// File paths named by the call arguments and the output metadata
pub fn touched_files(call: &ToolCall, output: &ToolOutput) -> Vec<String> {
    let mut files = Vec::new();
    for source in [&call.args, &output.metadata] {
        for key in ["file_path", "path", "filepath", "files"] {
            if let Some(value) = source.get(key) {
                push_path(&mut files, value);
            }
        }
    }
    files
}

/// One-line summary for the checkpoint record
pub fn summarize(call: &ToolCall, files: &[String]) -> String {
    if let Some(command) = call.arg_str("command") {
        let first_line = command.lines().next().unwrap_or_default();
        let mut short: String = first_line.chars().take(80).collect();
        if first_line.chars().count() > 80 {
            short.push('…');
        }
        return format!("{}: {}", call.tool, short);
    }
    if files.is_empty() {
        call.tool.clone()
    } else {
        format!("{}: {}", call.tool, files.join(", "))
    }
}
