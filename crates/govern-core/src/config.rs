//! Governance configuration stored in `~/.govern/config.toml`
//!
//! Every field has a default, so a missing file or a partial file both load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::storage::DEBOUNCE_QUIET_PERIOD;
use crate::constants::tools::{GOVERN_DELEGATE, GOVERN_PLAN, LIFECYCLE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Durable backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One JSON document per store
    #[default]
    Document,
    /// SQLite tables
    Relational,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Document => write!(f, "document"),
            BackendKind::Relational => write!(f, "relational"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "document" | "json" => Ok(BackendKind::Document),
            "relational" | "sqlite" => Ok(BackendKind::Relational),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Which agents and tools the gate manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub governed_agents: Vec<String>,
    /// Any identity starting with this prefix is governed too
    pub governed_prefix: String,
    /// Identity that may write while no plan exists at all
    pub executor_agent: String,
    pub write_tools: Vec<String>,
    /// Tools agent rules apply to
    pub governed_tools: Vec<String>,
    /// Shell-like tools whose commands may earn a checkpoint
    pub shell_tools: Vec<String>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        let write_tools = vec!["write".to_string(), "edit".to_string()];
        let governed_tools = LIFECYCLE
            .iter()
            .map(|t| t.to_string())
            .chain(write_tools.iter().cloned())
            .collect();
        Self {
            governed_agents: ["coordinator", "executor", "investigator", "reviewer", "planner"]
                .into_iter()
                .map(String::from)
                .collect(),
            governed_prefix: "govern-".to_string(),
            executor_agent: "executor".to_string(),
            write_tools,
            governed_tools,
            shell_tools: vec!["bash".to_string()],
        }
    }
}

impl GovernanceConfig {
    pub fn is_governed_agent(&self, agent: &str) -> bool {
        self.governed_agents.iter().any(|a| a == agent)
            || (!self.governed_prefix.is_empty() && agent.starts_with(&self.governed_prefix))
    }

    pub fn is_write_tool(&self, tool: &str) -> bool {
        self.write_tools.iter().any(|t| t == tool)
    }

    pub fn is_governed_tool(&self, tool: &str) -> bool {
        self.governed_tools.iter().any(|t| t == tool)
    }

    pub fn is_shell_tool(&self, tool: &str) -> bool {
        self.shell_tools.iter().any(|t| t == tool)
    }
}

/// One agent's tool restrictions as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRuleConfig {
    pub agent: String,
    #[serde(default)]
    pub blocked_tools: Vec<String>,
    /// Tool name → forbidden values of its `action` argument
    #[serde(default)]
    pub forbidden_actions: BTreeMap<String, Vec<String>>,
}

fn default_agent_rules() -> Vec<AgentRuleConfig> {
    vec![AgentRuleConfig {
        agent: "investigator".to_string(),
        blocked_tools: vec![GOVERN_DELEGATE.to_string()],
        forbidden_actions: BTreeMap::from([(
            GOVERN_PLAN.to_string(),
            vec!["create".to_string()],
        )]),
    }]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernConfig {
    pub backend: BackendKind,
    /// Store directory; `~/.govern/data` when unset
    pub data_dir: Option<PathBuf>,
    pub debounce_ms: u64,
    pub governance: GovernanceConfig,
    pub agent_rules: Vec<AgentRuleConfig>,
}

impl Default for GovernConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: None,
            debounce_ms: DEBOUNCE_QUIET_PERIOD.as_millis() as u64,
            governance: GovernanceConfig::default(),
            agent_rules: default_agent_rules(),
        }
    }
}

impl GovernConfig {
    /// Load from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid("debounce_ms must be > 0".to_string()));
        }
        if self.governance.write_tools.is_empty() {
            return Err(ConfigError::Invalid(
                "governance.write_tools must not be empty".to_string(),
            ));
        }
        crate::gate::AgentPolicy::from_rules(&self.agent_rules)?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::paths::data_dir)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_returns_default() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = GovernConfig::load(&temp.path().join("missing.toml")).unwrap();
        assert_eq!(config, GovernConfig::default());
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.agent_rules.len(), 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
backend = "relational"

[governance]
executor_agent = "builder"
"#,
        )
        .unwrap();

        let config = GovernConfig::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Relational);
        assert_eq!(config.governance.executor_agent, "builder");
        assert_eq!(config.governance.write_tools, vec!["write", "edit"]);
        assert!(config.governance.is_governed_agent("govern-reviewer"));
        assert!(!config.governance.is_governed_agent("assistant"));
    }

    #[test]
    fn test_agent_rules_parse() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[[agent_rules]]
agent = "reviewer"
blocked_tools = ["write"]

[agent_rules.forbidden_actions]
govern_task = ["complete", "fail"]
"#,
        )
        .unwrap();

        let config = GovernConfig::load(&path).unwrap();
        assert_eq!(config.agent_rules.len(), 1);
        assert_eq!(config.agent_rules[0].agent, "reviewer");
        assert_eq!(
            config.agent_rules[0].forbidden_actions["govern_task"],
            vec!["complete", "fail"]
        );
    }

    #[test]
    fn test_malformed_file_is_error() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "backend = [").unwrap();
        assert!(matches!(
            GovernConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_rule_is_rejected() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[[agent_rules]]
agent = ""
"#,
        )
        .unwrap();
        assert!(matches!(
            GovernConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
