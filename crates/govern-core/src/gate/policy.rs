//! Per-agent tool restrictions

use std::collections::{HashMap, HashSet};

use crate::config::{AgentRuleConfig, ConfigError};

/// Restrictions for one agent identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentToolRule {
    /// Tools this agent may never call
    pub blocked_tools: HashSet<String>,
    /// Tool → `action` values this agent may not pass
    pub forbidden_actions: HashMap<String, HashSet<String>>,
}

/// Why a rule refused a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    ToolBlocked { agent: String, tool: String },
    ActionForbidden { agent: String, tool: String, action: String },
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleViolation::ToolBlocked { agent, tool } => {
                write!(f, "agent '{}' may not use {}", agent, tool)
            }
            RuleViolation::ActionForbidden { agent, tool, action } => {
                write!(f, "agent '{}' may not call {} action={}", agent, tool, action)
            }
        }
    }
}

/// Validated rule table keyed by agent identity. Agents without an entry are unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentPolicy {
    rules: HashMap<String, AgentToolRule>,
}

impl AgentPolicy {
    pub fn from_rules(rules: &[AgentRuleConfig]) -> Result<Self, ConfigError> {
        let mut table = HashMap::new();
        for rule in rules {
            let agent = rule.agent.trim();
            if agent.is_empty() {
                return Err(ConfigError::Invalid("agent rule with empty agent name".into()));
            }
            if table.contains_key(agent) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate agent rule for '{}'",
                    agent
                )));
            }
            let blocked_tools: HashSet<String> = rule.blocked_tools.iter().cloned().collect();
            let mut forbidden_actions = HashMap::new();
            for (tool, actions) in &rule.forbidden_actions {
                if blocked_tools.contains(tool) {
                    return Err(ConfigError::Invalid(format!(
                        "agent '{}' both blocks {} and forbids actions on it",
                        agent, tool
                    )));
                }
                forbidden_actions.insert(tool.clone(), actions.iter().cloned().collect());
            }
            table.insert(
                agent.to_string(),
                AgentToolRule {
                    blocked_tools,
                    forbidden_actions,
                },
            );
        }
        Ok(Self { rules: table })
    }

    pub fn rule_for(&self, agent: &str) -> Option<&AgentToolRule> {
        self.rules.get(agent)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check one call against the agent's rule
    pub fn check(
        &self,
        agent: &str,
        tool: &str,
        action: Option<&str>,
    ) -> Result<(), RuleViolation> {
        let Some(rule) = self.rules.get(agent) else {
            return Ok(());
        };
        if rule.blocked_tools.contains(tool) {
            return Err(RuleViolation::ToolBlocked {
                agent: agent.to_string(),
                tool: tool.to_string(),
            });
        }
        if let (Some(action), Some(forbidden)) = (action, rule.forbidden_actions.get(tool)) {
            if forbidden.contains(action) {
                return Err(RuleViolation::ActionForbidden {
                    agent: agent.to_string(),
                    tool: tool.to_string(),
                    action: action.to_string(),
                });
            }
        }
        Ok(())
    }
}
