//! Policy engine for automatic conflict resolution
//!
//! Evaluates conflict rules from configuration to determine which side wins
//! a conflict. Rules are matched using glob patterns in first-match-wins order.

use std::fmt;
use std::str::FromStr;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use drivesync_core::config::{ConflictRuleConfig, ConflictsConfig};

use crate::error::ConflictPolicyError;

/// How the winner of a divergent edit is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Most recent modification time wins; a tie goes to the remote
    #[default]
    NewestWins,
    PreferLocal,
    PreferRemote,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewestWins => "newest_wins",
            Self::PreferLocal => "prefer_local",
            Self::PreferRemote => "prefer_remote",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = ConflictPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest_wins" => Ok(Self::NewestWins),
            "prefer_local" => Ok(Self::PreferLocal),
            "prefer_remote" => Ok(Self::PreferRemote),
            other => Err(ConflictPolicyError::InvalidRule {
                pattern: String::new(),
                reason: format!(
                    "invalid strategy '{other}'; valid: newest_wins, prefer_local, prefer_remote"
                ),
            }),
        }
    }
}

/// A single conflict resolution rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRule {
    /// Glob pattern matched against the relative path (e.g., "**/*.docx", "Documents/**")
    pub pattern: String,
    /// Strategy to apply when the pattern matches
    pub strategy: String,
}

impl ConflictRule {
    /// Validates the rule's glob pattern and strategy
    pub fn validate(&self) -> Result<(Pattern, Strategy), ConflictPolicyError> {
        let pattern = Pattern::new(&self.pattern).map_err(|e| ConflictPolicyError::InvalidRule {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })?;

        let strategy = self.strategy.parse::<Strategy>().map_err(|e| match e {
            ConflictPolicyError::InvalidRule { reason, .. } => ConflictPolicyError::InvalidRule {
                pattern: self.pattern.clone(),
                reason,
            },
            other => other,
        })?;

        Ok((pattern, strategy))
    }
}

impl From<&ConflictRuleConfig> for ConflictRule {
    fn from(rule: &ConflictRuleConfig) -> Self {
        Self {
            pattern: rule.pattern.clone(),
            strategy: rule.strategy.clone(),
        }
    }
}

/// Engine that maps a path to the strategy governing its conflicts
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<(Pattern, Strategy)>,
    default_strategy: Strategy,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_strategy: Strategy::default(),
        }
    }
}

impl PolicyEngine {
    /// Creates a PolicyEngine from the default strategy string and a list of rules
    ///
    /// Invalid rules are logged and skipped; an invalid default falls back
    /// to [`Strategy::NewestWins`].
    pub fn new(default_strategy: &str, rules: &[ConflictRule]) -> Self {
        let default = default_strategy.parse().unwrap_or_else(|_| {
            tracing::warn!(
                strategy = %default_strategy,
                "Invalid default conflict strategy, using newest_wins"
            );
            Strategy::default()
        });

        let compiled_rules: Vec<(Pattern, Strategy)> = rules
            .iter()
            .filter_map(|rule| match rule.validate() {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    tracing::warn!(
                        pattern = %rule.pattern,
                        strategy = %rule.strategy,
                        error = %e,
                        "Skipping invalid conflict rule"
                    );
                    None
                }
            })
            .collect();

        debug!(
            rules_count = compiled_rules.len(),
            default = %default,
            "PolicyEngine initialized"
        );

        Self {
            rules: compiled_rules,
            default_strategy: default,
        }
    }

    /// Builds the engine from the `conflicts` configuration section
    pub fn from_config(config: &ConflictsConfig) -> Self {
        let rules: Vec<ConflictRule> = config.rules.iter().map(ConflictRule::from).collect();
        Self::new(&config.default_strategy, &rules)
    }

    /// Returns the strategy for a path relative to the sync root
    ///
    /// The first rule whose glob matches wins. If no rule matches, returns
    /// the default strategy.
    pub fn evaluate(&self, relative_path: &str) -> Strategy {
        for (pattern, strategy) in &self.rules {
            if pattern.matches(relative_path) {
                trace!(
                    path = %relative_path,
                    pattern = %pattern,
                    strategy = %strategy,
                    "Conflict rule matched"
                );
                return *strategy;
            }
        }

        self.default_strategy
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}
