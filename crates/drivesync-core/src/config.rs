//! Configuration module for DriveSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::SyncRootId;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for DriveSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub roots: Vec<RootConfig>,
    pub transfer: TransferConfig,
    pub conflicts: ConflictsConfig,
    pub exclusions: ExclusionsConfig,
    pub logging: LoggingConfig,
    pub state: StateConfig,
}

/// One paired local directory and remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// Stable name, used as the key in the state store.
    pub name: String,
    /// Local directory to keep in sync.
    pub local_path: PathBuf,
    /// Remote folder location (a directory for the folder-backed remote).
    pub remote_path: PathBuf,
    /// Id of the remote folder to sync; the store's root folder when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_folder_id: Option<String>,
}

/// Transfer executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum number of actions executing at once.
    pub concurrency: usize,
    /// Attempts per operation, including the first.
    pub max_attempts: u32,
    /// First backoff delay in milliseconds; doubles on each retry.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Deadline for a single remote operation in seconds.
    pub operation_timeout_secs: u64,
    /// Content digest: `md5` or `sha256`.
    pub hash_algorithm: String,
}

/// A glob rule selecting a conflict strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRuleConfig {
    pub pattern: String,
    pub strategy: String,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Default strategy: `newest_wins`, `prefer_local`, or `prefer_remote`.
    pub default_strategy: String,
    /// Per-path overrides, first match wins.
    pub rules: Vec<ConflictRuleConfig>,
}

/// Paths left out of synchronization on both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionsConfig {
    /// Skip names starting with a dot.
    pub skip_hidden: bool,
    /// Glob patterns matched against names and relative paths.
    pub patterns: Vec<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

/// State store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Path to the SQLite database.
    pub database: PathBuf,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/drivesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("drivesync")
            .join("config.yaml")
    }

    /// Find a root by name.
    pub fn root(&self, name: &str) -> Option<&RootConfig> {
        self.roots.iter().find(|r| r.name == name)
    }
}

impl TransferConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            operation_timeout_secs: 180,
            hash_algorithm: "md5".to_string(),
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_strategy: "newest_wins".to_string(),
            rules: Vec::new(),
        }
    }
}

impl Default for ExclusionsConfig {
    fn default() -> Self {
        Self {
            skip_hidden: true,
            patterns: vec![
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                "*~".to_string(),
                "*.swp".to_string(),
            ],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("drivesync");
        Self {
            database: data_dir.join("state.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"transfer.concurrency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
pub const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Valid values for conflict strategies.
pub const VALID_CONFLICT_STRATEGIES: &[&str] = &["newest_wins", "prefer_local", "prefer_remote"];

/// Valid values for `transfer.hash_algorithm`.
pub const VALID_HASH_ALGORITHMS: &[&str] = &["md5", "sha256"];

/// Upper bound for `transfer.concurrency`.
const MAX_CONCURRENCY: usize = 64;

fn invalid_choice(field: String, value: &str, valid: &[&str]) -> ValidationError {
    ValidationError {
        field,
        message: format!("invalid value '{value}'; valid options: {}", valid.join(", ")),
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- roots ---
        let mut names = HashSet::new();
        for (idx, root) in self.roots.iter().enumerate() {
            if let Err(e) = SyncRootId::new(root.name.clone()) {
                errors.push(ValidationError {
                    field: format!("roots[{idx}].name"),
                    message: e.to_string(),
                });
            }
            if !names.insert(root.name.as_str()) {
                errors.push(ValidationError {
                    field: format!("roots[{idx}].name"),
                    message: format!("duplicate root name '{}'", root.name),
                });
            }
            if !root.local_path.is_absolute() {
                errors.push(ValidationError {
                    field: format!("roots[{idx}].local_path"),
                    message: "must be an absolute path".into(),
                });
            }
            if root.local_path == root.remote_path
                || root.local_path.starts_with(&root.remote_path)
                || root.remote_path.starts_with(&root.local_path)
            {
                errors.push(ValidationError {
                    field: format!("roots[{idx}].remote_path"),
                    message: "must not overlap local_path".into(),
                });
            }
        }
        for (i, a) in self.roots.iter().enumerate() {
            for b in self.roots.iter().skip(i + 1) {
                if a.local_path.starts_with(&b.local_path) || b.local_path.starts_with(&a.local_path)
                {
                    errors.push(ValidationError {
                        field: "roots".into(),
                        message: format!(
                            "local paths of '{}' and '{}' overlap",
                            a.name, b.name
                        ),
                    });
                }
            }
        }

        // --- transfer ---
        if self.transfer.concurrency == 0 || self.transfer.concurrency > MAX_CONCURRENCY {
            errors.push(ValidationError {
                field: "transfer.concurrency".into(),
                message: format!("must be in range 1..={MAX_CONCURRENCY}"),
            });
        }
        if self.transfer.max_attempts == 0 {
            errors.push(ValidationError {
                field: "transfer.max_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.transfer.base_delay_ms > self.transfer.max_delay_ms {
            errors.push(ValidationError {
                field: "transfer.base_delay_ms".into(),
                message: format!(
                    "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                    self.transfer.base_delay_ms, self.transfer.max_delay_ms
                ),
            });
        }
        if self.transfer.operation_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "transfer.operation_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !VALID_HASH_ALGORITHMS.contains(&self.transfer.hash_algorithm.as_str()) {
            errors.push(invalid_choice(
                "transfer.hash_algorithm".into(),
                &self.transfer.hash_algorithm,
                VALID_HASH_ALGORITHMS,
            ));
        }

        // --- conflicts ---
        if !VALID_CONFLICT_STRATEGIES.contains(&self.conflicts.default_strategy.as_str()) {
            errors.push(invalid_choice(
                "conflicts.default_strategy".into(),
                &self.conflicts.default_strategy,
                VALID_CONFLICT_STRATEGIES,
            ));
        }
        for (idx, rule) in self.conflicts.rules.iter().enumerate() {
            if !VALID_CONFLICT_STRATEGIES.contains(&rule.strategy.as_str()) {
                errors.push(invalid_choice(
                    format!("conflicts.rules[{idx}].strategy"),
                    &rule.strategy,
                    VALID_CONFLICT_STRATEGIES,
                ));
            }
            if rule.pattern.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("conflicts.rules[{idx}].pattern"),
                    message: "must not be empty".into(),
                });
            }
        }

        // --- exclusions ---
        for (idx, pattern) in self.exclusions.patterns.iter().enumerate() {
            if pattern.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("exclusions.patterns[{idx}]"),
                    message: "must not be empty".into(),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(invalid_choice(
                "logging.level".into(),
                &self.logging.level,
                VALID_LOG_LEVELS,
            ));
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(invalid_choice(
                "logging.format".into(),
                &self.logging.format,
                VALID_LOG_FORMATS,
            ));
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use drivesync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .root("docs", PathBuf::from("/home/user/Docs"), PathBuf::from("/mnt/share/Docs"))
///     .transfer_concurrency(8)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder pre-populated with defaults.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- roots ---

    pub fn root(mut self, name: impl Into<String>, local_path: PathBuf, remote_path: PathBuf) -> Self {
        self.config.roots.push(RootConfig {
            name: name.into(),
            local_path,
            remote_path,
            remote_folder_id: None,
        });
        self
    }

    // --- transfer ---

    pub fn transfer_concurrency(mut self, n: usize) -> Self {
        self.config.transfer.concurrency = n;
        self
    }

    pub fn transfer_max_attempts(mut self, n: u32) -> Self {
        self.config.transfer.max_attempts = n;
        self
    }

    pub fn transfer_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.transfer.base_delay_ms = ms;
        self
    }

    pub fn transfer_max_delay_ms(mut self, ms: u64) -> Self {
        self.config.transfer.max_delay_ms = ms;
        self
    }

    pub fn transfer_operation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transfer.operation_timeout_secs = secs;
        self
    }

    pub fn transfer_hash_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.config.transfer.hash_algorithm = algorithm.into();
        self
    }

    // --- conflicts ---

    pub fn conflicts_default_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.conflicts.default_strategy = strategy.into();
        self
    }

    pub fn conflicts_rule(mut self, pattern: impl Into<String>, strategy: impl Into<String>) -> Self {
        self.config.conflicts.rules.push(ConflictRuleConfig {
            pattern: pattern.into(),
            strategy: strategy.into(),
        });
        self
    }

    // --- exclusions ---

    pub fn exclusions_skip_hidden(mut self, skip: bool) -> Self {
        self.config.exclusions.skip_hidden = skip;
        self
    }

    pub fn exclusions_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.exclusions.patterns.push(pattern.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- state ---

    pub fn state_database(mut self, path: PathBuf) -> Self {
        self.config.state.database = path;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
