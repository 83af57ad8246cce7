//! CLI subcommands and the state they share

pub mod config;
pub mod reset;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use drivesync_cache::{DatabasePool, SqliteStateStore};
use drivesync_core::config::{Config, RootConfig};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Global options every command receives
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
}

impl CommandContext {
    pub fn formatter(&self) -> Arc<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Loads the configuration file, failing when it is missing or invalid YAML
    pub fn load_config(&self) -> Result<Config> {
        if !self.config_path.exists() {
            bail!(
                "No configuration at {}. Run 'drivesync config init' first.",
                self.config_path.display()
            );
        }
        Config::load(&self.config_path)
            .with_context(|| format!("Failed to load {}", self.config_path.display()))
    }

    /// Loads the configuration and rejects it when validation finds problems
    pub fn load_valid_config(&self) -> Result<Config> {
        let config = self.load_config()?;
        let errors = config.validate();
        if !errors.is_empty() {
            let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
            bail!("Invalid configuration: {}", details.join("; "));
        }
        Ok(config)
    }
}

/// Opens the SQLite state store named in the configuration
pub async fn open_store(config: &Config) -> Result<SqliteStateStore> {
    let pool = DatabasePool::new(&config.state.database)
        .await
        .with_context(|| {
            format!(
                "Failed to open state database {}",
                config.state.database.display()
            )
        })?;
    Ok(SqliteStateStore::new(pool.pool().clone()))
}

/// Opens the state store for a dry run, leaving the filesystem untouched
///
/// An existing database is opened read-only; without one, an empty
/// in-memory store stands in, which reads as every root never synced.
pub async fn open_store_read_only(config: &Config) -> Result<SqliteStateStore> {
    let path = &config.state.database;
    let pool = if path.exists() {
        DatabasePool::open_read_only(path)
            .await
            .with_context(|| format!("Failed to open state database {}", path.display()))?
    } else {
        DatabasePool::in_memory()
            .await
            .context("Failed to create in-memory state database")?
    };
    Ok(SqliteStateStore::new(pool.pool().clone()))
}

/// Roots selected by `--root`, or all of them
pub fn select_roots<'a>(config: &'a Config, name: Option<&str>) -> Result<Vec<&'a RootConfig>> {
    match name {
        Some(name) => match config.root(name) {
            Some(root) => Ok(vec![root]),
            None => bail!("No root named '{name}' in the configuration"),
        },
        None => {
            if config.roots.is_empty() {
                bail!("No roots configured");
            }
            Ok(config.roots.iter().collect())
        }
    }
}
