//! Config command - View, validate and create the configuration file
//!
//! Provides the `drivesync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration file and reports every problem found
//! 3. Writes a default configuration file

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tracing::info;

use drivesync_core::config::{Config, ValidationError};

use super::CommandContext;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the current configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(ctx),
            ConfigCommand::Validate => execute_validate(ctx),
            ConfigCommand::Init { force } => execute_init(ctx, *force),
        }
    }
}

fn execute_show(ctx: &CommandContext) -> Result<()> {
    let formatter = ctx.formatter();
    let config = ctx.load_config()?;

    info!(config_path = %ctx.config_path.display(), "Showing configuration");

    if ctx.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
    } else {
        formatter.success(&format!("Configuration ({})", ctx.config_path.display()));
        formatter.info("");
        let yaml =
            serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
        for line in yaml.lines() {
            formatter.info(line);
        }
    }
    Ok(())
}

fn execute_validate(ctx: &CommandContext) -> Result<()> {
    let formatter = ctx.formatter();
    let config = ctx.load_config()?;
    let errors = config.validate();

    if ctx.is_json() {
        formatter.print_json(&validation_json(&errors));
    } else if errors.is_empty() {
        formatter.success(&format!(
            "Configuration is valid ({})",
            ctx.config_path.display()
        ));
    } else {
        for error in &errors {
            formatter.error(&error.to_string());
        }
    }

    if !errors.is_empty() {
        bail!("{} configuration error(s)", errors.len());
    }
    Ok(())
}

fn execute_init(ctx: &CommandContext, force: bool) -> Result<()> {
    let formatter = ctx.formatter();
    let path = &ctx.config_path;
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml = serde_yaml::to_string(&Config::default())
        .context("Failed to serialize default configuration")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), "Configuration written");
    if ctx.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "path": path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Wrote {}", path.display()));
        formatter.info("Add entries under 'roots' to start syncing.");
    }
    Ok(())
}

fn validation_json(errors: &[ValidationError]) -> serde_json::Value {
    let details: Vec<serde_json::Value> = errors
        .iter()
        .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
        .collect();
    serde_json::json!({
        "valid": errors.is_empty(),
        "errors": details,
    })
}
