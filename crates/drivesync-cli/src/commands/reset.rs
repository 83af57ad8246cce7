//! Reset command - Forget the sync state of one root
//!
//! Discards the committed snapshot and any incremental records, so the next
//! cycle treats both sides as new and reconciles them from scratch. Files
//! are never touched.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use drivesync_core::domain::SyncRootId;
use drivesync_core::ports::IStateStore;

use super::{open_store, CommandContext};

#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Root whose state is discarded
    #[arg(long)]
    pub root: String,
}

impl ResetCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;
        if config.root(&self.root).is_none() {
            anyhow::bail!("No root named '{}' in the configuration", self.root);
        }

        let id = SyncRootId::new(self.root.clone())
            .with_context(|| format!("Invalid root name '{}'", self.root))?;
        let store = open_store(&config).await?;
        store
            .discard(&id)
            .await
            .with_context(|| format!("Failed to discard state of '{id}'"))?;

        info!(root = %id, "Sync state discarded");
        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({"success": true, "root": id.as_str()}));
        } else {
            formatter.success(&format!(
                "State of '{id}' discarded; the next sync reconciles it from scratch"
            ));
        }
        Ok(())
    }
}
