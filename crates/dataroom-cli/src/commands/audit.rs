//! Audit command - View audit trail entries
//!
//! Shows the most recent entries, or the full trail of one item with
//! `--target <id>`.

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use super::Context;

/// Arguments for `dataroom audit`
#[derive(Debug, Args)]
pub struct AuditCommand {
    /// Show the trail of this folder or file id
    #[arg(long)]
    pub target: Option<String>,

    /// Only show entries whose action contains this text
    #[arg(long)]
    pub action: Option<String>,

    /// Maximum number of entries to show
    #[arg(long, default_value = "50")]
    pub limit: u32,
}

impl AuditCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let formatter = ctx.formatter();

        let entries = match &self.target {
            Some(target) => session.audit.trail(target.trim()).await,
            None => session.audit.recent(self.limit).await,
        }
        .context("Failed to query audit entries")?;
        info!(count = entries.len(), "Retrieved audit entries");

        let shown: Vec<_> = entries
            .iter()
            .filter(|entry| match &self.action {
                Some(action) => entry.action().as_str().contains(action.as_str()),
                None => true,
            })
            .take(self.limit as usize)
            .collect();

        if ctx.is_json() {
            let items: Vec<serde_json::Value> = shown
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "id": entry.id(),
                        "timestamp": entry.timestamp().to_rfc3339(),
                        "actor": entry.actor().map(|a| a.as_str()),
                        "action": entry.action().as_str(),
                        "target_type": entry.target_type().as_str(),
                        "target_id": entry.target_id(),
                        "details": entry.details(),
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({
                "count": items.len(),
                "entries": items,
            }));
            return Ok(());
        }

        if shown.is_empty() {
            formatter.info("No audit entries found.");
            return Ok(());
        }

        formatter.success(&format!("Audit trail ({} entries)", shown.len()));
        formatter.info("Timestamp            Actor        Action              Details");
        formatter.info("-------------------  -----------  ------------------  -------");
        for entry in shown {
            formatter.info(&format!(
                "{}  {:<11}  {:<18}  {}",
                entry.timestamp().format("%Y-%m-%d %H:%M:%S"),
                entry.actor().map(|a| a.as_str()).unwrap_or("-"),
                entry.action().as_str(),
                entry.describe(),
            ));
        }
        Ok(())
    }
}
