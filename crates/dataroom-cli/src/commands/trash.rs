//! Trash commands - list, restore and purge soft-deleted items
//!
//! Trashed items are addressed by id, as printed by `dataroom trash list`.

use anyhow::{bail, Context as _, Result};
use clap::Subcommand;

use dataroom_core::domain::{FolderContents, ItemId, StoreError};
use dataroom_sync::SyncError;

use super::{Context, Session};

#[derive(Debug, Subcommand)]
pub enum TrashCommand {
    /// List trashed folders and files
    List,
    /// Restore a trashed item to its original folder
    Restore {
        /// Id of the trashed item
        id: String,
    },
    /// Permanently erase a trashed item (folders with their whole subtree)
    Purge {
        /// Id of the trashed item
        id: String,
        /// Required to confirm the erase
        #[arg(long)]
        yes: bool,
    },
}

impl TrashCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        match self {
            TrashCommand::List => list(ctx, &session).await,
            TrashCommand::Restore { id } => restore(ctx, &session, id).await,
            TrashCommand::Purge { id, yes } => purge(ctx, &session, id, *yes).await,
        }
    }
}

async fn list(ctx: &Context, session: &Session) -> Result<()> {
    let formatter = ctx.formatter();
    let trash = session.engine.list_trash().await?;

    if ctx.is_json() {
        formatter.print_json(&serde_json::json!({
            "folders": trash.folders,
            "files": trash.files,
        }));
        return Ok(());
    }

    if trash.is_empty() {
        formatter.info("The trash is empty.");
        return Ok(());
    }
    formatter.success(&format!(
        "Trash ({} folder(s), {} file(s))",
        trash.folders.len(),
        trash.files.len()
    ));
    for folder in &trash.folders {
        formatter.info(&format!("{}  folder  {}/  {}", folder.id, folder.name, deleted_at(folder.deleted_at)));
    }
    for file in &trash.files {
        formatter.info(&format!("{}  file    {}  {}", file.id, file.name, deleted_at(file.deleted_at)));
    }
    Ok(())
}

async fn restore(ctx: &Context, session: &Session, raw: &str) -> Result<()> {
    let trash = session.engine.list_trash().await?;
    let item = find_trashed(&trash, raw)?;

    match session.engine.restore_item(&item).await {
        Ok(()) => {
            ctx.formatter().success(&format!("Restored {item}"));
            Ok(())
        }
        Err(err @ SyncError::Store(StoreError::NameConflict(_))) => {
            Err(err).context("A live item now holds this name; rename it first, then restore again")
        }
        Err(err) => Err(err.into()),
    }
}

async fn purge(ctx: &Context, session: &Session, raw: &str, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("Purging cannot be undone; pass --yes to confirm");
    }
    let trash = session.engine.list_trash().await?;
    let item = find_trashed(&trash, raw)?;

    session.engine.hard_delete_item(&item).await?;
    ctx.formatter().success(&format!("Permanently erased {item}"));
    Ok(())
}

/// Resolves an id from the trash listing to a typed item id
fn find_trashed(trash: &FolderContents, raw: &str) -> Result<ItemId> {
    let raw = raw.trim();
    if let Some(folder) = trash.folders.iter().find(|f| f.id.to_string() == raw) {
        return Ok(ItemId::Folder(folder.id));
    }
    if let Some(file) = trash.files.iter().find(|f| f.id.to_string() == raw) {
        return Ok(ItemId::File(file.id));
    }
    bail!("No trashed item with id {raw}")
}

fn deleted_at(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default()
}
