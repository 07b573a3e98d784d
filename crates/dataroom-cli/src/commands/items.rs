//! Item commands: mkdir, link, rename, mv, rm, url

use anyhow::{bail, Result};
use clap::Args;

use dataroom_core::domain::{ItemKind, TreeNode};

use super::Context;

fn kind_label(node: &TreeNode) -> &'static str {
    match node.kind() {
        ItemKind::Folder => "folder",
        ItemKind::File => "file",
    }
}

/// Arguments for `dataroom mkdir`
#[derive(Debug, Args)]
pub struct MkdirCommand {
    /// Parent folder ("/" for the root level)
    pub parent: String,
    /// Display name of the new folder
    pub name: String,
}

impl MkdirCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let formatter = ctx.formatter();
        let parent = session.folder(&self.parent).await?;

        let folder = session.engine.add_folder(&parent, &self.name).await?;
        let path = parent.child(folder.slug.clone());
        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({
                "id": folder.id.to_string(),
                "name": folder.name,
                "slug": folder.slug,
                "path": path.to_string(),
            }));
        } else {
            formatter.success(&format!("Created folder '{}' at {path}", folder.name));
        }
        Ok(())
    }
}

/// Arguments for `dataroom link`
#[derive(Debug, Args)]
pub struct LinkCommand {
    /// Folder to add the link to
    pub folder: String,
    /// Display name of the link
    pub name: String,
    /// Target URL
    pub url: String,
}

impl LinkCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let formatter = ctx.formatter();
        let folder = session.folder(&self.folder).await?;

        let link = session.engine.add_link(&folder, &self.name, &self.url).await?;
        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({
                "id": link.id.to_string(),
                "name": link.name,
                "url": link.url,
            }));
        } else {
            formatter.success(&format!("Added link '{}' to {folder}", link.name));
        }
        Ok(())
    }
}

/// Arguments for `dataroom rename`
#[derive(Debug, Args)]
pub struct RenameCommand {
    /// Item to rename
    pub path: String,
    /// New display name; a file keeps its extension if none is given
    pub new_name: String,
}

impl RenameCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let (parent, node) = session.locate(&self.path).await?;

        session.engine.rename_item(&parent, &node.id(), &self.new_name).await?;
        ctx.formatter().success(&format!(
            "Renamed {} '{}' to '{}'",
            kind_label(&node),
            node.name(),
            self.new_name
        ));
        Ok(())
    }
}

/// Arguments for `dataroom mv`
#[derive(Debug, Args)]
pub struct MvCommand {
    /// Item to move
    pub source: String,
    /// Destination folder ("/" for the root level, folders only)
    pub target: String,
}

impl MvCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let (parent, node) = session.locate(&self.source).await?;
        let target = session.folder(&self.target).await?;
        if parent == target {
            bail!("'{}' is already in {target}", node.name());
        }

        session.engine.move_item(&parent, &node.id(), &target).await?;
        ctx.formatter().success(&format!(
            "Moved {} '{}' to {target}",
            kind_label(&node),
            node.name()
        ));
        Ok(())
    }
}

/// Arguments for `dataroom rm`
#[derive(Debug, Args)]
pub struct RmCommand {
    /// Item to move to the trash
    pub path: String,
}

impl RmCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let (parent, node) = session.locate(&self.path).await?;

        session.engine.delete_item(&parent, &node.id()).await?;
        let formatter = ctx.formatter();
        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({
                "trashed": node.id().to_string(),
                "kind": kind_label(&node),
            }));
        } else {
            formatter.success(&format!("Moved {} '{}' to the trash", kind_label(&node), node.name()));
            formatter.info(&format!("Restore with: dataroom trash restore {}", node.id()));
        }
        Ok(())
    }
}

/// Arguments for `dataroom url`
#[derive(Debug, Args)]
pub struct UrlCommand {
    /// File or link to resolve
    pub path: String,
}

impl UrlCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let (_, node) = session.locate(&self.path).await?;
        let TreeNode::File(file) = &node else {
            bail!("'{}' is a folder", node.name());
        };

        let Some(url) = session.engine.download_url(&file.id).await else {
            bail!("No retrieval URL is available for '{}'", file.name);
        };
        if ctx.is_json() {
            ctx.formatter().print_json(&serde_json::json!({
                "id": file.id.to_string(),
                "url": url,
            }));
        } else {
            println!("{url}");
        }
        Ok(())
    }
}
