//! Grant command - manage per-user edit rights
//!
//! Only admins may grant or revoke. A grant on a folder covers edits
//! inside it; a grant on a file covers that file.

use anyhow::{bail, Context as _, Result};
use clap::Args;

use dataroom_core::domain::{TreeNode, UserId};
use dataroom_core::ports::EditTarget;

use super::{parse_path, Context};

/// Arguments for `dataroom grant`
#[derive(Debug, Args)]
pub struct GrantCommand {
    /// User receiving (or losing) the right
    pub user: String,

    /// Folder or file the right applies to
    pub path: String,

    /// Revoke instead of grant
    #[arg(long)]
    pub revoke: bool,
}

impl GrantCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let user = UserId::new(self.user.clone()).context("Invalid user id")?;
        let session = ctx.open().await?;

        if parse_path(&self.path)?.is_root() {
            bail!("Edit rights on the root level cannot be granted; only admins edit it");
        }
        let (_, node) = session.locate(&self.path).await?;
        let target = match &node {
            TreeNode::Folder(folder) => EditTarget::Folder(folder.id),
            TreeNode::File(file) => EditTarget::File(file.id),
        };

        if self.revoke {
            session.store.revoke_edit(&user, target).await?;
            ctx.formatter().success(&format!("Revoked edit on '{}' from {user}", node.name()));
        } else {
            session.store.grant_edit(&user, target).await?;
            ctx.formatter().success(&format!("Granted {user} edit on '{}'", node.name()));
        }
        Ok(())
    }
}
