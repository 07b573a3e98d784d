//! Tree and search commands

use anyhow::Result;
use clap::Args;

use dataroom_core::domain::{FlatEntry, TreeNode, TreePath};

use super::{parse_path, Context};
use crate::output::human_bytes;

/// Arguments for `dataroom tree`
#[derive(Debug, Args)]
pub struct TreeCommand {
    /// Folder to start from
    #[arg(default_value = "/")]
    pub path: String,

    /// Number of folder levels to load below the start
    #[arg(long, default_value = "2")]
    pub depth: usize,
}

impl TreeCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let formatter = ctx.formatter();
        let start = session.folder(&self.path).await?;
        session.load_depth(&start, self.depth).await?;

        let entries: Vec<FlatEntry> = session
            .engine
            .forest()
            .await
            .flatten()
            .into_iter()
            .filter(|entry| is_below(entry, &start))
            .collect();

        if ctx.is_json() {
            let items: Vec<serde_json::Value> = entries.iter().map(entry_json).collect();
            formatter.print_json(&serde_json::json!({
                "path": start.to_string(),
                "count": items.len(),
                "items": items,
            }));
            return Ok(());
        }

        formatter.success(&start.to_string());
        if entries.is_empty() {
            formatter.info("(empty)");
        }
        for entry in &entries {
            let indent = "  ".repeat(entry_depth(entry).saturating_sub(start.depth() + 1));
            formatter.info(&format!("{indent}{}", describe(&entry.node)));
        }
        Ok(())
    }
}

/// Arguments for `dataroom search`
#[derive(Debug, Args)]
pub struct SearchCommand {
    /// Case-insensitive text to look for in names
    pub query: String,

    /// Number of folder levels to load before searching
    #[arg(long, default_value = "16")]
    pub depth: usize,
}

impl SearchCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let formatter = ctx.formatter();
        session.load_depth(&TreePath::root(), self.depth).await?;

        let hits = session.engine.search(&self.query).await;
        if ctx.is_json() {
            let items: Vec<serde_json::Value> = hits.iter().map(entry_json).collect();
            formatter.print_json(&serde_json::json!({
                "query": self.query,
                "count": items.len(),
                "items": items,
            }));
            return Ok(());
        }

        if hits.is_empty() {
            formatter.info(&format!("No items match '{}'", self.query));
            return Ok(());
        }
        formatter.success(&format!("{} match(es) for '{}'", hits.len(), self.query));
        for hit in &hits {
            let location = match &hit.node {
                TreeNode::Folder(_) => hit.path.to_string(),
                TreeNode::File(file) => format!("{}/{}", hit.path, file.name),
            };
            formatter.info(&location);
        }
        Ok(())
    }
}

/// True if the entry lies strictly below `start`
fn is_below(entry: &FlatEntry, start: &TreePath) -> bool {
    let segments = entry.path.segments();
    let prefix = start.segments();
    match &entry.node {
        TreeNode::Folder(_) => segments.len() > prefix.len() && segments.starts_with(prefix),
        TreeNode::File(_) => segments.starts_with(prefix),
    }
}

/// Nesting depth of the entry itself (root-level folders are 1)
fn entry_depth(entry: &FlatEntry) -> usize {
    match &entry.node {
        TreeNode::Folder(_) => entry.path.depth(),
        TreeNode::File(_) => entry.path.depth() + 1,
    }
}

fn describe(node: &TreeNode) -> String {
    match node {
        TreeNode::Folder(folder) => format!(
            "{}/  [{} folder(s), {} file(s)]",
            folder.name, folder.subfolder_count, folder.item_count
        ),
        TreeNode::File(file) => match (&file.url, file.size_bytes) {
            (Some(url), _) => format!("{} -> {url}", file.name),
            (None, Some(size)) => format!("{}  {}", file.name, human_bytes(size)),
            (None, None) => file.name.clone(),
        },
    }
}

fn entry_json(entry: &FlatEntry) -> serde_json::Value {
    serde_json::json!({
        "path": entry.path.to_string(),
        "item": entry.node,
    })
}
