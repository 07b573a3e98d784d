//! CLI commands and the session they share
//!
//! Every command opens a [`Session`]: configuration, the SQLite-backed
//! store acting as the configured identity, and a [`TreeSyncEngine`] whose
//! root level has been loaded. Paths on the command line are slug paths
//! (`/legal/contracts`); the last segment of an item path may also be a
//! file name (`/legal/nda.pdf`).

pub mod audit;
pub mod completions;
pub mod grant;
pub mod items;
pub mod trash;
pub mod tree;
pub mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tracing::debug;

use dataroom_audit::AuditLogger;
use dataroom_core::config::Config;
use dataroom_core::domain::{TreeNode, TreePath, UserId};
use dataroom_store::{Actor, DatabasePool, FsBlobStore, SqliteAuditSink, SqliteRemoteStore};
use dataroom_sync::TreeSyncEngine;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Global flags shared by every command
#[derive(Debug)]
pub struct Context {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: Option<PathBuf>,
}

impl Context {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Loads and validates the configuration.
    ///
    /// A missing default config file means defaults; a missing file passed
    /// with `--config` is an error.
    pub fn load_config(&self) -> Result<Config> {
        let config = match &self.config_path {
            Some(path) => Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => {
                let path = Config::default_path();
                if path.exists() {
                    Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))?
                } else {
                    debug!(path = %path.display(), "No config file; using defaults");
                    Config::default()
                }
            }
        };

        let errors = config.validate();
        if !errors.is_empty() {
            let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
            bail!("Invalid configuration:\n  {}", lines.join("\n  "));
        }
        Ok(config)
    }

    pub async fn open(&self) -> Result<Session> {
        Session::open(&self.load_config()?).await
    }
}

/// An open data room: store, audit trail and a refreshed engine
pub struct Session {
    pub store: Arc<SqliteRemoteStore>,
    pub audit: Arc<SqliteAuditSink>,
    pub engine: Arc<TreeSyncEngine>,
}

impl Session {
    pub async fn open(config: &Config) -> Result<Self> {
        let user = UserId::new(config.identity.user_id.clone()).context("Invalid identity.user_id")?;
        let pool = DatabasePool::new(&config.storage.database)
            .await
            .context("Failed to open database")?;
        let blobs = FsBlobStore::new(&config.storage.blob_root, config.storage.signing_secret.clone())
            .await
            .context("Failed to open blob store")?;

        let audit = Arc::new(SqliteAuditSink::new(pool.pool().clone()));
        let logger = AuditLogger::new(audit.clone());
        let store = Arc::new(SqliteRemoteStore::new(
            pool.pool().clone(),
            Arc::new(blobs),
            logger,
            Actor::new(user, config.identity.is_admin),
        ));

        let engine = Arc::new(TreeSyncEngine::new(store.clone(), config));
        engine.refresh().await.context("Failed to load the folder tree")?;

        Ok(Self {
            store,
            audit,
            engine,
        })
    }

    /// Loads every folder along `path` so that its children are known
    pub async fn open_path(&self, path: &TreePath) -> Result<()> {
        let mut prefix = TreePath::root();
        for slug in path.segments() {
            prefix = prefix.child(slug.clone());
            let folder_id = self
                .engine
                .forest()
                .await
                .resolve_path(&prefix)
                .map(|f| f.id)
                .with_context(|| format!("No folder at {prefix}"))?;
            self.engine.load_folder_children(&folder_id).await?;
        }
        Ok(())
    }

    /// Parses and opens a folder path
    pub async fn folder(&self, raw: &str) -> Result<TreePath> {
        let path = parse_path(raw)?;
        self.open_path(&path).await?;
        Ok(path)
    }

    /// Finds the item named by the last segment of `raw`.
    ///
    /// Returns the parent path and the node. Folders match by slug or name,
    /// files and links by name.
    pub async fn locate(&self, raw: &str) -> Result<(TreePath, TreeNode)> {
        let path = parse_path(raw)?;
        let Some((parent, name)) = split_last(&path) else {
            bail!("The root level is not an item");
        };
        self.open_path(&parent).await?;

        let node = self
            .engine
            .children_at(&parent)
            .await
            .into_iter()
            .find(|node| matches_segment(node, &name))
            .with_context(|| format!("Nothing named '{name}' at {parent}"))?;
        Ok((parent, node))
    }

    /// Loads folders below `path` down to `depth` levels
    pub async fn load_depth(&self, path: &TreePath, depth: usize) -> Result<()> {
        let mut frontier = vec![path.clone()];
        for _ in 0..depth {
            let mut next = Vec::new();
            for level in frontier {
                if !level.is_root() {
                    let folder_id = self.engine.forest().await.resolve_path(&level).map(|f| f.id);
                    if let Some(folder_id) = folder_id {
                        self.engine.load_folder_children(&folder_id).await?;
                    }
                }
                for child in self.engine.children_at(&level).await {
                    if let TreeNode::Folder(folder) = child {
                        next.push(level.child(folder.slug.clone()));
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(())
    }
}

pub fn parse_path(raw: &str) -> Result<TreePath> {
    TreePath::parse(raw).with_context(|| format!("Invalid path '{raw}'"))
}

/// Splits `path` into its parent and last segment
fn split_last(path: &TreePath) -> Option<(TreePath, String)> {
    let name = path.segments().last()?.clone();
    Some((path.parent()?, name))
}

fn matches_segment(node: &TreeNode, segment: &str) -> bool {
    match node {
        TreeNode::Folder(folder) => folder.slug == segment || folder.name == segment,
        TreeNode::File(file) => file.name == segment,
    }
}
