//! Folder and file records
//!
//! These are the nodes of the data-room tree. Child lists hold `Arc`s so a
//! structural update can rebuild the spine from the root to the edited
//! folder while sharing every untouched subtree with the previous forest.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FileId, FolderId, ItemId, UserId};

/// Discriminates the two item kinds held in a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Folder,
    File,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Folder => write!(f, "folder"),
            ItemKind::File => write!(f, "file"),
        }
    }
}

/// Whether a file record carries a stored blob or points at an external URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Physical file backed by a blob in the store
    File,
    /// External link; has a URL and no size or storage path
    Link,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Link => "link",
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = super::errors::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ItemType::File),
            "link" => Ok(ItemType::Link),
            other => Err(super::errors::DomainError::ValidationFailed(format!(
                "unknown item type '{other}'"
            ))),
        }
    }
}

/// A folder in the data room
///
/// `children` is only authoritative once the owning engine has marked this
/// folder as loaded; until then it is an empty placeholder, while
/// `item_count` and `subfolder_count` are valid from the first fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    /// `None` for root-level folders
    pub parent_id: Option<FolderId>,
    pub name: String,
    /// URL-safe, unique among live siblings sharing `parent_id`
    pub slug: String,
    pub order_index: i64,
    pub last_modified: DateTime<Utc>,
    pub last_modified_by: Option<UserId>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
    /// Transient UI annotation, never persisted by the store
    #[serde(default)]
    pub sharing_label: Option<String>,
    /// Folders first (by `order_index`), then files
    #[serde(default)]
    pub children: Vec<TreeNode>,
    /// Live files directly inside this folder
    pub item_count: u64,
    /// Live subfolders directly inside this folder
    pub subfolder_count: u64,
}

impl Folder {
    /// Creates a live, childless folder record
    pub fn new(id: FolderId, parent_id: Option<FolderId>, name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            slug: slug.into(),
            order_index: 0,
            last_modified: Utc::now(),
            last_modified_by: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            sharing_label: None,
            children: Vec::new(),
            item_count: 0,
            subfolder_count: 0,
        }
    }

    /// Iterates the subfolders among the loaded children
    pub fn subfolders(&self) -> impl Iterator<Item = &Arc<Folder>> {
        self.children.iter().filter_map(TreeNode::as_folder)
    }

    /// Iterates the files among the loaded children
    pub fn files(&self) -> impl Iterator<Item = &Arc<DataRoomFile>> {
        self.children.iter().filter_map(TreeNode::as_file)
    }

    /// Returns a copy with `children` replaced
    #[must_use]
    pub fn with_children(&self, children: Vec<TreeNode>) -> Self {
        Self {
            children,
            ..self.clone()
        }
    }
}

/// A file or link inside a folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRoomFile {
    pub id: FileId,
    /// Owning folder; files cannot live at the root level
    pub folder_id: FolderId,
    pub item_type: ItemType,
    pub name: String,
    /// `None` for links
    pub size_bytes: Option<u64>,
    /// Opaque blob-store key; only set for `ItemType::File`
    pub storage_path: Option<String>,
    /// Target URL; only set for `ItemType::Link`
    pub url: Option<String>,
    pub mime_type: Option<String>,
    /// SHA-256 hex digest of the uploaded bytes
    #[serde(default)]
    pub content_hash: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub last_modified_by: Option<UserId>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
    #[serde(default)]
    pub sharing_label: Option<String>,
}

/// A child of a folder: either a subfolder or a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Folder(Arc<Folder>),
    File(Arc<DataRoomFile>),
}

impl TreeNode {
    pub fn id(&self) -> ItemId {
        match self {
            TreeNode::Folder(f) => ItemId::Folder(f.id),
            TreeNode::File(f) => ItemId::File(f.id),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            TreeNode::Folder(_) => ItemKind::Folder,
            TreeNode::File(_) => ItemKind::File,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::Folder(f) => &f.name,
            TreeNode::File(f) => &f.name,
        }
    }

    pub fn as_folder(&self) -> Option<&Arc<Folder>> {
        match self {
            TreeNode::Folder(f) => Some(f),
            TreeNode::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<DataRoomFile>> {
        match self {
            TreeNode::Folder(_) => None,
            TreeNode::File(f) => Some(f),
        }
    }

    /// Returns true if this node carries the given raw identifier
    pub fn has_id(&self, id: &ItemId) -> bool {
        &self.id() == id
    }
}

impl From<Folder> for TreeNode {
    fn from(folder: Folder) -> Self {
        TreeNode::Folder(Arc::new(folder))
    }
}

impl From<DataRoomFile> for TreeNode {
    fn from(file: DataRoomFile) -> Self {
        TreeNode::File(Arc::new(file))
    }
}

/// One level of a folder's contents as returned by the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderContents {
    pub folders: Vec<Folder>,
    pub files: Vec<DataRoomFile>,
}

impl FolderContents {
    /// Flattens into the child ordering used by the tree: folders by
    /// `order_index`, then files by name
    pub fn into_children(self) -> Vec<TreeNode> {
        let FolderContents {
            mut folders,
            mut files,
        } = self;
        folders.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.name.cmp(&b.name)));
        files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        folders
            .into_iter()
            .map(TreeNode::from)
            .chain(files.into_iter().map(TreeNode::from))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}
