//! Remote store port (driven/secondary port)
//!
//! This module defines the interface for the persistent side of the data
//! room: folder and file records, soft-delete/trash, capability checks and
//! blob-backed uploads. The synchronization engine treats it as its only
//! external boundary.
//!
//! ## Design Notes
//!
//! - Uses the typed [`StoreError`] rather than `anyhow` so callers can
//!   branch on permission denials, name conflicts and transient failures.
//! - Every mutating operation re-checks edit capability server-side; a
//!   local pre-check in the engine is only a fast path.
//! - Every successful mutation emits exactly one audit entry. Audit
//!   failures never fail the mutation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::StoreError;
use crate::domain::item::{DataRoomFile, Folder, FolderContents};
use crate::domain::newtypes::{FileId, FolderId};

/// Result alias for remote store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Target of a capability query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EditTarget {
    /// The virtual root level; only admins may edit it
    Root,
    Folder(FolderId),
    File(FileId),
}

impl From<Option<FolderId>> for EditTarget {
    fn from(parent: Option<FolderId>) -> Self {
        match parent {
            Some(id) => EditTarget::Folder(id),
            None => EditTarget::Root,
        }
    }
}

impl std::fmt::Display for EditTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditTarget::Root => write!(f, "root"),
            EditTarget::Folder(id) => write!(f, "folder {id}"),
            EditTarget::File(id) => write!(f, "file {id}"),
        }
    }
}

/// New sibling position for a batched reorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderOrder {
    pub id: FolderId,
    pub order_index: i64,
}

/// Port trait for the persistent folder/file store
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    // --- Queries ---

    /// Returns the live root-level folders with `children` empty and the
    /// denormalized counts populated
    async fn fetch_root_folders(&self) -> StoreResult<Vec<Folder>>;

    /// Returns one level of live children of `folder_id`
    async fn fetch_folder_children(&self, folder_id: &FolderId) -> StoreResult<FolderContents>;

    /// Returns every soft-deleted folder and file
    async fn list_trash(&self) -> StoreResult<FolderContents>;

    // --- Creation ---

    /// Creates a folder under `parent_id` (root level when `None`).
    ///
    /// The slug is derived from `name` and disambiguated against
    /// `sibling_slugs`; the name itself is not disambiguated.
    async fn create_folder(
        &self,
        parent_id: Option<&FolderId>,
        name: &str,
        sibling_slugs: &[String],
    ) -> StoreResult<Folder>;

    /// Stores `data` as a new file named `name` in `folder_id`
    async fn upload_file(
        &self,
        folder_id: &FolderId,
        name: &str,
        mime_type: Option<&str>,
        data: &[u8],
    ) -> StoreResult<DataRoomFile>;

    /// Creates a link item pointing at `url` in `folder_id`
    async fn create_link(&self, folder_id: &FolderId, name: &str, url: &str) -> StoreResult<DataRoomFile>;

    // --- Rename ---

    /// Renames a folder and recomputes its slug against `sibling_slugs`
    async fn rename_folder(&self, folder_id: &FolderId, new_name: &str, sibling_slugs: &[String]) -> StoreResult<()>;

    /// Renames a file, applying the extension-preservation rule.
    ///
    /// For physical files the blob is copied to a key derived from the new
    /// name; failing to remove the old blob is only a warning.
    async fn rename_file(&self, file_id: &FileId, new_name: &str) -> StoreResult<()>;

    // --- Delete / restore ---

    async fn delete_folder(&self, folder_id: &FolderId) -> StoreResult<()>;

    async fn delete_file(&self, file_id: &FileId) -> StoreResult<()>;

    /// Clears the deleted flag; fails with `NameConflict` if a live sibling
    /// now holds the same name or slug
    async fn restore_folder(&self, folder_id: &FolderId) -> StoreResult<()>;

    /// Clears the deleted flag; fails with `NameConflict` if a live file in
    /// the same folder now holds the same name
    async fn restore_file(&self, file_id: &FileId) -> StoreResult<()>;

    /// Irreversibly erases the folder, its descendants and their blobs
    async fn hard_delete_folder(&self, folder_id: &FolderId) -> StoreResult<()>;

    /// Irreversibly erases the file and its blob
    async fn hard_delete_file(&self, file_id: &FileId) -> StoreResult<()>;

    // --- Move / reorder ---

    /// Moves a file; requires edit capability on both folders
    async fn move_file_to_folder(&self, file_id: &FileId, new_folder_id: &FolderId) -> StoreResult<()>;

    /// Moves a folder under `new_parent_id` (root when `None`); requires
    /// edit capability on both the current and the new parent
    async fn move_folder_to_parent(
        &self,
        folder_id: &FolderId,
        new_parent_id: Option<&FolderId>,
        order_index: i64,
    ) -> StoreResult<()>;

    /// Persists a batched sibling reorder
    async fn update_folder_order(&self, order: &[FolderOrder]) -> StoreResult<()>;

    // --- Capabilities and retrieval ---

    /// Returns whether the acting user may edit `target`.
    ///
    /// Never fails for "no permission" (returns `false`); an `Err` means
    /// the check itself could not run.
    async fn can_edit(&self, target: EditTarget) -> StoreResult<bool>;

    /// Returns a time-limited retrieval URL for a physical file, or the
    /// target URL for a link
    async fn signed_url(&self, file_id: &FileId, ttl: Duration) -> StoreResult<String>;
}
