//! Data Room Sync - client-side tree mirror and mutation engine
//!
//! Provides:
//! - A lazily-loaded mirror of the server folder tree
//! - Optimistic moves and reorders, reverted by refetch on failure
//! - Sequential, cancellable batch uploads with smoothed progress
//! - Bounded retries and deadlines around every remote call
//!
//! ## Modules
//!
//! - [`engine`] - [`TreeSyncEngine`](engine::TreeSyncEngine), the orchestrator owning client state
//! - [`upload`] - Upload coordinator and progress reporting
//! - [`legality`] - Cycle and self-move checks for folder moves
//! - [`retry`] - Retry with exponential backoff, and deadlines

pub mod engine;
pub mod legality;
pub mod retry;
pub mod upload;

use thiserror::Error;

use dataroom_core::domain::{ItemId, StoreError, TreePath};

pub use engine::{EngineSettings, TreeSyncEngine, Visibility};
pub use legality::MoveViolation;
pub use upload::{UploadItem, UploadProgress};

/// Errors surfaced by engine operations
///
/// Remote failures keep their store classification in [`SyncError::Store`];
/// the other variants are raised by the engine itself, before or after the
/// remote call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A remote store call failed (after retries, for transient failures)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The folder move was rejected locally; nothing was sent
    #[error("Illegal move: {0}")]
    IllegalMove(#[from] MoveViolation),

    /// Files cannot live at the root level
    #[error("Files cannot be placed at the root level")]
    FileAtRoot,

    /// The path does not resolve through the loaded tree
    #[error("Path not found: {0}")]
    PathNotFound(TreePath),

    /// The item is not a loaded child of the given path
    #[error("Item {item} not found at {path}")]
    ItemNotFound { path: TreePath, item: ItemId },

    /// Another upload batch is still active
    #[error("An upload is already in progress")]
    UploadInProgress,

    /// The upload batch was cancelled; `completed` files were stored before it stopped
    #[error("Upload cancelled after {completed} file(s)")]
    Cancelled { completed: usize },

    /// Every file was uploaded but the follow-up refresh failed
    #[error("Uploaded {uploaded} file(s) but the view may be stale: {cause}")]
    StaleAfterUpload { uploaded: usize, cause: StoreError },
}

impl SyncError {
    /// Returns true for a user-requested cancellation, which is not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled { .. } | SyncError::Store(StoreError::Cancelled)
        )
    }

    /// Short machine-readable code for CLI JSON output
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Store(e) => e.code(),
            SyncError::IllegalMove(_) => "illegal_move",
            SyncError::FileAtRoot => "file_at_root",
            SyncError::PathNotFound(_) => "path_not_found",
            SyncError::ItemNotFound { .. } => "item_not_found",
            SyncError::UploadInProgress => "upload_in_progress",
            SyncError::Cancelled { .. } => "cancelled",
            SyncError::StaleAfterUpload { .. } => "stale_after_upload",
        }
    }
}
