//! Move-legality checks for folder moves
//!
//! Consulted before any folder move reaches the store. The check only sees
//! the loaded part of the tree, so a move can pass here and still be
//! rejected server-side; the engine absorbs that by refreshing.

use thiserror::Error;

use dataroom_core::domain::{FolderId, Forest};

/// Why a folder move was rejected locally
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MoveViolation {
    #[error("a folder cannot be moved into itself")]
    SelfMove,

    #[error("a folder cannot be moved into its own descendant")]
    IntoDescendant,
}

/// Checks moving `folder` under `target` (the root level when `None`).
pub fn check_folder_move(forest: &Forest, folder: &FolderId, target: Option<&FolderId>) -> Result<(), MoveViolation> {
    let Some(target) = target else {
        return Ok(());
    };
    if folder == target {
        return Err(MoveViolation::SelfMove);
    }
    if forest.is_descendant_of(target, folder) {
        return Err(MoveViolation::IntoDescendant);
    }
    Ok(())
}

/// Returns true if `folder` may be moved into `target`
pub fn is_legal_move(forest: &Forest, folder: &FolderId, target: &FolderId) -> bool {
    check_folder_move(forest, folder, Some(target)).is_ok()
}
