//! Domain error types
//!
//! This module defines error types specific to domain operations
//! (validation failures, malformed paths and identifiers) and the typed
//! failure taxonomy raised at the remote store boundary.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid tree path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid display name for a folder or file
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

/// Failures surfaced by the remote store and its collaborators
///
/// Every `IRemoteStore` operation returns this type so callers can branch
/// on the failure kind rather than on message text. Only the variants for
/// which [`StoreError::is_transient`] returns `true` are retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The caller lacks edit capability on the target
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The referenced folder or file is missing or already deleted
    #[error("Not found: {0}")]
    NotFound(String),

    /// A live sibling already holds the name or slug
    #[error("Name conflict: {0}")]
    NameConflict(String),

    /// The move would place a folder inside itself or its own descendant
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// Network, fetch or connection failure
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The backend did not answer in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The session token expired or was rejected
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// The operation was cancelled by the caller
    #[error("Cancelled")]
    Cancelled,

    /// Blob copy, upload or delete failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Any other backend failure (malformed rows, constraint violations)
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if the failure may succeed on a later attempt.
    ///
    /// Network failures, timeouts and auth/token errors are retryable;
    /// an explicit cancellation never is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::TransientNetwork(_) | StoreError::Timeout(_) | StoreError::AuthExpired(_)
        )
    }

    /// Short machine-readable code, used in audit details and CLI JSON output
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::PermissionDenied(_) => "permission_denied",
            StoreError::NotFound(_) => "not_found",
            StoreError::NameConflict(_) => "name_conflict",
            StoreError::InvalidMove(_) => "invalid_move",
            StoreError::TransientNetwork(_) => "network",
            StoreError::Timeout(_) => "timeout",
            StoreError::AuthExpired(_) => "auth_expired",
            StoreError::Cancelled => "cancelled",
            StoreError::Storage(_) => "storage",
            StoreError::Backend(_) => "backend",
        }
    }
}
