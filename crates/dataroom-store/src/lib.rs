//! Data room store - persistent folder/file records and blobs
//!
//! SQLite-based adapter for:
//! - Folder and file records with soft-delete/trash
//! - Per-user edit grants consulted by the capability check
//! - Audit trail persistence
//! - Filesystem blob storage with signed retrieval URLs
//!
//! ## Architecture
//!
//! This crate implements the `IRemoteStore`, `IBlobStore` and `IAuditSink`
//! ports from `dataroom-core`. It is a driven (secondary) adapter in the
//! hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteRemoteStore`] - Full `IRemoteStore` implementation
//! - [`FsBlobStore`] - `IBlobStore` over a local directory
//! - [`SqliteAuditSink`] - `IAuditSink` writing to the `audit_log` table
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use dataroom_audit::AuditLogger;
//! use dataroom_core::domain::UserId;
//! use dataroom_store::{Actor, DatabasePool, FsBlobStore, SqliteAuditSink, SqliteRemoteStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/dataroom/dataroom.db")).await?;
//! let blobs = Arc::new(FsBlobStore::new(Path::new("/home/user/.local/share/dataroom/blobs"), None).await?);
//! let audit = AuditLogger::new(Arc::new(SqliteAuditSink::new(pool.pool().clone())));
//! let actor = Actor::new(UserId::new("alice")?, true);
//! let store = SqliteRemoteStore::new(pool.pool().clone(), blobs, audit, actor);
//! # Ok(())
//! # }
//! ```

pub mod audit_sink;
pub mod blob;
pub mod pool;
pub mod repository;

pub use audit_sink::SqliteAuditSink;
pub use blob::FsBlobStore;
pub use pool::DatabasePool;
pub use repository::{Actor, SqliteRemoteStore};

use dataroom_core::domain::StoreError;

/// Errors raised while setting up or decoding the store
#[derive(Debug, thiserror::Error)]
pub enum StoreAdapterError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be turned back into a domain value
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The blob root could not be prepared
    #[error("Blob store error: {0}")]
    BlobRoot(String),
}

/// Classifies a SQLite failure into the store taxonomy.
///
/// Busy/locked databases and I/O failures are reported as transient so the
/// retry wrapper can absorb them.
pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed => StoreError::TransientNetwork(e.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::NameConflict(db.message().to_string()),
        sqlx::Error::Database(db) if is_busy(db.message()) => StoreError::TransientNetwork(db.message().to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

fn is_busy(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

impl From<StoreAdapterError> for StoreError {
    fn from(e: StoreAdapterError) -> Self {
        match e {
            StoreAdapterError::QueryFailed(e) => db_error(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
