//! Domain entities and business logic
//!
//! This module contains the core domain types for the data room:
//! - Newtypes for type-safe identifiers and tree paths
//! - Folder and file records, and the tree node union over them
//! - The tree model (forest queries and structural updates)
//! - Slug and file-name utilities
//! - Audit entries
//! - Domain and store error types

pub mod audit;
pub mod errors;
pub mod item;
pub mod naming;
pub mod newtypes;
pub mod tree;

// Re-export commonly used types
pub use audit::{AuditAction, AuditEntry, TargetType};
pub use errors::{DomainError, StoreError};
pub use item::{DataRoomFile, Folder, FolderContents, ItemKind, ItemType, TreeNode};
pub use newtypes::*;
pub use tree::{FlatEntry, Forest};
