//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core and
//! the synchronization engine depend on, but whose implementations live
//! in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Persistent folder/file records, permissions, trash
//! - [`IBlobStore`] - Opaque byte storage with signed-URL retrieval
//! - [`IAuditSink`] - Destination for audit entries

pub mod audit_sink;
pub mod blob_store;
pub mod remote_store;

pub use audit_sink::IAuditSink;
pub use blob_store::IBlobStore;
pub use remote_store::{EditTarget, FolderOrder, IRemoteStore, StoreResult};
