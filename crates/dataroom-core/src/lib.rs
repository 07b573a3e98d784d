//! Data Room Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Folder`, `DataRoomFile`, `TreeNode`, `AuditEntry`
//! - **Tree model** - pure queries and copy-on-write updates over the folder forest
//! - **Naming** - slug derivation and sibling-collision disambiguation
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `IBlobStore`, `IAuditSink`
//!
//! # Architecture
//!
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement; the
//! synchronization engine drives the domain through those ports.

pub mod config;
pub mod domain;
pub mod ports;
