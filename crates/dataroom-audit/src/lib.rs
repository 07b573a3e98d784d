//! Data room audit - fire-and-forget audit trail
//!
//! Provides:
//! - `AuditLogger`: high-level service that builds one audit entry per
//!   successful mutation and hands it to an `IAuditSink`
//!
//! Sink failures are logged and swallowed; they never fail the mutation
//! that triggered them.

pub mod logger;

pub use logger::AuditLogger;
