//! Audit sink port (driven/secondary port)
//!
//! Uses `anyhow::Result` because sink failures are adapter-specific and
//! are never propagated past the audit logger: they are logged and dropped.

use crate::domain::AuditEntry;

/// Port trait for persisting audit entries
#[async_trait::async_trait]
pub trait IAuditSink: Send + Sync {
    /// Persists a single audit entry
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}
