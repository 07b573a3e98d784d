//! SQLite audit sink
//!
//! Persists audit entries to the `audit_log` table and reads them back for
//! the `audit` command.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use dataroom_core::domain::{AuditAction, AuditEntry, UserId};
use dataroom_core::ports::IAuditSink;

use crate::StoreAdapterError;

/// `IAuditSink` implementation writing to SQLite
#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All entries recorded for `target_id`, oldest first
    pub async fn trail(&self, target_id: &str) -> Result<Vec<AuditEntry>, StoreAdapterError> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE target_id = ? ORDER BY timestamp ASC, id ASC")
            .bind(target_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(audit_entry_from_row).collect()
    }

    /// The `limit` most recent entries, newest first
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditEntry>, StoreAdapterError> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY timestamp DESC, id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(audit_entry_from_row).collect()
    }
}

#[async_trait::async_trait]
impl IAuditSink for SqliteAuditSink {
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let details = serde_json::to_string(entry.details())
            .map_err(|e| anyhow::anyhow!("Failed to serialize audit details: {}", e))?;

        sqlx::query(
            "INSERT INTO audit_log (timestamp, actor, action, target_type, target_id, details) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.timestamp().to_rfc3339())
        .bind(entry.actor().map(UserId::as_str))
        .bind(entry.action().as_str())
        .bind(entry.target_type().as_str())
        .bind(entry.target_id())
        .bind(&details)
        .execute(&self.pool)
        .await?;

        tracing::trace!(action = %entry.action(), "Saved audit entry");
        Ok(())
    }
}

fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditEntry, StoreAdapterError> {
    let id: i64 = row.try_get("id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let actor: Option<String> = row.try_get("actor")?;
    let action: String = row.try_get("action")?;
    let target_id: String = row.try_get("target_id")?;
    let details: String = row.try_get("details")?;

    let action: AuditAction = action
        .parse()
        .map_err(|e| StoreAdapterError::SerializationError(format!("{e}")))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreAdapterError::SerializationError(format!("Failed to parse datetime '{}': {}", timestamp, e))
        })?;

    Ok(AuditEntry::new(action, target_id)
        .with_id(id)
        .with_timestamp(timestamp)
        .with_actor(actor.and_then(|a| UserId::new(a).ok()))
        .with_details(serde_json::from_str(&details).unwrap_or_default()))
}
