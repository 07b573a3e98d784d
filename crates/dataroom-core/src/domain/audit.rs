//! Audit entry domain entities
//!
//! Every successful structural mutation in the data room emits exactly one
//! audit entry with a stable action name (`folder.create`, `file.move`, ...),
//! a target, and a free-form details payload from which a human-readable
//! description can be rebuilt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::newtypes::UserId;

/// Actions that can be recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "folder.create")]
    FolderCreate,
    #[serde(rename = "folder.rename")]
    FolderRename,
    #[serde(rename = "folder.move")]
    FolderMove,
    #[serde(rename = "folder.reorder")]
    FolderReorder,
    #[serde(rename = "folder.delete")]
    FolderDelete,
    #[serde(rename = "folder.restore")]
    FolderRestore,
    #[serde(rename = "folder.hard_delete")]
    FolderHardDelete,
    #[serde(rename = "file.upload")]
    FileUpload,
    #[serde(rename = "file.create_link")]
    FileCreateLink,
    #[serde(rename = "file.rename")]
    FileRename,
    #[serde(rename = "file.move")]
    FileMove,
    #[serde(rename = "file.delete")]
    FileDelete,
    #[serde(rename = "file.restore")]
    FileRestore,
    #[serde(rename = "file.hard_delete")]
    FileHardDelete,
    #[serde(rename = "permission.grant")]
    PermissionGrant,
    #[serde(rename = "permission.revoke")]
    PermissionRevoke,
}

impl AuditAction {
    /// All actions, in declaration order
    pub const ALL: [AuditAction; 16] = [
        AuditAction::FolderCreate,
        AuditAction::FolderRename,
        AuditAction::FolderMove,
        AuditAction::FolderReorder,
        AuditAction::FolderDelete,
        AuditAction::FolderRestore,
        AuditAction::FolderHardDelete,
        AuditAction::FileUpload,
        AuditAction::FileCreateLink,
        AuditAction::FileRename,
        AuditAction::FileMove,
        AuditAction::FileDelete,
        AuditAction::FileRestore,
        AuditAction::FileHardDelete,
        AuditAction::PermissionGrant,
        AuditAction::PermissionRevoke,
    ];

    /// Stable dotted action name
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::FolderCreate => "folder.create",
            AuditAction::FolderRename => "folder.rename",
            AuditAction::FolderMove => "folder.move",
            AuditAction::FolderReorder => "folder.reorder",
            AuditAction::FolderDelete => "folder.delete",
            AuditAction::FolderRestore => "folder.restore",
            AuditAction::FolderHardDelete => "folder.hard_delete",
            AuditAction::FileUpload => "file.upload",
            AuditAction::FileCreateLink => "file.create_link",
            AuditAction::FileRename => "file.rename",
            AuditAction::FileMove => "file.move",
            AuditAction::FileDelete => "file.delete",
            AuditAction::FileRestore => "file.restore",
            AuditAction::FileHardDelete => "file.hard_delete",
            AuditAction::PermissionGrant => "permission.grant",
            AuditAction::PermissionRevoke => "permission.revoke",
        }
    }

    /// The kind of record this action targets
    pub fn target_type(&self) -> TargetType {
        match self {
            AuditAction::FolderCreate
            | AuditAction::FolderRename
            | AuditAction::FolderMove
            | AuditAction::FolderReorder
            | AuditAction::FolderDelete
            | AuditAction::FolderRestore
            | AuditAction::FolderHardDelete => TargetType::Folder,
            AuditAction::FileUpload
            | AuditAction::FileCreateLink
            | AuditAction::FileRename
            | AuditAction::FileMove
            | AuditAction::FileDelete
            | AuditAction::FileRestore
            | AuditAction::FileHardDelete => TargetType::File,
            AuditAction::PermissionGrant | AuditAction::PermissionRevoke => TargetType::Permission,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = super::errors::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                super::errors::DomainError::ValidationFailed(format!("unknown audit action '{s}'"))
            })
    }
}

/// What kind of record an audit entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Folder,
    File,
    Permission,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Folder => "folder",
            TargetType::File => "file",
            TargetType::Permission => "permission",
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An audit log entry recording a successful mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Assigned by the sink when persisted
    id: Option<i64>,
    timestamp: DateTime<Utc>,
    actor: Option<UserId>,
    action: AuditAction,
    target_type: TargetType,
    target_id: String,
    details: Value,
}

impl AuditEntry {
    /// Creates a new audit entry for `action` on `target_id`
    ///
    /// The target type is derived from the action.
    ///
    /// # Example
    ///
    /// ```
    /// use dataroom_core::domain::audit::{AuditAction, AuditEntry, TargetType};
    ///
    /// let entry = AuditEntry::new(AuditAction::FolderCreate, "f-1");
    /// assert_eq!(entry.target_type(), TargetType::Folder);
    /// assert!(entry.id().is_none());
    /// ```
    pub fn new(action: AuditAction, target_id: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            actor: None,
            action,
            target_type: action.target_type(),
            target_id: target_id.into(),
            details: Value::Null,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Sets the ID for this audit entry (typically called after database insert)
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Overrides the timestamp (used when rehydrating from storage)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn actor(&self) -> Option<&UserId> {
        self.actor.as_ref()
    }

    pub fn with_actor(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn details(&self) -> &Value {
        &self.details
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// One-line human-readable description built from the details payload
    pub fn describe(&self) -> String {
        let d = &self.details;
        let s = |key: &str| d.get(key).and_then(Value::as_str).unwrap_or("?").to_string();
        match self.action {
            AuditAction::FolderCreate => format!("created folder '{}'", s("name")),
            AuditAction::FolderRename | AuditAction::FileRename => {
                format!("renamed '{}' to '{}'", s("old_name"), s("new_name"))
            }
            AuditAction::FolderMove | AuditAction::FileMove => format!(
                "moved '{}' from {} to {}",
                s("name"),
                s("old_parent"),
                s("new_parent")
            ),
            AuditAction::FolderReorder => {
                let n = d.get("count").and_then(Value::as_u64).unwrap_or(0);
                format!("reordered {n} folders")
            }
            AuditAction::FileUpload => {
                let size = d.get("size_bytes").and_then(Value::as_u64).unwrap_or(0);
                format!("uploaded '{}' ({size} bytes)", s("name"))
            }
            AuditAction::FileCreateLink => format!("added link '{}' -> {}", s("name"), s("url")),
            AuditAction::FolderDelete | AuditAction::FileDelete => {
                format!("moved '{}' to trash", s("name"))
            }
            AuditAction::FolderRestore | AuditAction::FileRestore => {
                format!("restored '{}' from trash", s("name"))
            }
            AuditAction::FolderHardDelete | AuditAction::FileHardDelete => {
                format!("permanently deleted '{}'", s("name"))
            }
            AuditAction::PermissionGrant => format!("granted edit to {}", s("user_id")),
            AuditAction::PermissionRevoke => format!("revoked edit from {}", s("user_id")),
        }
    }
}
