//! AuditLogger - high-level audit logging service
//!
//! Wraps `IAuditSink::record()` with one convenience method per auditable
//! mutation. All methods are non-fatal: errors in audit persistence are
//! logged via `tracing::warn!` but never propagated.

use std::sync::Arc;

use dataroom_core::{
    domain::{
        audit::{AuditAction, AuditEntry},
        newtypes::{FileId, FolderId, ItemId, UserId},
    },
    ports::{audit_sink::IAuditSink, remote_store::EditTarget},
};
use serde_json::json;

/// Renders an optional parent for the details payload; `None` is the root level
fn parent_label(parent: Option<&FolderId>) -> String {
    parent.map_or_else(|| "root".to_string(), ToString::to_string)
}

/// High-level audit logger over an [`IAuditSink`].
///
/// Every entry is stamped with the actor the logger was built for.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn IAuditSink>,
    actor: Option<UserId>,
}

impl AuditLogger {
    /// Creates a new `AuditLogger` writing to `sink`, without an actor
    pub fn new(sink: Arc<dyn IAuditSink>) -> Self {
        Self { sink, actor: None }
    }

    /// Returns a logger stamping entries with `actor`
    #[must_use]
    pub fn with_actor(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn actor(&self) -> Option<&UserId> {
        self.actor.as_ref()
    }

    /// Persist an audit entry, swallowing errors with a tracing warning.
    async fn save(&self, entry: AuditEntry) {
        let entry = entry.with_actor(self.actor.clone());
        if let Err(e) = self.sink.record(&entry).await {
            tracing::warn!(
                error = %e,
                action = %entry.action(),
                target_id = entry.target_id(),
                "Failed to save audit entry"
            );
        }
    }

    // ========================================================================
    // Folder operations
    // ========================================================================

    pub async fn log_folder_create(&self, folder_id: &FolderId, name: &str, slug: &str, parent: Option<&FolderId>) {
        let entry = AuditEntry::new(AuditAction::FolderCreate, folder_id.to_string()).with_details(json!({
            "name": name,
            "slug": slug,
            "parent": parent_label(parent),
        }));
        self.save(entry).await;
    }

    pub async fn log_folder_rename(&self, folder_id: &FolderId, old_name: &str, new_name: &str, new_slug: &str) {
        let entry = AuditEntry::new(AuditAction::FolderRename, folder_id.to_string()).with_details(json!({
            "old_name": old_name,
            "new_name": new_name,
            "new_slug": new_slug,
        }));
        self.save(entry).await;
    }

    pub async fn log_folder_move(
        &self,
        folder_id: &FolderId,
        name: &str,
        old_parent: Option<&FolderId>,
        new_parent: Option<&FolderId>,
        order_index: i64,
    ) {
        let entry = AuditEntry::new(AuditAction::FolderMove, folder_id.to_string()).with_details(json!({
            "name": name,
            "old_parent": parent_label(old_parent),
            "new_parent": parent_label(new_parent),
            "order_index": order_index,
        }));
        self.save(entry).await;
    }

    /// Log a batched sibling reorder. The target is the first reordered folder.
    pub async fn log_folder_reorder(&self, ordered: &[FolderId]) {
        let Some(first) = ordered.first() else {
            return;
        };
        let ids: Vec<String> = ordered.iter().map(ToString::to_string).collect();
        let entry = AuditEntry::new(AuditAction::FolderReorder, first.to_string()).with_details(json!({
            "count": ordered.len(),
            "ids": ids,
        }));
        self.save(entry).await;
    }

    // ========================================================================
    // File operations
    // ========================================================================

    pub async fn log_file_upload(&self, file_id: &FileId, folder_id: &FolderId, name: &str, size_bytes: u64) {
        let entry = AuditEntry::new(AuditAction::FileUpload, file_id.to_string()).with_details(json!({
            "name": name,
            "folder": folder_id.to_string(),
            "size_bytes": size_bytes,
        }));
        self.save(entry).await;
    }

    pub async fn log_link_create(&self, file_id: &FileId, folder_id: &FolderId, name: &str, url: &str) {
        let entry = AuditEntry::new(AuditAction::FileCreateLink, file_id.to_string()).with_details(json!({
            "name": name,
            "folder": folder_id.to_string(),
            "url": url,
        }));
        self.save(entry).await;
    }

    pub async fn log_file_rename(&self, file_id: &FileId, old_name: &str, new_name: &str) {
        let entry = AuditEntry::new(AuditAction::FileRename, file_id.to_string()).with_details(json!({
            "old_name": old_name,
            "new_name": new_name,
        }));
        self.save(entry).await;
    }

    pub async fn log_file_move(&self, file_id: &FileId, name: &str, old_folder: &FolderId, new_folder: &FolderId) {
        let entry = AuditEntry::new(AuditAction::FileMove, file_id.to_string()).with_details(json!({
            "name": name,
            "old_parent": old_folder.to_string(),
            "new_parent": new_folder.to_string(),
        }));
        self.save(entry).await;
    }

    // ========================================================================
    // Trash lifecycle
    // ========================================================================

    /// Log a soft delete of a folder or file
    pub async fn log_delete(&self, item: &ItemId, name: &str) {
        let action = match item {
            ItemId::Folder(_) => AuditAction::FolderDelete,
            ItemId::File(_) => AuditAction::FileDelete,
        };
        self.log_item(action, item, name).await;
    }

    pub async fn log_restore(&self, item: &ItemId, name: &str) {
        let action = match item {
            ItemId::Folder(_) => AuditAction::FolderRestore,
            ItemId::File(_) => AuditAction::FileRestore,
        };
        self.log_item(action, item, name).await;
    }

    /// Log an irreversible delete. `erased` counts the records removed with it.
    pub async fn log_hard_delete(&self, item: &ItemId, name: &str, erased: u64) {
        let action = match item {
            ItemId::Folder(_) => AuditAction::FolderHardDelete,
            ItemId::File(_) => AuditAction::FileHardDelete,
        };
        let entry = AuditEntry::new(action, item_target(item)).with_details(json!({
            "name": name,
            "erased": erased,
        }));
        self.save(entry).await;
    }

    async fn log_item(&self, action: AuditAction, item: &ItemId, name: &str) {
        let entry = AuditEntry::new(action, item_target(item)).with_details(json!({ "name": name }));
        self.save(entry).await;
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    pub async fn log_permission_grant(&self, user: &UserId, target: &EditTarget) {
        self.log_permission(AuditAction::PermissionGrant, user, target).await;
    }

    pub async fn log_permission_revoke(&self, user: &UserId, target: &EditTarget) {
        self.log_permission(AuditAction::PermissionRevoke, user, target).await;
    }

    async fn log_permission(&self, action: AuditAction, user: &UserId, target: &EditTarget) {
        let entry = AuditEntry::new(action, target.to_string()).with_details(json!({
            "user_id": user.as_str(),
            "target": target.to_string(),
        }));
        self.save(entry).await;
    }
}

fn item_target(item: &ItemId) -> String {
    match item {
        ItemId::Folder(id) => id.to_string(),
        ItemId::File(id) => id.to_string(),
    }
}
