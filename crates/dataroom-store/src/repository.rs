//! SQLite implementation of IRemoteStore
//!
//! Folder and file records live in SQLite; file bytes live behind an
//! `IBlobStore`. Every mutation re-checks edit capability for the acting
//! user and emits exactly one audit entry on success.
//!
//! ## Type Mapping
//!
//! | Domain Type            | SQL Type | Strategy                                   |
//! |------------------------|----------|--------------------------------------------|
//! | FolderId, FileId       | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | UserId                 | TEXT     | String via `.as_str()` / `UserId::new()`   |
//! | DateTime<Utc>          | TEXT     | RFC 3339 via `to_rfc3339()`                |
//! | ItemType               | TEXT     | `"file"` / `"link"`                        |
//! | bool                   | INTEGER  | 0 / 1                                      |
//!
//! Blob keys have the form `{folder_id}/{file_id}/{name}`.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use dataroom_audit::AuditLogger;
use dataroom_core::domain::{
    naming::{preserve_extension, slug_from_name, unique_slug},
    DataRoomFile, FileId, Folder, FolderContents, FolderId, ItemId, ItemType, StoreError, UserId,
};
use dataroom_core::ports::{EditTarget, FolderOrder, IBlobStore, IRemoteStore, StoreResult};

use crate::{db_error, StoreAdapterError};

/// The user on whose behalf the store acts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    /// Admins may edit everything, including the root level
    pub is_admin: bool,
}

impl Actor {
    pub fn new(user_id: UserId, is_admin: bool) -> Self {
        Self { user_id, is_admin }
    }
}

/// SQLite-backed implementation of the remote store port
pub struct SqliteRemoteStore {
    pool: SqlitePool,
    blobs: Arc<dyn IBlobStore>,
    audit: AuditLogger,
    actor: Actor,
}

impl SqliteRemoteStore {
    /// Creates a store acting as `actor`; audit entries are stamped with it
    pub fn new(pool: SqlitePool, blobs: Arc<dyn IBlobStore>, audit: AuditLogger, actor: Actor) -> Self {
        let audit = audit.with_actor(actor.user_id.clone());
        Self {
            pool,
            blobs,
            audit,
            actor,
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

const FOLDER_SELECT: &str = "SELECT f.*, \
     (SELECT COUNT(*) FROM files x WHERE x.folder_id = f.id AND x.is_deleted = 0) AS item_count, \
     (SELECT COUNT(*) FROM folders s WHERE s.parent_id = f.id AND s.is_deleted = 0) AS subfolder_count \
     FROM folders f";

/// Recursive CTE binding one folder id and yielding it plus every descendant
const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS ( \
     SELECT ? UNION ALL \
     SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id)";

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn storage_key(folder_id: &FolderId, file_id: &FileId, name: &str) -> String {
    format!("{folder_id}/{file_id}/{name}")
}

fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreAdapterError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreAdapterError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e)))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreAdapterError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_id<T>(s: &str) -> Result<T, StoreAdapterError>
where
    T: FromStr,
    T::Err: Display,
{
    s.parse()
        .map_err(|e: T::Err| StoreAdapterError::SerializationError(e.to_string()))
}

fn parse_user(s: Option<String>) -> Option<UserId> {
    s.and_then(|s| UserId::new(s).ok())
}

fn count(row: &SqliteRow, column: &str) -> Result<u64, StoreAdapterError> {
    let n: i64 = row.try_get(column)?;
    Ok(u64::try_from(n).unwrap_or(0))
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn folder_from_row(row: &SqliteRow) -> Result<Folder, StoreAdapterError> {
    let id: String = row.try_get("id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let last_modified: String = row.try_get("last_modified")?;

    Ok(Folder {
        id: parse_id(&id)?,
        parent_id: parent_id.as_deref().map(parse_id).transpose()?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        order_index: row.try_get("order_index")?,
        last_modified: parse_datetime(&last_modified)?,
        last_modified_by: parse_user(row.try_get("last_modified_by")?),
        is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
        deleted_at: parse_optional_datetime(row.try_get("deleted_at")?)?,
        deleted_by: parse_user(row.try_get("deleted_by")?),
        sharing_label: None,
        children: Vec::new(),
        item_count: count(row, "item_count")?,
        subfolder_count: count(row, "subfolder_count")?,
    })
}

fn file_from_row(row: &SqliteRow) -> Result<DataRoomFile, StoreAdapterError> {
    let id: String = row.try_get("id")?;
    let folder_id: String = row.try_get("folder_id")?;
    let item_type: String = row.try_get("item_type")?;
    let size_bytes: Option<i64> = row.try_get("size_bytes")?;
    let last_modified: String = row.try_get("last_modified")?;

    Ok(DataRoomFile {
        id: parse_id(&id)?,
        folder_id: parse_id(&folder_id)?,
        item_type: parse_id::<ItemType>(&item_type)?,
        name: row.try_get("name")?,
        size_bytes: size_bytes.and_then(|n| u64::try_from(n).ok()),
        storage_path: row.try_get("storage_path")?,
        url: row.try_get("url")?,
        mime_type: row.try_get("mime_type")?,
        content_hash: row.try_get("content_hash")?,
        last_modified: parse_datetime(&last_modified)?,
        last_modified_by: parse_user(row.try_get("last_modified_by")?),
        is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
        deleted_at: parse_optional_datetime(row.try_get("deleted_at")?)?,
        deleted_by: parse_user(row.try_get("deleted_by")?),
        sharing_label: None,
    })
}

fn folders_from_rows(rows: &[SqliteRow]) -> StoreResult<Vec<Folder>> {
    Ok(rows
        .iter()
        .map(folder_from_row)
        .collect::<Result<Vec<_>, StoreAdapterError>>()?)
}

fn files_from_rows(rows: &[SqliteRow]) -> StoreResult<Vec<DataRoomFile>> {
    Ok(rows
        .iter()
        .map(file_from_row)
        .collect::<Result<Vec<_>, StoreAdapterError>>()?)
}

fn validate_name(name: &str) -> StoreResult<&str> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') {
        return Err(StoreError::Backend(format!("Invalid name: '{name}'")));
    }
    Ok(name)
}

// ============================================================================
// Record lookups and checks
// ============================================================================

impl SqliteRemoteStore {
    async fn get_folder(&self, id: &FolderId, include_deleted: bool) -> StoreResult<Folder> {
        let sql = format!("{FOLDER_SELECT} WHERE f.id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => {
                let folder = folder_from_row(&row)?;
                if folder.is_deleted && !include_deleted {
                    Err(StoreError::NotFound(format!("Folder {id} is in trash")))
                } else {
                    Ok(folder)
                }
            }
            None => Err(StoreError::NotFound(format!("Folder {id}"))),
        }
    }

    async fn get_file(&self, id: &FileId, include_deleted: bool) -> StoreResult<DataRoomFile> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => {
                let file = file_from_row(&row)?;
                if file.is_deleted && !include_deleted {
                    Err(StoreError::NotFound(format!("File {id} is in trash")))
                } else {
                    Ok(file)
                }
            }
            None => Err(StoreError::NotFound(format!("File {id}"))),
        }
    }

    /// Live folders under `parent` (root when `None`), minus `exclude`
    async fn live_siblings(&self, parent: Option<&FolderId>, exclude: Option<&FolderId>) -> StoreResult<Vec<Folder>> {
        let sql = format!("{FOLDER_SELECT} WHERE f.parent_id IS ? AND f.is_deleted = 0");
        let rows = sqlx::query(&sql)
            .bind(parent.map(ToString::to_string))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let mut folders = folders_from_rows(&rows)?;
        folders.retain(|f| Some(&f.id) != exclude);
        Ok(folders)
    }

    /// Collision-free slug for `name` among the live siblings and `known` slugs
    async fn slug_for(
        &self,
        name: &str,
        parent: Option<&FolderId>,
        exclude: Option<&FolderId>,
        known: &[String],
    ) -> StoreResult<String> {
        let mut taken: Vec<String> = self
            .live_siblings(parent, exclude)
            .await?
            .into_iter()
            .map(|f| f.slug)
            .collect();
        taken.extend(known.iter().cloned());
        Ok(unique_slug(&slug_from_name(name), &taken))
    }

    /// Fails with `NameConflict` if a live file in `folder_id` other than
    /// `exclude` already holds `name` (case-insensitive)
    async fn ensure_file_name_free(&self, folder_id: &FolderId, name: &str, exclude: Option<&FileId>) -> StoreResult<()> {
        let rows = sqlx::query("SELECT id, name FROM files WHERE folder_id = ? AND is_deleted = 0")
            .bind(folder_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let exclude = exclude.map(ToString::to_string);
        let wanted = name.to_lowercase();
        for row in &rows {
            let id: String = row.try_get("id").map_err(db_error)?;
            let existing: String = row.try_get("name").map_err(db_error)?;
            if Some(&id) != exclude.as_ref() && existing.to_lowercase() == wanted {
                return Err(StoreError::NameConflict(format!(
                    "A file named '{existing}' already exists in this folder"
                )));
            }
        }
        Ok(())
    }

    async fn has_grant(&self, target_type: &str, target_id: &str) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM permissions WHERE user_id = ? AND target_type = ? AND target_id = ?",
        )
        .bind(self.actor.user_id.as_str())
        .bind(target_type)
        .bind(target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        let n: i64 = row.try_get("n").map_err(db_error)?;
        Ok(n > 0)
    }

    /// Fails with `PermissionDenied` unless the actor may edit `target`.
    ///
    /// A failure of the check itself counts as a denial.
    async fn require_edit(&self, target: EditTarget) -> StoreResult<()> {
        match self.can_edit(target).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(StoreError::PermissionDenied(format!(
                "{} cannot edit {target}",
                self.actor.user_id
            ))),
            Err(e) => {
                tracing::warn!(error = %e, %target, "Permission check failed; denying");
                Err(StoreError::PermissionDenied(format!("Could not verify access to {target}")))
            }
        }
    }

    /// Ids of `folder_id` and all its descendants, deleted or not
    async fn subtree_ids(&self, folder_id: &FolderId) -> StoreResult<HashSet<String>> {
        let sql = format!("{SUBTREE_CTE} SELECT id FROM subtree");
        let rows = sqlx::query(&sql)
            .bind(folder_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("id").map_err(db_error))
            .collect()
    }

    /// Removes a blob that is no longer referenced, logging failures.
    ///
    /// A failure leaves an orphaned blob behind.
    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            tracing::warn!(error = %e, key, "Failed to remove blob; it is now orphaned");
        }
    }

    // ========================================================================
    // Permission grants
    // ========================================================================

    /// Grants `user` edit capability on a folder or file. Admin only.
    #[tracing::instrument(skip(self))]
    pub async fn grant_edit(&self, user: &UserId, target: EditTarget) -> StoreResult<()> {
        let (target_type, target_id) = self.grant_target(target).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO permissions (user_id, target_type, target_id, granted_at, granted_by) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.as_str())
        .bind(target_type)
        .bind(&target_id)
        .bind(now())
        .bind(self.actor.user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::info!(user = %user, %target, "Granted edit");
        self.audit.log_permission_grant(user, &target).await;
        Ok(())
    }

    /// Revokes a grant made with [`grant_edit`](Self::grant_edit). Admin only.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_edit(&self, user: &UserId, target: EditTarget) -> StoreResult<()> {
        let (target_type, target_id) = self.grant_target(target).await?;
        let result = sqlx::query("DELETE FROM permissions WHERE user_id = ? AND target_type = ? AND target_id = ?")
            .bind(user.as_str())
            .bind(target_type)
            .bind(&target_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("No grant for {user} on {target}")));
        }

        tracing::info!(user = %user, %target, "Revoked edit");
        self.audit.log_permission_revoke(user, &target).await;
        Ok(())
    }

    async fn grant_target(&self, target: EditTarget) -> StoreResult<(&'static str, String)> {
        if !self.actor.is_admin {
            return Err(StoreError::PermissionDenied("Only admins manage grants".to_string()));
        }
        match target {
            EditTarget::Root => Err(StoreError::Backend("Root-level edit is reserved for admins".to_string())),
            EditTarget::Folder(id) => {
                self.get_folder(&id, true).await?;
                Ok(("folder", id.to_string()))
            }
            EditTarget::File(id) => {
                self.get_file(&id, true).await?;
                Ok(("file", id.to_string()))
            }
        }
    }
}

// ============================================================================
// IRemoteStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IRemoteStore for SqliteRemoteStore {
    // --- Queries ---

    async fn fetch_root_folders(&self) -> StoreResult<Vec<Folder>> {
        let sql = format!("{FOLDER_SELECT} WHERE f.parent_id IS NULL AND f.is_deleted = 0 ORDER BY f.order_index, f.name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_error)?;
        folders_from_rows(&rows)
    }

    async fn fetch_folder_children(&self, folder_id: &FolderId) -> StoreResult<FolderContents> {
        self.get_folder(folder_id, false).await?;

        let sql = format!("{FOLDER_SELECT} WHERE f.parent_id = ? AND f.is_deleted = 0 ORDER BY f.order_index, f.name");
        let folder_rows = sqlx::query(&sql)
            .bind(folder_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let file_rows = sqlx::query("SELECT * FROM files WHERE folder_id = ? AND is_deleted = 0 ORDER BY name")
            .bind(folder_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(FolderContents {
            folders: folders_from_rows(&folder_rows)?,
            files: files_from_rows(&file_rows)?,
        })
    }

    async fn list_trash(&self) -> StoreResult<FolderContents> {
        let sql = format!("{FOLDER_SELECT} WHERE f.is_deleted = 1 ORDER BY f.deleted_at DESC");
        let folder_rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_error)?;
        let file_rows = sqlx::query("SELECT * FROM files WHERE is_deleted = 1 ORDER BY deleted_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(FolderContents {
            folders: folders_from_rows(&folder_rows)?,
            files: files_from_rows(&file_rows)?,
        })
    }

    // --- Creation ---

    #[tracing::instrument(skip(self, sibling_slugs))]
    async fn create_folder(&self, parent_id: Option<&FolderId>, name: &str, sibling_slugs: &[String]) -> StoreResult<Folder> {
        let name = validate_name(name)?;
        if let Some(parent) = parent_id {
            self.get_folder(parent, false).await?;
        }
        self.require_edit(EditTarget::from(parent_id.copied())).await?;

        let slug = self.slug_for(name, parent_id, None, sibling_slugs).await?;
        let order_row = sqlx::query(
            "SELECT COALESCE(MAX(order_index) + 1, 0) AS next FROM folders WHERE parent_id IS ? AND is_deleted = 0",
        )
        .bind(parent_id.map(ToString::to_string))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        let order_index: i64 = order_row.try_get("next").map_err(db_error)?;

        let id = FolderId::new();
        sqlx::query(
            "INSERT INTO folders (id, parent_id, name, slug, order_index, last_modified, last_modified_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(parent_id.map(ToString::to_string))
        .bind(name)
        .bind(&slug)
        .bind(order_index)
        .bind(now())
        .bind(self.actor.user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::info!(folder_id = %id, %slug, "Folder created");
        self.audit.log_folder_create(&id, name, &slug, parent_id).await;
        self.get_folder(&id, false).await
    }

    #[tracing::instrument(skip(self, data), fields(bytes = data.len()))]
    async fn upload_file(
        &self,
        folder_id: &FolderId,
        name: &str,
        mime_type: Option<&str>,
        data: &[u8],
    ) -> StoreResult<DataRoomFile> {
        let name = validate_name(name)?;
        self.get_folder(folder_id, false).await?;
        self.require_edit(EditTarget::Folder(*folder_id)).await?;
        self.ensure_file_name_free(folder_id, name, None).await?;

        let id = FileId::new();
        let key = storage_key(folder_id, &id, name);
        self.blobs.put(&key, data).await?;

        let inserted = sqlx::query(
            "INSERT INTO files (id, folder_id, item_type, name, size_bytes, storage_path, mime_type, \
             content_hash, last_modified, last_modified_by) VALUES (?, ?, 'file', ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(folder_id.to_string())
        .bind(name)
        .bind(i64::try_from(data.len()).unwrap_or(i64::MAX))
        .bind(&key)
        .bind(mime_type)
        .bind(content_hash(data))
        .bind(now())
        .bind(self.actor.user_id.as_str())
        .execute(&self.pool)
        .await;
        if let Err(e) = inserted {
            self.discard_blob(&key).await;
            return Err(db_error(e));
        }

        tracing::info!(file_id = %id, %key, "File uploaded");
        self.audit
            .log_file_upload(&id, folder_id, name, data.len() as u64)
            .await;
        self.get_file(&id, false).await
    }

    #[tracing::instrument(skip(self))]
    async fn create_link(&self, folder_id: &FolderId, name: &str, url: &str) -> StoreResult<DataRoomFile> {
        let name = validate_name(name)?;
        let url = url.trim();
        if url.is_empty() {
            return Err(StoreError::Backend("Link URL cannot be empty".to_string()));
        }
        self.get_folder(folder_id, false).await?;
        self.require_edit(EditTarget::Folder(*folder_id)).await?;
        self.ensure_file_name_free(folder_id, name, None).await?;

        let id = FileId::new();
        sqlx::query(
            "INSERT INTO files (id, folder_id, item_type, name, url, last_modified, last_modified_by) \
             VALUES (?, ?, 'link', ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(folder_id.to_string())
        .bind(name)
        .bind(url)
        .bind(now())
        .bind(self.actor.user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.audit.log_link_create(&id, folder_id, name, url).await;
        self.get_file(&id, false).await
    }

    // --- Rename ---

    #[tracing::instrument(skip(self, sibling_slugs))]
    async fn rename_folder(&self, folder_id: &FolderId, new_name: &str, sibling_slugs: &[String]) -> StoreResult<()> {
        let new_name = validate_name(new_name)?;
        let folder = self.get_folder(folder_id, false).await?;
        self.require_edit(EditTarget::Folder(*folder_id)).await?;

        let known: Vec<String> = sibling_slugs
            .iter()
            .filter(|s| **s != folder.slug)
            .cloned()
            .collect();
        let slug = self
            .slug_for(new_name, folder.parent_id.as_ref(), Some(folder_id), &known)
            .await?;

        sqlx::query("UPDATE folders SET name = ?, slug = ?, last_modified = ?, last_modified_by = ? WHERE id = ?")
            .bind(new_name)
            .bind(&slug)
            .bind(now())
            .bind(self.actor.user_id.as_str())
            .bind(folder_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.audit
            .log_folder_rename(folder_id, &folder.name, new_name, &slug)
            .await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn rename_file(&self, file_id: &FileId, new_name: &str) -> StoreResult<()> {
        let file = self.get_file(file_id, false).await?;
        self.require_edit(EditTarget::File(*file_id)).await?;

        let final_name = preserve_extension(&file.name, new_name);
        let final_name = validate_name(&final_name)?.to_string();
        if final_name == file.name {
            return Ok(());
        }
        self.ensure_file_name_free(&file.folder_id, &final_name, Some(file_id))
            .await?;

        // Physical files move their blob to a key derived from the new name.
        let moved_blob = match (&file.item_type, &file.storage_path) {
            (ItemType::File, Some(old_key)) => {
                let new_key = storage_key(&file.folder_id, file_id, &final_name);
                self.blobs.copy(old_key, &new_key).await?;
                Some((old_key.clone(), new_key))
            }
            _ => None,
        };

        let updated = sqlx::query(
            "UPDATE files SET name = ?, storage_path = COALESCE(?, storage_path), last_modified = ?, \
             last_modified_by = ? WHERE id = ?",
        )
        .bind(&final_name)
        .bind(moved_blob.as_ref().map(|(_, new_key)| new_key.clone()))
        .bind(now())
        .bind(self.actor.user_id.as_str())
        .bind(file_id.to_string())
        .execute(&self.pool)
        .await;

        match (updated, moved_blob) {
            (Err(e), Some((_, new_key))) => {
                self.discard_blob(&new_key).await;
                return Err(db_error(e));
            }
            (Err(e), None) => return Err(db_error(e)),
            (Ok(_), Some((old_key, _))) => self.discard_blob(&old_key).await,
            (Ok(_), None) => {}
        }

        self.audit.log_file_rename(file_id, &file.name, &final_name).await;
        Ok(())
    }

    // --- Delete / restore ---

    #[tracing::instrument(skip(self))]
    async fn delete_folder(&self, folder_id: &FolderId) -> StoreResult<()> {
        let folder = self.get_folder(folder_id, false).await?;
        self.require_edit(EditTarget::Folder(*folder_id)).await?;

        sqlx::query("UPDATE folders SET is_deleted = 1, deleted_at = ?, deleted_by = ? WHERE id = ?")
            .bind(now())
            .bind(self.actor.user_id.as_str())
            .bind(folder_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.audit.log_delete(&ItemId::Folder(*folder_id), &folder.name).await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_file(&self, file_id: &FileId) -> StoreResult<()> {
        let file = self.get_file(file_id, false).await?;
        self.require_edit(EditTarget::File(*file_id)).await?;

        sqlx::query("UPDATE files SET is_deleted = 1, deleted_at = ?, deleted_by = ? WHERE id = ?")
            .bind(now())
            .bind(self.actor.user_id.as_str())
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.audit.log_delete(&ItemId::File(*file_id), &file.name).await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn restore_folder(&self, folder_id: &FolderId) -> StoreResult<()> {
        let folder = self.get_folder(folder_id, true).await?;
        if !folder.is_deleted {
            return Err(StoreError::NotFound(format!("Folder {folder_id} is not in trash")));
        }
        self.require_edit(EditTarget::Folder(*folder_id)).await?;

        let name = folder.name.to_lowercase();
        let siblings = self.live_siblings(folder.parent_id.as_ref(), Some(folder_id)).await?;
        if let Some(clash) = siblings
            .iter()
            .find(|s| s.slug == folder.slug || s.name.to_lowercase() == name)
        {
            return Err(StoreError::NameConflict(format!(
                "A folder named '{}' already exists here; rename it before restoring",
                clash.name
            )));
        }

        sqlx::query("UPDATE folders SET is_deleted = 0, deleted_at = NULL, deleted_by = NULL WHERE id = ?")
            .bind(folder_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.audit.log_restore(&ItemId::Folder(*folder_id), &folder.name).await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn restore_file(&self, file_id: &FileId) -> StoreResult<()> {
        let file = self.get_file(file_id, true).await?;
        if !file.is_deleted {
            return Err(StoreError::NotFound(format!("File {file_id} is not in trash")));
        }
        self.require_edit(EditTarget::File(*file_id)).await?;
        self.ensure_file_name_free(&file.folder_id, &file.name, Some(file_id))
            .await?;

        sqlx::query("UPDATE files SET is_deleted = 0, deleted_at = NULL, deleted_by = NULL WHERE id = ?")
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.audit.log_restore(&ItemId::File(*file_id), &file.name).await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn hard_delete_folder(&self, folder_id: &FolderId) -> StoreResult<()> {
        let folder = self.get_folder(folder_id, true).await?;
        self.require_edit(EditTarget::Folder(*folder_id)).await?;

        let blobs_sql = format!(
            "{SUBTREE_CTE} SELECT storage_path FROM files \
             WHERE folder_id IN (SELECT id FROM subtree) AND storage_path IS NOT NULL"
        );
        let blob_rows = sqlx::query(&blobs_sql)
            .bind(folder_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let keys: Vec<String> = blob_rows
            .iter()
            .map(|r| r.try_get::<String, _>("storage_path").map_err(db_error))
            .collect::<StoreResult<_>>()?;

        // Files first, then the folders, in one transaction.
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let files = sqlx::query(&format!(
            "{SUBTREE_CTE} DELETE FROM files WHERE folder_id IN (SELECT id FROM subtree)"
        ))
        .bind(folder_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        let folders = sqlx::query(&format!(
            "{SUBTREE_CTE} DELETE FROM folders WHERE id IN (SELECT id FROM subtree)"
        ))
        .bind(folder_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        for key in &keys {
            self.discard_blob(key).await;
        }

        let erased = files.rows_affected() + folders.rows_affected();
        tracing::info!(%folder_id, erased, "Folder permanently deleted");
        self.audit
            .log_hard_delete(&ItemId::Folder(*folder_id), &folder.name, erased)
            .await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn hard_delete_file(&self, file_id: &FileId) -> StoreResult<()> {
        let file = self.get_file(file_id, true).await?;
        self.require_edit(EditTarget::File(*file_id)).await?;

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(key) = &file.storage_path {
            self.discard_blob(key).await;
        }

        self.audit
            .log_hard_delete(&ItemId::File(*file_id), &file.name, 1)
            .await;
        Ok(())
    }

    // --- Move / reorder ---

    #[tracing::instrument(skip(self))]
    async fn move_file_to_folder(&self, file_id: &FileId, new_folder_id: &FolderId) -> StoreResult<()> {
        let file = self.get_file(file_id, false).await?;
        self.get_folder(new_folder_id, false).await?;
        self.require_edit(EditTarget::File(*file_id)).await?;
        self.require_edit(EditTarget::Folder(*new_folder_id)).await?;
        if file.folder_id == *new_folder_id {
            return Ok(());
        }
        self.ensure_file_name_free(new_folder_id, &file.name, Some(file_id))
            .await?;

        sqlx::query("UPDATE files SET folder_id = ?, last_modified = ?, last_modified_by = ? WHERE id = ?")
            .bind(new_folder_id.to_string())
            .bind(now())
            .bind(self.actor.user_id.as_str())
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        self.audit
            .log_file_move(file_id, &file.name, &file.folder_id, new_folder_id)
            .await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn move_folder_to_parent(
        &self,
        folder_id: &FolderId,
        new_parent_id: Option<&FolderId>,
        order_index: i64,
    ) -> StoreResult<()> {
        let folder = self.get_folder(folder_id, false).await?;
        if let Some(target) = new_parent_id {
            self.get_folder(target, false).await?;
            // The server sees the whole tree, unlike the client's local check.
            if self.subtree_ids(folder_id).await?.contains(&target.to_string()) {
                return Err(StoreError::InvalidMove(format!(
                    "Cannot move folder '{}' into itself or its own descendant",
                    folder.name
                )));
            }
        }
        self.require_edit(EditTarget::from(folder.parent_id)).await?;
        self.require_edit(EditTarget::from(new_parent_id.copied())).await?;

        let taken: Vec<String> = self
            .live_siblings(new_parent_id, Some(folder_id))
            .await?
            .into_iter()
            .map(|f| f.slug)
            .collect();
        let slug = unique_slug(&folder.slug, &taken);

        sqlx::query(
            "UPDATE folders SET parent_id = ?, order_index = ?, slug = ?, last_modified = ?, \
             last_modified_by = ? WHERE id = ?",
        )
        .bind(new_parent_id.map(ToString::to_string))
        .bind(order_index)
        .bind(&slug)
        .bind(now())
        .bind(self.actor.user_id.as_str())
        .bind(folder_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.audit
            .log_folder_move(
                folder_id,
                &folder.name,
                folder.parent_id.as_ref(),
                new_parent_id,
                order_index,
            )
            .await;
        Ok(())
    }

    #[tracing::instrument(skip(self, order), fields(count = order.len()))]
    async fn update_folder_order(&self, order: &[FolderOrder]) -> StoreResult<()> {
        if order.is_empty() {
            return Ok(());
        }
        for entry in order {
            let folder = self.get_folder(&entry.id, false).await?;
            self.require_edit(EditTarget::from(folder.parent_id)).await?;
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for entry in order {
            sqlx::query("UPDATE folders SET order_index = ? WHERE id = ?")
                .bind(entry.order_index)
                .bind(entry.id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;

        let ids: Vec<FolderId> = order.iter().map(|o| o.id).collect();
        self.audit.log_folder_reorder(&ids).await;
        Ok(())
    }

    // --- Capabilities and retrieval ---

    async fn can_edit(&self, target: EditTarget) -> StoreResult<bool> {
        if self.actor.is_admin {
            return Ok(true);
        }
        match target {
            EditTarget::Root => Ok(false),
            EditTarget::Folder(id) => self.has_grant("folder", &id.to_string()).await,
            EditTarget::File(id) => {
                if self.has_grant("file", &id.to_string()).await? {
                    return Ok(true);
                }
                match self.get_file(&id, true).await {
                    Ok(file) => self.has_grant("folder", &file.folder_id.to_string()).await,
                    Err(StoreError::NotFound(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn signed_url(&self, file_id: &FileId, ttl: Duration) -> StoreResult<String> {
        let file = self.get_file(file_id, false).await?;
        match (file.item_type, file.url, file.storage_path) {
            (ItemType::Link, Some(url), _) => Ok(url),
            (ItemType::File, _, Some(key)) => self.blobs.signed_url(&key, ttl).await,
            _ => Err(StoreError::NotFound(format!("File {file_id} has no retrievable content"))),
        }
    }
}
