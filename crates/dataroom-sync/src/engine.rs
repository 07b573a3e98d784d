//! Tree synchronization engine
//!
//! The [`TreeSyncEngine`] owns the client-side mirror of the data-room tree
//! and is the only component that mutates it. Every operation follows the
//! same shape:
//!
//! 1. Optionally patch the local forest (moves and reorders only)
//! 2. Call the remote store through the retry policy
//! 3. On success, refetch what the mutation may have changed: the whole
//!    tree for folder changes, only the parent folder for file changes
//! 4. On failure, record the error; an optimistic patch is reverted by
//!    refetching before the error is returned
//!
//! ## Loaded vs. unloaded folders
//!
//! A folder's children are authoritative only once the folder is in the
//! loaded set. A full [`refresh`](TreeSyncEngine::refresh) is a hard reset:
//! it replaces the root list and forgets every loaded subtree.
//!
//! ## Concurrency
//!
//! State lives behind an async `RwLock` that is never held across a store
//! call, so independent operations interleave and the last write wins.
//! Overlapping refreshes are coalesced, duplicate folder loads are
//! dropped, and at most one upload batch runs at a time.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dataroom_core::config::Config;
use dataroom_core::domain::{
    DataRoomFile, FileId, FlatEntry, Folder, FolderContents, FolderId, Forest, ItemId, TreeNode, TreePath, UserId,
};
use dataroom_core::ports::{FolderOrder, IRemoteStore, StoreResult};

use crate::legality::check_folder_move;
use crate::retry::{with_retry, with_timeout, RetryPolicy};
use crate::upload::{BatchAborted, UploadCoordinator, UploadItem, UploadProgress, UploadSettings};
use crate::SyncError;

/// Whether the client is in the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Timeouts, retry policy and upload tuning for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Deadline for fetching the root folder list
    pub refresh_timeout: Duration,
    /// Deadline for fetching one folder's children
    pub subtree_timeout: Duration,
    /// Minimum hidden time before becoming visible triggers a refresh
    pub idle_refresh: Duration,
    pub retry: RetryPolicy,
    pub upload: UploadSettings,
    pub signed_url_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            refresh_timeout: Duration::from_secs(config.sync.refresh_timeout_secs),
            subtree_timeout: Duration::from_secs(config.sync.subtree_timeout_secs),
            idle_refresh: Duration::from_secs(config.sync.idle_refresh_secs),
            retry: RetryPolicy::from(&config.retry),
            upload: UploadSettings::from(&config.upload),
            signed_url_ttl: Duration::from_secs(config.storage.signed_url_ttl_secs),
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    forest: Forest,
    /// Folders whose children are authoritative
    loaded: HashSet<FolderId>,
    error: Option<SyncError>,
}

/// Client-side mirror of the data-room tree and the operations mutating it
pub struct TreeSyncEngine {
    store: Arc<dyn IRemoteStore>,
    uploader: UploadCoordinator,
    settings: EngineSettings,
    /// Stamped on optimistic updates
    user: Option<UserId>,
    state: RwLock<EngineState>,
    /// Set while a root fetch runs; this is the loading flag
    refreshing: AtomicBool,
    /// Folders with a children fetch in flight
    in_flight: DashSet<FolderId>,
    /// Cancellation handle of the active upload batch
    active_upload: Mutex<Option<CancellationToken>>,
    progress: watch::Sender<Option<UploadProgress>>,
    hidden_since: Mutex<Option<Instant>>,
}

/// Clears the refresh (and so loading) flag when dropped, even if the
/// refresh future is abandoned
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct InFlightGuard<'a> {
    set: &'a DashSet<FolderId>,
    id: FolderId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// Holds the single upload slot; releasing it clears the published progress
struct UploadSlot<'a> {
    engine: &'a TreeSyncEngine,
    token: CancellationToken,
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        *lock(&self.engine.active_upload) = None;
        self.engine.progress.send_replace(None);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TreeSyncEngine {
    /// Creates an engine acting as the configured identity.
    ///
    /// The forest starts empty; call [`refresh`](Self::refresh) to load it.
    pub fn new(store: Arc<dyn IRemoteStore>, config: &Config) -> Self {
        let user = UserId::new(config.identity.user_id.clone()).ok();
        Self::with_settings(store, EngineSettings::from(config), user)
    }

    pub fn with_settings(store: Arc<dyn IRemoteStore>, settings: EngineSettings, user: Option<UserId>) -> Self {
        let uploader = UploadCoordinator::new(Arc::clone(&store), settings.retry, settings.upload);
        let (progress, _) = watch::channel(None);
        Self {
            store,
            uploader,
            settings,
            user,
            state: RwLock::new(EngineState::default()),
            refreshing: AtomicBool::new(false),
            in_flight: DashSet::new(),
            active_upload: Mutex::new(None),
            progress,
            hidden_since: Mutex::new(None),
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// The current forest. Cheap: subtrees are shared, not copied.
    pub async fn forest(&self) -> Forest {
        self.state.read().await.forest.clone()
    }

    pub async fn children_at(&self, path: &TreePath) -> Vec<TreeNode> {
        self.state.read().await.forest.children_at(path)
    }

    pub async fn is_loaded(&self, folder_id: &FolderId) -> bool {
        self.state.read().await.loaded.contains(folder_id)
    }

    pub async fn is_loading(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// The error left by the last failed operation, cleared by a successful refresh
    pub async fn last_error(&self) -> Option<SyncError> {
        self.state.read().await.error.clone()
    }

    /// Progress of the active upload batch, if any
    pub fn upload_progress(&self) -> Option<UploadProgress> {
        self.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<UploadProgress>> {
        self.progress.subscribe()
    }

    pub fn is_uploading(&self) -> bool {
        lock(&self.active_upload).is_some()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Refetches the root folders and resets every loaded subtree.
    ///
    /// A call made while another refresh is in flight returns at once.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), SyncError> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Refresh already in flight; coalescing");
            return Ok(());
        }
        let _guard = RefreshGuard(&self.refreshing);

        let result = with_timeout(
            "fetch_root_folders",
            self.settings.refresh_timeout,
            with_retry("fetch_root_folders", &self.settings.retry, || {
                self.store.fetch_root_folders()
            }),
        )
        .await;

        let mut state = self.state.write().await;
        match result {
            Ok(roots) => {
                info!(roots = roots.len(), "Tree refreshed");
                state.forest = Forest::new(roots);
                state.loaded.clear();
                state.error = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed");
                let err = SyncError::from(e);
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Fetches one level of children for a folder and marks it loaded.
    ///
    /// No-op if the folder is already loaded or a load for it is in flight.
    #[tracing::instrument(skip(self))]
    pub async fn load_folder_children(&self, folder_id: &FolderId) -> Result<(), SyncError> {
        if self.is_loaded(folder_id).await {
            return Ok(());
        }
        if !self.in_flight.insert(*folder_id) {
            debug!(%folder_id, "Load already in flight");
            return Ok(());
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            id: *folder_id,
        };
        self.reload_folder(folder_id).await
    }

    /// Fetches one level under `folder_id` and patches it into the forest.
    ///
    /// Subfolders that were already loaded keep their children.
    async fn reload_folder(&self, folder_id: &FolderId) -> Result<(), SyncError> {
        let fetched = with_timeout(
            "fetch_folder_children",
            self.settings.subtree_timeout,
            with_retry("fetch_folder_children", &self.settings.retry, || {
                self.store.fetch_folder_children(folder_id)
            }),
        )
        .await;
        let contents = match fetched {
            Ok(contents) => contents,
            Err(e) => return self.record(Err(e.into())).await,
        };

        let mut state = self.state.write().await;
        let folder_count = contents.folders.len() as u64;
        let file_count = contents.files.len() as u64;
        let children = keep_loaded_subtrees(contents.into_children(), &state.forest, &state.loaded);
        let patched = state.forest.update_folder(folder_id, |folder| {
            let mut updated = folder.with_children(children);
            updated.subfolder_count = folder_count;
            updated.item_count = file_count;
            updated
        });
        match patched {
            Some(forest) => {
                state.forest = forest;
                state.loaded.insert(*folder_id);
                debug!(%folder_id, folders = folder_count, files = file_count, "Folder loaded");
            }
            None => debug!(%folder_id, "Folder left the tree while loading; dropping result"),
        }
        Ok(())
    }

    // ========================================================================
    // Structural mutations
    // ========================================================================

    /// Creates a folder at `path`, then refreshes.
    ///
    /// Names are not checked for collisions; only the slug is disambiguated
    /// against the loaded siblings.
    #[tracing::instrument(skip(self))]
    pub async fn add_folder(&self, path: &TreePath, name: &str) -> Result<Folder, SyncError> {
        let (parent, slugs) = {
            let state = self.state.read().await;
            (folder_at(&state.forest, path)?, sibling_slugs(&state.forest, path, None))
        };
        let folder = self
            .call("create_folder", || self.store.create_folder(parent.as_ref(), name, &slugs))
            .await?;
        info!(folder_id = %folder.id, slug = %folder.slug, "Folder created");
        self.refresh().await?;
        Ok(folder)
    }

    /// Adds a link item at `path`, then reloads that folder
    #[tracing::instrument(skip(self))]
    pub async fn add_link(&self, path: &TreePath, name: &str, url: &str) -> Result<DataRoomFile, SyncError> {
        let folder_id = self.file_parent(path).await?;
        let link = self
            .call("create_link", || self.store.create_link(&folder_id, name, url))
            .await?;
        self.reload_folder(&folder_id).await?;
        Ok(link)
    }

    /// Renames a child of `path`.
    ///
    /// Folder renames refresh the whole tree; file renames reload only the
    /// parent folder.
    #[tracing::instrument(skip(self))]
    pub async fn rename_item(&self, path: &TreePath, item: &ItemId, new_name: &str) -> Result<(), SyncError> {
        match self.child_at(path, item).await? {
            TreeNode::Folder(folder) => {
                let slugs = sibling_slugs(&self.state.read().await.forest, path, Some(&folder.id));
                self.call("rename_folder", || {
                    self.store.rename_folder(&folder.id, new_name, &slugs)
                })
                .await?;
                self.refresh().await
            }
            TreeNode::File(file) => {
                self.call("rename_file", || self.store.rename_file(&file.id, new_name))
                    .await?;
                self.reload_folder(&file.folder_id).await
            }
        }
    }

    /// Moves a child of `path` to the trash
    #[tracing::instrument(skip(self))]
    pub async fn delete_item(&self, path: &TreePath, item: &ItemId) -> Result<(), SyncError> {
        match self.child_at(path, item).await? {
            TreeNode::Folder(folder) => {
                self.call("delete_folder", || self.store.delete_folder(&folder.id))
                    .await?;
                self.refresh().await
            }
            TreeNode::File(file) => {
                self.call("delete_file", || self.store.delete_file(&file.id)).await?;
                self.reload_folder(&file.folder_id).await
            }
        }
    }

    /// Moves a child of `source` under `target`, optimistically.
    ///
    /// The local forest shows the move before the store confirms it. On
    /// success the tree is refreshed; on failure the refresh reverts the
    /// local move and the error is returned. Files cannot move to the root.
    #[tracing::instrument(skip(self))]
    pub async fn move_item(&self, source: &TreePath, item: &ItemId, target: &TreePath) -> Result<(), SyncError> {
        let (node, target_id, order_index) = {
            let state = self.state.read().await;
            let node = state
                .forest
                .find_child_at(source, item)
                .ok_or_else(|| SyncError::ItemNotFound {
                    path: source.clone(),
                    item: *item,
                })?;
            let target_id = folder_at(&state.forest, target)?;
            match (&node, target_id) {
                (TreeNode::File(_), None) => return Err(SyncError::FileAtRoot),
                (TreeNode::Folder(folder), target_id) => {
                    check_folder_move(&state.forest, &folder.id, target_id.as_ref())?;
                }
                (TreeNode::File(_), Some(_)) => {}
            }
            (node, target_id, next_order_index(&state, target_id.as_ref()))
        };

        let moved = restamp(&node, target_id, order_index, self.user.clone());
        let patch = move |state: &EngineState| {
            let (forest, _) = state.forest.remove_node(item)?;
            // An unloaded target shows the item once it is loaded.
            let target_loaded = target_id.map_or(true, |id| state.loaded.contains(&id));
            if target_loaded {
                if let Some(with_moved) = forest.append_child(target_id.as_ref(), moved) {
                    return Some(with_moved);
                }
            }
            Some(forest)
        };

        match (&node, target_id) {
            (TreeNode::Folder(folder), _) => {
                self.optimistic(
                    "move_folder",
                    patch,
                    with_retry("move_folder_to_parent", &self.settings.retry, || {
                        self.store
                            .move_folder_to_parent(&folder.id, target_id.as_ref(), order_index)
                    }),
                )
                .await?;
            }
            (TreeNode::File(file), Some(dest)) => {
                self.optimistic(
                    "move_file",
                    patch,
                    with_retry("move_file_to_folder", &self.settings.retry, || {
                        self.store.move_file_to_folder(&file.id, &dest)
                    }),
                )
                .await?;
            }
            (TreeNode::File(_), None) => return Err(SyncError::FileAtRoot),
        }
        self.refresh().await
    }

    /// Sets the transient sharing label of a child of `path`. Local only.
    pub async fn set_sharing(&self, path: &TreePath, item: &ItemId, label: Option<String>) -> Result<(), SyncError> {
        let mut state = self.state.write().await;
        let not_found = || SyncError::ItemNotFound {
            path: path.clone(),
            item: *item,
        };
        if state.forest.find_child_at(path, item).is_none() {
            return Err(not_found());
        }
        let forest = state
            .forest
            .update_node(item, &mut |node: &TreeNode| match node {
                TreeNode::Folder(f) => {
                    let mut updated = (**f).clone();
                    updated.sharing_label = label.clone();
                    TreeNode::from(updated)
                }
                TreeNode::File(f) => {
                    let mut updated = (**f).clone();
                    updated.sharing_label = label.clone();
                    TreeNode::from(updated)
                }
            })
            .ok_or_else(not_found)?;
        state.forest = forest;
        Ok(())
    }

    /// Reorders the folders at `path` optimistically and persists the order.
    ///
    /// The store does not report the resulting order, so success does not
    /// refresh; failure reverts by refreshing.
    #[tracing::instrument(skip(self, ordered), fields(count = ordered.len()))]
    pub async fn reorder_folders(&self, path: &TreePath, ordered: &[FolderId]) -> Result<(), SyncError> {
        folder_at(&self.state.read().await.forest, path)?;
        if ordered.is_empty() {
            return Ok(());
        }
        let order: Vec<FolderOrder> = ordered
            .iter()
            .enumerate()
            .map(|(i, id)| FolderOrder {
                id: *id,
                order_index: i as i64,
            })
            .collect();

        self.optimistic(
            "reorder_folders",
            |state: &EngineState| state.forest.reorder_folders_at(path, ordered),
            with_retry("update_folder_order", &self.settings.retry, || {
                self.store.update_folder_order(&order)
            }),
        )
        .await
    }

    /// Moves a folder under `target` (the root level when `None`).
    ///
    /// Self-moves and moves into a loaded descendant are rejected before
    /// any store call, leaving the forest untouched.
    #[tracing::instrument(skip(self))]
    pub async fn move_folder_to_folder(&self, folder_id: &FolderId, target: Option<&FolderId>) -> Result<(), SyncError> {
        let order_index = {
            let state = self.state.read().await;
            check_folder_move(&state.forest, folder_id, target)?;
            next_order_index(&state, target)
        };

        self.call("move_folder_to_parent", || {
            self.store.move_folder_to_parent(folder_id, target, order_index)
        })
        .await?;
        self.refresh().await
    }

    // ========================================================================
    // Trash
    // ========================================================================

    pub async fn list_trash(&self) -> Result<FolderContents, SyncError> {
        let result = with_timeout(
            "list_trash",
            self.settings.refresh_timeout,
            with_retry("list_trash", &self.settings.retry, || self.store.list_trash()),
        )
        .await;
        self.record(result.map_err(SyncError::from)).await
    }

    /// Restores a trashed item, then refreshes.
    ///
    /// Fails with a `NameConflict` store error when a live sibling now holds
    /// the name; the caller must rename that sibling first.
    #[tracing::instrument(skip(self))]
    pub async fn restore_item(&self, item: &ItemId) -> Result<(), SyncError> {
        match item {
            ItemId::Folder(id) => self.call("restore_folder", || self.store.restore_folder(id)).await?,
            ItemId::File(id) => self.call("restore_file", || self.store.restore_file(id)).await?,
        }
        self.refresh().await
    }

    /// Permanently erases an item, then refreshes
    #[tracing::instrument(skip(self))]
    pub async fn hard_delete_item(&self, item: &ItemId) -> Result<(), SyncError> {
        match item {
            ItemId::Folder(id) => {
                self.call("hard_delete_folder", || self.store.hard_delete_folder(id))
                    .await?
            }
            ItemId::File(id) => {
                self.call("hard_delete_file", || self.store.hard_delete_file(id))
                    .await?
            }
        }
        self.refresh().await
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Uploads a batch into the folder at `path`.
    ///
    /// The folder is loaded first so existing names are known. After a
    /// complete batch the new files are shown at once and the tree is
    /// refreshed; if that refresh fails the result is `StaleAfterUpload`.
    /// A cancelled or failed batch keeps (and shows) the files stored
    /// before it stopped, without refreshing.
    #[tracing::instrument(skip(self, items), fields(files = items.len()))]
    pub async fn upload_files(&self, path: &TreePath, items: Vec<UploadItem>) -> Result<Vec<DataRoomFile>, SyncError> {
        let folder_id = self.file_parent(path).await?;
        let slot = self.claim_upload()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        if !self.is_loaded(&folder_id).await {
            self.reload_folder(&folder_id).await?;
        }
        let existing: Vec<String> = {
            let state = self.state.read().await;
            state
                .forest
                .find_folder(&folder_id)
                .map(|f| f.files().map(|file| file.name.clone()).collect())
                .unwrap_or_default()
        };

        let outcome = self
            .uploader
            .run(
                &folder_id,
                existing.iter().map(String::as_str),
                items,
                &slot.token,
                &self.progress,
            )
            .await;
        drop(slot);

        match outcome {
            Ok(uploaded) => {
                self.show_files(&folder_id, &uploaded).await;
                match self.refresh().await {
                    Ok(()) => Ok(uploaded),
                    Err(SyncError::Store(cause)) => Err(SyncError::StaleAfterUpload {
                        uploaded: uploaded.len(),
                        cause,
                    }),
                    Err(other) => Err(other),
                }
            }
            Err(BatchAborted { uploaded, error }) => {
                self.show_files(&folder_id, &uploaded).await;
                self.record(Err(error)).await
            }
        }
    }

    /// Signals the active upload batch to stop before its next file or retry.
    ///
    /// Returns false if no batch is active.
    pub fn cancel_upload(&self) -> bool {
        match lock(&self.active_upload).as_ref() {
            Some(token) => {
                token.cancel();
                info!("Upload cancellation requested");
                true
            }
            None => false,
        }
    }

    fn claim_upload(&self) -> Result<UploadSlot<'_>, SyncError> {
        let mut active = lock(&self.active_upload);
        if active.is_some() {
            return Err(SyncError::UploadInProgress);
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Ok(UploadSlot { engine: self, token })
    }

    /// Appends uploaded files to a loaded folder without a refetch
    async fn show_files(&self, folder_id: &FolderId, files: &[DataRoomFile]) {
        if files.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        if !state.loaded.contains(folder_id) {
            return;
        }
        for file in files {
            if let Some(forest) = state.forest.append_child(Some(folder_id), TreeNode::from(file.clone())) {
                state.forest = forest;
            }
        }
        if let Some(forest) = state.forest.update_folder(folder_id, |folder| {
            let mut updated = folder.clone();
            updated.item_count = updated.files().count() as u64;
            updated
        }) {
            state.forest = forest;
        }
    }

    // ========================================================================
    // Visibility
    // ========================================================================

    /// Applies the idle-refresh policy.
    ///
    /// Hiding cancels any active upload. Becoming visible after at least
    /// the idle threshold refreshes the tree; returns whether it did.
    pub async fn set_visibility(&self, visibility: Visibility) -> Result<bool, SyncError> {
        match visibility {
            Visibility::Hidden => {
                lock(&self.hidden_since).get_or_insert_with(Instant::now);
                if self.cancel_upload() {
                    info!("Client hidden; active upload cancelled");
                }
                Ok(false)
            }
            Visibility::Visible => {
                let hidden_for = lock(&self.hidden_since).take().map(|since| since.elapsed());
                match hidden_for {
                    Some(idle) if idle >= self.settings.idle_refresh => {
                        info!(idle_secs = idle.as_secs(), "Visible again after idle period; refreshing");
                        self.refresh().await.map(|()| true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    // ========================================================================
    // Lookup and retrieval
    // ========================================================================

    /// Case-insensitive substring search over the names in the loaded tree
    pub async fn search(&self, query: &str) -> Vec<FlatEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.forest()
            .await
            .flatten()
            .into_iter()
            .filter(|entry| entry.node.name().to_lowercase().contains(&needle))
            .collect()
    }

    /// Retrieval URL for a file or link; failures are logged and yield `None`
    pub async fn download_url(&self, file_id: &FileId) -> Option<String> {
        match self.store.signed_url(file_id, self.settings.signed_url_ttl).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(%file_id, error = %e, "Failed to resolve download URL");
                None
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Records a failure as the engine's last error; cancellations are not failures
    async fn record<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(e) = &result {
            if !e.is_cancelled() {
                self.state.write().await.error = Some(e.clone());
            }
        }
        result
    }

    /// Runs a store mutation through the retry policy
    async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let result = with_retry(operation, &self.settings.retry, f).await;
        if let Err(e) = &result {
            warn!(operation, error = %e, "Store call failed");
        }
        self.record(result.map_err(SyncError::from)).await
    }

    /// Applies `patch` to the local state, then awaits `remote`.
    ///
    /// If `remote` fails the tree is refreshed to drop the patch before the
    /// error is returned.
    async fn optimistic<T, Fut>(
        &self,
        operation: &str,
        patch: impl FnOnce(&EngineState) -> Option<Forest>,
        remote: Fut,
    ) -> Result<T, SyncError>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        {
            let mut state = self.state.write().await;
            if let Some(forest) = patch(&*state) {
                state.forest = forest;
            }
        }

        match remote.await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(operation, error = %e, "Store rejected optimistic update; reverting");
                if let Err(refresh_err) = self.refresh().await {
                    warn!(operation, error = %refresh_err, "Revert refresh failed");
                }
                self.record(Err(SyncError::from(e))).await
            }
        }
    }

    async fn child_at(&self, path: &TreePath, item: &ItemId) -> Result<TreeNode, SyncError> {
        self.state
            .read()
            .await
            .forest
            .find_child_at(path, item)
            .ok_or_else(|| SyncError::ItemNotFound {
                path: path.clone(),
                item: *item,
            })
    }

    /// The folder that files added at `path` go into
    async fn file_parent(&self, path: &TreePath) -> Result<FolderId, SyncError> {
        folder_at(&self.state.read().await.forest, path)?.ok_or(SyncError::FileAtRoot)
    }
}

/// Resolves `path` to a folder id; the root level is `None`
fn folder_at(forest: &Forest, path: &TreePath) -> Result<Option<FolderId>, SyncError> {
    if path.is_root() {
        return Ok(None);
    }
    forest
        .resolve_path(path)
        .map(|folder| Some(folder.id))
        .ok_or_else(|| SyncError::PathNotFound(path.clone()))
}

/// Slugs of the loaded folders at `path`, minus `exclude`
/// Order index for a folder appended under `target`: the current number of
/// folders there. Unloaded folders report the count the store sent with them.
fn next_order_index(state: &EngineState, target: Option<&FolderId>) -> i64 {
    let count = match target {
        None => state.forest.roots().len(),
        Some(id) => match state.forest.find_folder(id) {
            Some(folder) if state.loaded.contains(id) => folder.subfolders().count(),
            Some(folder) => folder.subfolder_count as usize,
            None => 0,
        },
    };
    count as i64
}

fn sibling_slugs(forest: &Forest, path: &TreePath, exclude: Option<&FolderId>) -> Vec<String> {
    forest
        .children_at(path)
        .iter()
        .filter_map(TreeNode::as_folder)
        .filter(|f| Some(&f.id) != exclude)
        .map(|f| f.slug.clone())
        .collect()
}

/// Copies the children of already-loaded folders onto their refetched records
fn keep_loaded_subtrees(children: Vec<TreeNode>, forest: &Forest, loaded: &HashSet<FolderId>) -> Vec<TreeNode> {
    children
        .into_iter()
        .map(|node| {
            if let TreeNode::Folder(fresh) = &node {
                if loaded.contains(&fresh.id) {
                    if let Some(existing) = forest.find_folder(&fresh.id) {
                        return TreeNode::from(fresh.with_children(existing.children.clone()));
                    }
                }
            }
            node
        })
        .collect()
}

/// The moved node as it should appear under its new parent
fn restamp(node: &TreeNode, target: Option<FolderId>, order_index: i64, user: Option<UserId>) -> TreeNode {
    let now = Utc::now();
    match node {
        TreeNode::Folder(folder) => {
            let mut moved = (**folder).clone();
            moved.parent_id = target;
            moved.order_index = order_index;
            moved.last_modified = now;
            moved.last_modified_by = user;
            TreeNode::from(moved)
        }
        TreeNode::File(file) => {
            let mut moved = (**file).clone();
            if let Some(target) = target {
                moved.folder_id = target;
            }
            moved.last_modified = now;
            moved.last_modified_by = user;
            TreeNode::from(moved)
        }
    }
}
