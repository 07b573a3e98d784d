//! Integration tests for the tree synchronization engine
//!
//! The engine runs against an in-memory store that records every call and
//! can inject delays and failures per operation. Time-dependent tests run
//! on a paused clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use dataroom_core::domain::naming::{slug_from_name, unique_slug};
use dataroom_core::domain::{
    DataRoomFile, FileId, Folder, FolderContents, FolderId, ItemId, ItemType, StoreError, TreePath,
};
use dataroom_core::ports::{EditTarget, FolderOrder, IRemoteStore, StoreResult};
use dataroom_sync::retry::RetryPolicy;
use dataroom_sync::{EngineSettings, MoveViolation, SyncError, TreeSyncEngine, UploadItem, Visibility};

// ============================================================================
// In-memory store
// ============================================================================

type UploadHook = Box<dyn FnMut(usize) + Send>;

#[derive(Default)]
struct MockStore {
    folders: Mutex<Vec<Folder>>,
    files: Mutex<Vec<DataRoomFile>>,
    calls: Mutex<Vec<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    failures: Mutex<HashMap<&'static str, StoreError>>,
    /// Upload of this name fails with a name conflict
    reject_upload: Mutex<Option<String>>,
    uploads: Mutex<usize>,
    /// Called with the running upload count after each stored file
    on_upload: Mutex<Option<UploadHook>>,
}

impl MockStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn folder(&self, name: &str, parent: Option<FolderId>) -> FolderId {
        let mut folders = self.folders.lock().unwrap();
        let order = folders.iter().filter(|f| f.parent_id == parent).count() as i64;
        let mut folder = Folder::new(FolderId::new(), parent, name, slug_from_name(name));
        folder.order_index = order;
        let id = folder.id;
        folders.push(folder);
        id
    }

    fn file(&self, folder_id: FolderId, name: &str) -> FileId {
        let file = new_file(folder_id, name, 3);
        let id = file.id;
        self.files.lock().unwrap().push(file);
        id
    }

    fn delay(&self, op: &'static str, by: Duration) {
        self.delays.lock().unwrap().insert(op, by);
    }

    fn fail(&self, op: &'static str, err: StoreError) {
        self.failures.lock().unwrap().insert(op, err);
    }

    fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    /// Parent and order index as stored
    fn placement(&self, id: FolderId) -> (Option<FolderId>, i64) {
        let folders = self.folders.lock().unwrap();
        let folder = folders.iter().find(|f| f.id == id).unwrap();
        (folder.parent_id, folder.order_index)
    }

    fn file_names_in(&self, folder_id: FolderId) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.folder_id == folder_id && !f.is_deleted)
            .map(|f| f.name.clone())
            .collect()
    }

    async fn enter(&self, op: &'static str) -> StoreResult<()> {
        self.calls.lock().unwrap().push(op);
        let delay = self.delays.lock().unwrap().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().unwrap().get(op).cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn folders_under(&self, parent: Option<FolderId>) -> Vec<Folder> {
        let folders = self.folders.lock().unwrap();
        let files = self.files.lock().unwrap();
        folders
            .iter()
            .filter(|f| f.parent_id == parent && !f.is_deleted)
            .map(|f| {
                let mut f = f.clone();
                f.subfolder_count = folders
                    .iter()
                    .filter(|c| c.parent_id == Some(f.id) && !c.is_deleted)
                    .count() as u64;
                f.item_count = files
                    .iter()
                    .filter(|c| c.folder_id == f.id && !c.is_deleted)
                    .count() as u64;
                f
            })
            .collect()
    }

    fn edit_folder(&self, id: &FolderId, edit: impl FnOnce(&mut Folder)) -> StoreResult<()> {
        let mut folders = self.folders.lock().unwrap();
        let folder = folders
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("folder {id}")))?;
        edit(folder);
        Ok(())
    }

    fn edit_file(&self, id: &FileId, edit: impl FnOnce(&mut DataRoomFile)) -> StoreResult<()> {
        let mut files = self.files.lock().unwrap();
        let file = files
            .iter_mut()
            .find(|f| &f.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("file {id}")))?;
        edit(file);
        Ok(())
    }
}

fn new_file(folder_id: FolderId, name: &str, size: u64) -> DataRoomFile {
    DataRoomFile {
        id: FileId::new(),
        folder_id,
        item_type: ItemType::File,
        name: name.to_string(),
        size_bytes: Some(size),
        storage_path: Some(format!("{folder_id}/{name}")),
        url: None,
        mime_type: None,
        content_hash: None,
        last_modified: Utc::now(),
        last_modified_by: None,
        is_deleted: false,
        deleted_at: None,
        deleted_by: None,
        sharing_label: None,
    }
}

#[async_trait]
impl IRemoteStore for MockStore {
    async fn fetch_root_folders(&self) -> StoreResult<Vec<Folder>> {
        self.enter("fetch_root_folders").await?;
        Ok(self.folders_under(None))
    }

    async fn fetch_folder_children(&self, folder_id: &FolderId) -> StoreResult<FolderContents> {
        self.enter("fetch_folder_children").await?;
        let folders = self.folders_under(Some(*folder_id));
        let files = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| &f.folder_id == folder_id && !f.is_deleted)
            .cloned()
            .collect();
        Ok(FolderContents { folders, files })
    }

    async fn list_trash(&self) -> StoreResult<FolderContents> {
        self.enter("list_trash").await?;
        let folders = self.folders.lock().unwrap().iter().filter(|f| f.is_deleted).cloned().collect();
        let files = self.files.lock().unwrap().iter().filter(|f| f.is_deleted).cloned().collect();
        Ok(FolderContents { folders, files })
    }

    async fn create_folder(
        &self,
        parent_id: Option<&FolderId>,
        name: &str,
        sibling_slugs: &[String],
    ) -> StoreResult<Folder> {
        self.enter("create_folder").await?;
        let slug = unique_slug(&slug_from_name(name), sibling_slugs);
        let mut folder = Folder::new(FolderId::new(), parent_id.copied(), name, slug);
        folder.order_index = self.folders_under(parent_id.copied()).len() as i64;
        self.folders.lock().unwrap().push(folder.clone());
        Ok(folder)
    }

    async fn upload_file(
        &self,
        folder_id: &FolderId,
        name: &str,
        mime_type: Option<&str>,
        data: &[u8],
    ) -> StoreResult<DataRoomFile> {
        self.enter("upload_file").await?;
        if self.reject_upload.lock().unwrap().as_deref() == Some(name) {
            return Err(StoreError::NameConflict(name.to_string()));
        }
        let mut file = new_file(*folder_id, name, data.len() as u64);
        file.mime_type = mime_type.map(str::to_string);
        self.files.lock().unwrap().push(file.clone());

        let n = {
            let mut uploads = self.uploads.lock().unwrap();
            *uploads += 1;
            *uploads
        };
        if let Some(hook) = self.on_upload.lock().unwrap().as_mut() {
            hook(n);
        }
        Ok(file)
    }

    async fn create_link(&self, folder_id: &FolderId, name: &str, url: &str) -> StoreResult<DataRoomFile> {
        self.enter("create_link").await?;
        let mut link = new_file(*folder_id, name, 0);
        link.item_type = ItemType::Link;
        link.size_bytes = None;
        link.storage_path = None;
        link.url = Some(url.to_string());
        self.files.lock().unwrap().push(link.clone());
        Ok(link)
    }

    async fn rename_folder(&self, folder_id: &FolderId, new_name: &str, sibling_slugs: &[String]) -> StoreResult<()> {
        self.enter("rename_folder").await?;
        let slug = unique_slug(&slug_from_name(new_name), sibling_slugs);
        self.edit_folder(folder_id, |f| {
            f.name = new_name.to_string();
            f.slug = slug;
        })
    }

    async fn rename_file(&self, file_id: &FileId, new_name: &str) -> StoreResult<()> {
        self.enter("rename_file").await?;
        self.edit_file(file_id, |f| f.name = new_name.to_string())
    }

    async fn delete_folder(&self, folder_id: &FolderId) -> StoreResult<()> {
        self.enter("delete_folder").await?;
        self.edit_folder(folder_id, |f| f.is_deleted = true)
    }

    async fn delete_file(&self, file_id: &FileId) -> StoreResult<()> {
        self.enter("delete_file").await?;
        self.edit_file(file_id, |f| f.is_deleted = true)
    }

    async fn restore_folder(&self, folder_id: &FolderId) -> StoreResult<()> {
        self.enter("restore_folder").await?;
        self.edit_folder(folder_id, |f| f.is_deleted = false)
    }

    async fn restore_file(&self, file_id: &FileId) -> StoreResult<()> {
        self.enter("restore_file").await?;
        self.edit_file(file_id, |f| f.is_deleted = false)
    }

    async fn hard_delete_folder(&self, folder_id: &FolderId) -> StoreResult<()> {
        self.enter("hard_delete_folder").await?;
        self.folders.lock().unwrap().retain(|f| &f.id != folder_id);
        Ok(())
    }

    async fn hard_delete_file(&self, file_id: &FileId) -> StoreResult<()> {
        self.enter("hard_delete_file").await?;
        self.files.lock().unwrap().retain(|f| &f.id != file_id);
        Ok(())
    }

    async fn move_file_to_folder(&self, file_id: &FileId, new_folder_id: &FolderId) -> StoreResult<()> {
        self.enter("move_file_to_folder").await?;
        self.edit_file(file_id, |f| f.folder_id = *new_folder_id)
    }

    async fn move_folder_to_parent(
        &self,
        folder_id: &FolderId,
        new_parent_id: Option<&FolderId>,
        order_index: i64,
    ) -> StoreResult<()> {
        self.enter("move_folder_to_parent").await?;
        self.edit_folder(folder_id, |f| {
            f.parent_id = new_parent_id.copied();
            f.order_index = order_index;
        })
    }

    async fn update_folder_order(&self, order: &[FolderOrder]) -> StoreResult<()> {
        self.enter("update_folder_order").await?;
        for entry in order {
            self.edit_folder(&entry.id, |f| f.order_index = entry.order_index)?;
        }
        Ok(())
    }

    async fn can_edit(&self, _target: EditTarget) -> StoreResult<bool> {
        self.enter("can_edit").await?;
        Ok(true)
    }

    async fn signed_url(&self, file_id: &FileId, _ttl: Duration) -> StoreResult<String> {
        self.enter("signed_url").await?;
        Ok(format!("https://files.test/{file_id}"))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn settings() -> EngineSettings {
    EngineSettings {
        retry: RetryPolicy::none(),
        ..EngineSettings::default()
    }
}

fn engine_with(store: &Arc<MockStore>, settings: EngineSettings) -> Arc<TreeSyncEngine> {
    let store: Arc<dyn IRemoteStore> = Arc::clone(store) as Arc<dyn IRemoteStore>;
    Arc::new(TreeSyncEngine::with_settings(store, settings, None))
}

fn engine(store: &Arc<MockStore>) -> Arc<TreeSyncEngine> {
    engine_with(store, settings())
}

fn path(s: &str) -> TreePath {
    TreePath::parse(s).unwrap()
}

fn items(names: &[&str]) -> Vec<UploadItem> {
    names.iter().map(|n| UploadItem::new(*n, vec![0; 10])).collect()
}

fn child_names(children: &[dataroom_core::domain::TreeNode]) -> Vec<String> {
    children.iter().map(|c| c.name().to_string()).collect()
}

/// Calls `cancel_upload` on the engine once `after` files are stored
fn cancel_after(store: &MockStore, engine: &Arc<TreeSyncEngine>, after: usize) {
    let weak: Weak<TreeSyncEngine> = Arc::downgrade(engine);
    *store.on_upload.lock().unwrap() = Some(Box::new(move |n| {
        if n == after {
            if let Some(engine) = weak.upgrade() {
                engine.cancel_upload();
            }
        }
    }));
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn test_refresh_loads_roots_and_resets_loaded_set() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    store.folder("Finance", None);
    store.file(legal, "nda.pdf");
    let engine = engine(&store);

    engine.refresh().await.unwrap();
    let roots = engine.children_at(&TreePath::root()).await;
    assert_eq!(child_names(&roots), vec!["Legal", "Finance"]);
    assert_eq!(roots[0].as_folder().unwrap().item_count, 1);

    engine.load_folder_children(&legal).await.unwrap();
    assert!(engine.is_loaded(&legal).await);
    assert_eq!(child_names(&engine.children_at(&path("/legal")).await), vec!["nda.pdf"]);

    engine.refresh().await.unwrap();
    assert!(!engine.is_loaded(&legal).await);
    assert!(engine.children_at(&path("/legal")).await.is_empty());
    assert!(!engine.is_loading().await);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_loads_of_one_folder_fetch_once() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    store.file(legal, "nda.pdf");
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    store.delay("fetch_folder_children", Duration::from_secs(1));

    let (first, second) = tokio::join!(engine.load_folder_children(&legal), engine.load_folder_children(&legal));
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(store.count("fetch_folder_children"), 1);
    assert!(engine.is_loaded(&legal).await);

    engine.load_folder_children(&legal).await.unwrap();
    assert_eq!(store.count("fetch_folder_children"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_refreshes_coalesce() {
    let store = MockStore::new();
    store.folder("Legal", None);
    store.delay("fetch_root_folders", Duration::from_secs(1));
    let engine = engine(&store);

    let (a, b) = tokio::join!(engine.refresh(), engine.refresh());
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(store.count("fetch_root_folders"), 1);
    assert_eq!(engine.forest().await.roots().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timeout_sets_error_and_clears_loading() {
    let store = MockStore::new();
    store.folder("Legal", None);
    store.delay("fetch_root_folders", Duration::from_secs(20));
    let engine = engine(&store);

    let result = engine.refresh().await;
    assert!(matches!(result, Err(SyncError::Store(StoreError::Timeout(_)))));
    assert!(matches!(engine.last_error().await, Some(SyncError::Store(StoreError::Timeout(_)))));
    assert!(!engine.is_loading().await);

    store.delay("fetch_root_folders", Duration::ZERO);
    engine.refresh().await.unwrap();
    assert_eq!(engine.last_error().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_refresh_clears_loading() {
    let store = MockStore::new();
    store.folder("Legal", None);
    store.delay("fetch_root_folders", Duration::from_secs(10));
    let engine = engine(&store);

    let abandoned = tokio::time::timeout(Duration::from_secs(1), engine.refresh()).await;
    assert!(abandoned.is_err());
    assert!(!engine.is_loading().await);

    store.delay("fetch_root_folders", Duration::ZERO);
    engine.refresh().await.unwrap();
    assert_eq!(store.count("fetch_root_folders"), 2);
    assert_eq!(child_names(&engine.children_at(&TreePath::root()).await), vec!["Legal"]);
}

#[tokio::test(start_paused = true)]
async fn test_subtree_fetch_has_its_own_deadline() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    store.delay("fetch_folder_children", Duration::from_secs(10));

    let result = engine.load_folder_children(&legal).await;
    assert!(matches!(result, Err(SyncError::Store(StoreError::Timeout(_)))));
    assert!(!engine.is_loaded(&legal).await);
}

#[tokio::test(start_paused = true)]
async fn test_transient_refresh_failure_is_retried() {
    let store = MockStore::new();
    store.folder("Legal", None);
    store.fail("fetch_root_folders", StoreError::TransientNetwork("reset".into()));
    let engine = engine_with(&store, EngineSettings::default());

    let result = engine.refresh().await;
    assert!(matches!(result, Err(SyncError::Store(StoreError::TransientNetwork(_)))));
    assert_eq!(store.count("fetch_root_folders"), 3);
}

// ============================================================================
// Structural mutations
// ============================================================================

#[tokio::test]
async fn test_add_folder_disambiguates_slug_and_refreshes() {
    let store = MockStore::new();
    store.folder("Reports", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    let created = engine.add_folder(&TreePath::root(), "Reports").await.unwrap();
    assert_eq!(created.slug, "reports-1");
    assert_eq!(created.name, "Reports");
    assert_eq!(store.count("fetch_root_folders"), 2);
    assert_eq!(engine.forest().await.roots().len(), 2);
    assert!(engine.forest().await.resolve_path(&path("/reports-1")).is_some());
}

#[tokio::test]
async fn test_add_link_reloads_only_the_parent() {
    let store = MockStore::new();
    let deals = store.folder("Deals", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    let link = engine
        .add_link(&path("/deals"), "Data site", "https://example.com")
        .await
        .unwrap();
    assert_eq!(link.item_type, ItemType::Link);
    assert_eq!(store.count("fetch_root_folders"), 1);
    assert!(engine.is_loaded(&deals).await);
    assert_eq!(child_names(&engine.children_at(&path("/deals")).await), vec!["Data site"]);

    let at_root = engine.add_link(&TreePath::root(), "x", "https://example.com").await;
    assert_eq!(at_root.unwrap_err(), SyncError::FileAtRoot);
}

#[tokio::test]
async fn test_rename_file_reloads_parent_and_folder_refreshes() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    let nda = store.file(legal, "nda.pdf");
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&legal).await.unwrap();

    engine
        .rename_item(&path("/legal"), &ItemId::File(nda), "nda-signed.pdf")
        .await
        .unwrap();
    assert_eq!(store.count("fetch_root_folders"), 1);
    assert_eq!(child_names(&engine.children_at(&path("/legal")).await), vec!["nda-signed.pdf"]);

    engine
        .rename_item(&TreePath::root(), &ItemId::Folder(legal), "Legal Docs")
        .await
        .unwrap();
    assert_eq!(store.count("fetch_root_folders"), 2);
    assert!(engine.forest().await.resolve_path(&path("/legal-docs")).is_some());
}

#[tokio::test]
async fn test_unknown_item_is_rejected_locally() {
    let store = MockStore::new();
    store.folder("Legal", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    let ghost = ItemId::File(FileId::new());
    let result = engine.delete_item(&path("/legal"), &ghost).await;
    assert!(matches!(result, Err(SyncError::ItemNotFound { .. })));
    assert_eq!(store.count("delete_file"), 0);

    let result = engine.add_folder(&path("/missing"), "X").await;
    assert_eq!(result.unwrap_err(), SyncError::PathNotFound(path("/missing")));
}

#[tokio::test]
async fn test_delete_then_restore_through_trash() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    let nda = store.file(legal, "nda.pdf");
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&legal).await.unwrap();

    engine.delete_item(&path("/legal"), &ItemId::File(nda)).await.unwrap();
    assert!(engine.children_at(&path("/legal")).await.is_empty());

    let trash = engine.list_trash().await.unwrap();
    assert_eq!(trash.files.len(), 1);

    engine.restore_item(&ItemId::File(nda)).await.unwrap();
    engine.load_folder_children(&legal).await.unwrap();
    assert_eq!(child_names(&engine.children_at(&path("/legal")).await), vec!["nda.pdf"]);

    engine.hard_delete_item(&ItemId::File(nda)).await.unwrap();
    assert!(store.file_names_in(legal).is_empty());
}

#[tokio::test]
async fn test_restore_conflict_is_surfaced() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    let nda = store.file(legal, "nda.pdf");
    store.fail("restore_file", StoreError::NameConflict("nda.pdf".into()));
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    let result = engine.restore_item(&ItemId::File(nda)).await;
    assert!(matches!(result, Err(SyncError::Store(StoreError::NameConflict(_)))));
    assert!(engine.last_error().await.is_some());
}

// ============================================================================
// Moves
// ============================================================================

/// A > B > C, all loaded, plus an unrelated root D
async fn chain(store: &Arc<MockStore>, engine: &TreeSyncEngine) -> [FolderId; 4] {
    let a = store.folder("A", None);
    let d = store.folder("D", None);
    let b = store.folder("B", Some(a));
    let c = store.folder("C", Some(b));
    engine.refresh().await.unwrap();
    engine.load_folder_children(&a).await.unwrap();
    engine.load_folder_children(&b).await.unwrap();
    [a, b, c, d]
}

#[tokio::test]
async fn test_move_into_descendant_is_rejected_without_store_call() {
    let store = MockStore::new();
    let engine = engine(&store);
    let [a, _, c, _] = chain(&store, &engine).await;
    let before = engine.forest().await;

    let result = engine.move_folder_to_folder(&a, Some(&c)).await;
    assert_eq!(result, Err(SyncError::IllegalMove(MoveViolation::IntoDescendant)));

    let result = engine.move_item(&TreePath::root(), &ItemId::Folder(a), &path("/a/b/c")).await;
    assert_eq!(result, Err(SyncError::IllegalMove(MoveViolation::IntoDescendant)));

    let result = engine.move_folder_to_folder(&a, Some(&a)).await;
    assert_eq!(result, Err(SyncError::IllegalMove(MoveViolation::SelfMove)));

    assert_eq!(engine.forest().await, before);
    assert_eq!(store.count("move_folder_to_parent"), 0);
}

#[tokio::test]
async fn test_move_folder_to_folder_persists_and_refreshes() {
    let store = MockStore::new();
    let engine = engine(&store);
    let [_, _, c, d] = chain(&store, &engine).await;

    engine.move_folder_to_folder(&c, Some(&d)).await.unwrap();
    assert_eq!(store.count("move_folder_to_parent"), 1);
    engine.load_folder_children(&d).await.unwrap();
    assert_eq!(child_names(&engine.children_at(&path("/d")).await), vec!["C"]);

    engine.move_folder_to_folder(&c, None).await.unwrap();
    let roots = engine.children_at(&TreePath::root()).await;
    assert_eq!(child_names(&roots), vec!["A", "D", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_move_shows_optimistically_then_reverts() {
    let store = MockStore::new();
    let x = store.folder("X", None);
    let y = store.folder("Y", None);
    let report = store.file(x, "report.pdf");
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&x).await.unwrap();
    engine.load_folder_children(&y).await.unwrap();

    store.delay("move_file_to_folder", Duration::from_secs(1));
    store.fail("move_file_to_folder", StoreError::PermissionDenied("folder Y".into()));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .move_item(&path("/x"), &ItemId::File(report), &path("/y"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.children_at(&path("/x")).await.is_empty());
    assert_eq!(child_names(&engine.children_at(&path("/y")).await), vec!["report.pdf"]);

    let result = task.await.unwrap();
    assert!(matches!(result, Err(SyncError::Store(StoreError::PermissionDenied(_)))));
    assert!(matches!(engine.last_error().await, Some(SyncError::Store(StoreError::PermissionDenied(_)))));
    assert!(engine.children_at(&path("/y")).await.is_empty());

    engine.load_folder_children(&x).await.unwrap();
    assert_eq!(child_names(&engine.children_at(&path("/x")).await), vec!["report.pdf"]);
    assert_eq!(store.file_names_in(x), vec!["report.pdf"]);
}

#[tokio::test]
async fn test_move_into_unloaded_folder_appends_after_its_subfolders() {
    let store = MockStore::new();
    let x = store.folder("X", None);
    let y = store.folder("Y", None);
    let z = store.folder("Z", None);
    let s1 = store.folder("S1", Some(x));
    let s2 = store.folder("S2", Some(x));
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    assert!(!engine.is_loaded(&x).await);

    engine
        .move_item(&TreePath::root(), &ItemId::Folder(y), &path("/x"))
        .await
        .unwrap();
    engine.move_folder_to_folder(&z, Some(&x)).await.unwrap();

    assert_eq!(store.placement(s1), (Some(x), 0));
    assert_eq!(store.placement(s2), (Some(x), 1));
    assert_eq!(store.placement(y), (Some(x), 2));
    assert_eq!(store.placement(z), (Some(x), 3));
}

#[tokio::test(start_paused = true)]
async fn test_move_rejected_by_store_restores_server_tree() {
    let store = MockStore::new();
    let a = store.folder("A", None);
    let b = store.folder("B", Some(a));
    store.folder("C", Some(b));
    let d = store.folder("D", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&a).await.unwrap();

    // B is unloaded, so nothing below it is known locally.
    store.delay("move_folder_to_parent", Duration::from_secs(1));
    store.fail("move_folder_to_parent", StoreError::InvalidMove("cycle".into()));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .move_item(&TreePath::root(), &ItemId::Folder(d), &path("/a"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(child_names(&engine.children_at(&path("/a")).await), vec!["B", "D"]);

    let result = task.await.unwrap();
    assert!(matches!(result, Err(SyncError::Store(StoreError::InvalidMove(_)))));
    assert_eq!(store.count("move_folder_to_parent"), 1);

    let fresh = engine_with(&store, settings());
    fresh.refresh().await.unwrap();
    assert_eq!(engine.forest().await, fresh.forest().await);
    assert_eq!(store.placement(d), (None, 1));
}

#[tokio::test]
async fn test_move_file_succeeds_and_refreshes() {
    let store = MockStore::new();
    let x = store.folder("X", None);
    let y = store.folder("Y", None);
    let report = store.file(x, "report.pdf");
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&x).await.unwrap();

    engine
        .move_item(&path("/x"), &ItemId::File(report), &path("/y"))
        .await
        .unwrap();
    assert_eq!(store.file_names_in(y), vec!["report.pdf"]);
    assert_eq!(store.count("fetch_root_folders"), 2);
}

#[tokio::test]
async fn test_file_cannot_move_to_root() {
    let store = MockStore::new();
    let x = store.folder("X", None);
    let report = store.file(x, "report.pdf");
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&x).await.unwrap();

    let result = engine
        .move_item(&path("/x"), &ItemId::File(report), &TreePath::root())
        .await;
    assert_eq!(result, Err(SyncError::FileAtRoot));
    assert_eq!(store.count("move_file_to_folder"), 0);
    assert_eq!(child_names(&engine.children_at(&path("/x")).await), vec!["report.pdf"]);
}

#[tokio::test]
async fn test_reorder_is_optimistic_and_not_refetched() {
    let store = MockStore::new();
    let a = store.folder("A", None);
    let b = store.folder("B", None);
    let c = store.folder("C", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    engine.reorder_folders(&TreePath::root(), &[c, a, b]).await.unwrap();
    assert_eq!(child_names(&engine.children_at(&TreePath::root()).await), vec!["C", "A", "B"]);
    assert_eq!(store.count("update_folder_order"), 1);
    assert_eq!(store.count("fetch_root_folders"), 1);

    engine.refresh().await.unwrap();
    assert_eq!(child_names(&engine.children_at(&TreePath::root()).await), vec!["C", "A", "B"]);
}

#[tokio::test]
async fn test_failed_reorder_reverts() {
    let store = MockStore::new();
    let a = store.folder("A", None);
    let b = store.folder("B", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    store.fail("update_folder_order", StoreError::PermissionDenied("root".into()));

    let result = engine.reorder_folders(&TreePath::root(), &[b, a]).await;
    assert!(matches!(result, Err(SyncError::Store(StoreError::PermissionDenied(_)))));
    assert_eq!(child_names(&engine.children_at(&TreePath::root()).await), vec!["A", "B"]);
}

#[tokio::test]
async fn test_sharing_label_is_local_only() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    let calls_before = store.calls.lock().unwrap().len();

    engine
        .set_sharing(&TreePath::root(), &ItemId::Folder(legal), Some("Buyer A".into()))
        .await
        .unwrap();
    let roots = engine.children_at(&TreePath::root()).await;
    assert_eq!(roots[0].as_folder().unwrap().sharing_label.as_deref(), Some("Buyer A"));
    assert_eq!(store.calls.lock().unwrap().len(), calls_before);
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test]
async fn test_upload_names_are_disambiguated_in_order() {
    let store = MockStore::new();
    let docs = store.folder("Docs", None);
    store.file(docs, "a.txt");
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    let uploaded = engine
        .upload_files(&path("/docs"), items(&["a.txt", "a.txt", "b.txt"]))
        .await
        .unwrap();
    let names: Vec<&str> = uploaded.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a (1).txt", "a (2).txt", "b.txt"]);
    assert_eq!(store.file_names_in(docs), vec!["a.txt", "a (1).txt", "a (2).txt", "b.txt"]);
    assert_eq!(engine.upload_progress(), None);
    assert!(!engine.is_uploading());
}

#[tokio::test]
async fn test_cancel_between_files_keeps_completed_and_skips_refresh() {
    let store = MockStore::new();
    let docs = store.folder("Docs", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    cancel_after(&store, &engine, 1);

    let result = engine
        .upload_files(&path("/docs"), items(&["one.txt", "two.txt", "three.txt"]))
        .await;
    assert_eq!(result, Err(SyncError::Cancelled { completed: 1 }));
    assert_eq!(store.count("upload_file"), 1);
    assert_eq!(store.file_names_in(docs), vec!["one.txt"]);
    assert_eq!(store.count("fetch_root_folders"), 1);

    // The stored file is shown without a refetch.
    assert_eq!(child_names(&engine.children_at(&path("/docs")).await), vec!["one.txt"]);
    assert_eq!(engine.last_error().await, None);
    assert!(!engine.cancel_upload());
}

#[tokio::test(start_paused = true)]
async fn test_hiding_the_client_cancels_active_upload() {
    let store = MockStore::new();
    let docs = store.folder("Docs", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    store.delay("upload_file", Duration::from_secs(1));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .upload_files(&path("/docs"), items(&["one.txt", "two.txt", "three.txt"]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.set_visibility(Visibility::Hidden).await, Ok(false));

    assert_eq!(task.await.unwrap(), Err(SyncError::Cancelled { completed: 1 }));
    assert_eq!(store.file_names_in(docs), vec!["one.txt"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_upload_retry_stops_retrying() {
    let store = MockStore::new();
    let docs = store.folder("Docs", None);
    let engine = engine_with(
        &store,
        EngineSettings {
            retry: RetryPolicy::default(),
            ..EngineSettings::default()
        },
    );
    engine.refresh().await.unwrap();
    store.delay("upload_file", Duration::from_secs(1));
    store.fail("upload_file", StoreError::TransientNetwork("reset".into()));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.upload_files(&path("/docs"), items(&["a.txt", "b.txt"])).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(engine.cancel_upload());

    assert_eq!(task.await.unwrap(), Err(SyncError::Cancelled { completed: 0 }));
    assert_eq!(store.count("upload_file"), 1);
    assert!(store.file_names_in(docs).is_empty());
    assert_eq!(engine.last_error().await, None);
}

#[tokio::test]
async fn test_failed_upload_stops_the_batch() {
    let store = MockStore::new();
    let docs = store.folder("Docs", None);
    *store.reject_upload.lock().unwrap() = Some("b.txt".into());
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    let result = engine
        .upload_files(&path("/docs"), items(&["a.txt", "b.txt", "c.txt"]))
        .await;
    assert!(matches!(result, Err(SyncError::Store(StoreError::NameConflict(_)))));
    assert_eq!(store.count("upload_file"), 2);
    assert_eq!(store.file_names_in(docs), vec!["a.txt"]);
    assert!(engine.last_error().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_second_upload_is_rejected_while_one_runs() {
    let store = MockStore::new();
    store.folder("Docs", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    store.delay("upload_file", Duration::from_secs(1));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.upload_files(&path("/docs"), items(&["a.txt"])).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.is_uploading());

    let second = engine.upload_files(&path("/docs"), items(&["b.txt"])).await;
    assert_eq!(second, Err(SyncError::UploadInProgress));
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_progress_estimate_is_capped_until_completion() {
    let store = MockStore::new();
    store.folder("Docs", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    store.delay("upload_file", Duration::from_secs(10));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .upload_files(&path("/docs"), vec![UploadItem::new("deck.pdf", vec![0; 1000])])
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    let early = engine.upload_progress().unwrap();
    assert!(early.current_file_estimate > 0 && early.current_file_estimate < 900);
    assert_eq!(early.current_file_name.as_deref(), Some("deck.pdf"));

    tokio::time::sleep(Duration::from_secs(8)).await;
    let late = engine.upload_progress().unwrap();
    assert_eq!(late.current_file_estimate, 900);
    assert_eq!(late.completed_files, 0);
    assert_eq!(late.percent(), 90);

    assert!(task.await.unwrap().is_ok());
    assert_eq!(engine.upload_progress(), None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_after_upload_reports_stale_view() {
    let store = MockStore::new();
    let docs = store.folder("Docs", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&docs).await.unwrap();
    store.fail("fetch_root_folders", StoreError::TransientNetwork("down".into()));

    let result = engine.upload_files(&path("/docs"), items(&["a.txt"])).await;
    assert_eq!(
        result,
        Err(SyncError::StaleAfterUpload {
            uploaded: 1,
            cause: StoreError::TransientNetwork("down".into()),
        })
    );
    assert_eq!(child_names(&engine.children_at(&path("/docs")).await), vec!["a.txt"]);
}

#[tokio::test]
async fn test_upload_rules_at_root_and_for_empty_batches() {
    let store = MockStore::new();
    store.folder("Docs", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    let at_root = engine.upload_files(&TreePath::root(), items(&["a.txt"])).await;
    assert_eq!(at_root, Err(SyncError::FileAtRoot));

    let empty = engine.upload_files(&path("/docs"), Vec::new()).await;
    assert_eq!(empty, Ok(Vec::new()));
    assert_eq!(store.count("upload_file"), 0);
    assert!(!engine.is_uploading());
}

// ============================================================================
// Visibility, search and retrieval
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_refresh_only_after_threshold() {
    let store = MockStore::new();
    store.folder("Legal", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();

    engine.set_visibility(Visibility::Hidden).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.set_visibility(Visibility::Visible).await, Ok(false));
    assert_eq!(store.count("fetch_root_folders"), 1);

    engine.set_visibility(Visibility::Hidden).await.unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(engine.set_visibility(Visibility::Visible).await, Ok(true));
    assert_eq!(store.count("fetch_root_folders"), 2);

    // Visible without having been hidden does nothing.
    assert_eq!(engine.set_visibility(Visibility::Visible).await, Ok(false));
}

#[tokio::test]
async fn test_search_is_case_insensitive_over_loaded_tree() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    store.file(legal, "Quarterly Report.pdf");
    store.folder("Reports", None);
    let engine = engine(&store);
    engine.refresh().await.unwrap();
    engine.load_folder_children(&legal).await.unwrap();

    let hits = engine.search("REPORT").await;
    let names: Vec<&str> = hits.iter().map(|h| h.node.name()).collect();
    assert_eq!(names, vec!["Quarterly Report.pdf", "Reports"]);
    assert_eq!(hits[0].path, path("/legal"));
    assert!(engine.search("   ").await.is_empty());
}

#[tokio::test]
async fn test_download_url_swallows_errors() {
    let store = MockStore::new();
    let legal = store.folder("Legal", None);
    let nda = store.file(legal, "nda.pdf");
    let engine = engine(&store);

    let url = engine.download_url(&nda).await.unwrap();
    assert!(url.ends_with(&nda.to_string()));

    store.fail("signed_url", StoreError::NotFound("nda".into()));
    assert_eq!(engine.download_url(&nda).await, None);
}
