//! Tree model: pure queries and structural updates over the folder forest
//!
//! A [`Forest`] is the list of root-level folders plus everything reachable
//! beneath them through *loaded* children. Nothing in this module performs
//! I/O: a walk that reaches a folder whose children have not been fetched
//! simply finds nothing there (fails closed). Fetching is the engine's job.
//!
//! Updates are copy-on-write. Editing a folder rebuilds only the spine from
//! its root down to it; every other subtree is shared with the previous
//! forest through its `Arc`, so snapshots handed out earlier stay valid.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::item::{Folder, TreeNode};
use super::newtypes::{FolderId, ItemId, TreePath};

/// One entry of a flattened forest
#[derive(Debug, Clone, PartialEq)]
pub struct FlatEntry {
    pub node: TreeNode,
    /// For folders, the folder's own path; for files, the containing folder's path
    pub path: TreePath,
}

/// The set of root-level folders and everything loaded beneath them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Forest {
    roots: Vec<Arc<Folder>>,
}

impl Forest {
    /// Builds a forest from root folders, ordered by `order_index`
    pub fn new(mut roots: Vec<Folder>) -> Self {
        roots.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.name.cmp(&b.name)));
        Self {
            roots: roots.into_iter().map(Arc::new).collect(),
        }
    }

    /// Builds a forest from already-shared root folders, keeping their order
    pub fn from_roots(roots: Vec<Arc<Folder>>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[Arc<Folder>] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Walks `path` slug by slug through loaded children.
    ///
    /// Returns `None` for the root path (it is not a folder), for a missing
    /// slug, and for any walk that passes through an unloaded folder.
    pub fn resolve_path(&self, path: &TreePath) -> Option<&Arc<Folder>> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.roots.iter().find(|f| &f.slug == first)?;
        for slug in rest {
            current = current.subfolders().find(|f| &f.slug == slug)?;
        }
        Some(current)
    }

    /// Children at `path`: the root folders for the root path, otherwise the
    /// resolved folder's children, or empty when it does not resolve.
    pub fn children_at(&self, path: &TreePath) -> Vec<TreeNode> {
        if path.is_root() {
            return self
                .roots
                .iter()
                .map(|f| TreeNode::Folder(Arc::clone(f)))
                .collect();
        }
        self.resolve_path(path)
            .map(|f| f.children.clone())
            .unwrap_or_default()
    }

    /// Finds a direct child of `path` by id
    pub fn find_child_at(&self, path: &TreePath, id: &ItemId) -> Option<TreeNode> {
        self.children_at(path).into_iter().find(|n| n.has_id(id))
    }

    /// Finds a folder anywhere in the loaded forest
    pub fn find_folder(&self, id: &FolderId) -> Option<&Arc<Folder>> {
        fn search<'a>(folder: &'a Arc<Folder>, id: &FolderId) -> Option<&'a Arc<Folder>> {
            if &folder.id == id {
                return Some(folder);
            }
            folder.subfolders().find_map(|child| search(child, id))
        }
        self.roots.iter().find_map(|root| search(root, id))
    }

    /// Computes the slug path of a loaded folder
    pub fn path_of(&self, id: &FolderId) -> Option<TreePath> {
        fn search(folder: &Folder, id: &FolderId, path: TreePath) -> Option<TreePath> {
            let path = path.child(folder.slug.clone());
            if &folder.id == id {
                return Some(path);
            }
            folder
                .subfolders()
                .find_map(|child| search(child, id, path.clone()))
        }
        self.roots
            .iter()
            .find_map(|root| search(root, id, TreePath::root()))
    }

    /// Returns true if `candidate` lies strictly beneath `ancestor`.
    ///
    /// Only loaded children are visited, so a descendant hidden behind an
    /// unloaded folder is not seen; the store re-validates moves server-side.
    pub fn is_descendant_of(&self, candidate: &FolderId, ancestor: &FolderId) -> bool {
        fn contains(folder: &Folder, candidate: &FolderId) -> bool {
            folder
                .subfolders()
                .any(|child| &child.id == candidate || contains(child, candidate))
        }
        self.find_folder(ancestor)
            .map(|folder| contains(folder, candidate))
            .unwrap_or(false)
    }

    /// Depth-first listing of every loaded folder and file with its path
    pub fn flatten(&self) -> Vec<FlatEntry> {
        fn walk(folder: &Arc<Folder>, parent: &TreePath, out: &mut Vec<FlatEntry>) {
            let path = parent.child(folder.slug.clone());
            out.push(FlatEntry {
                node: TreeNode::Folder(Arc::clone(folder)),
                path: path.clone(),
            });
            for child in &folder.children {
                match child {
                    TreeNode::Folder(sub) => walk(sub, &path, out),
                    TreeNode::File(_) => out.push(FlatEntry {
                        node: child.clone(),
                        path: path.clone(),
                    }),
                }
            }
        }

        let mut out = Vec::new();
        for root in &self.roots {
            walk(root, &TreePath::root(), &mut out);
        }
        out
    }

    /// Number of folders directly at `path`
    pub fn folder_count_at(&self, path: &TreePath) -> usize {
        if path.is_root() {
            return self.roots.len();
        }
        self.resolve_path(path)
            .map(|f| f.subfolders().count())
            .unwrap_or(0)
    }

    // ========================================================================
    // Copy-on-write updates
    // ========================================================================

    /// Replaces the children at `path`, rebuilding only the spine to it.
    ///
    /// At the root path only folder nodes are kept, since files cannot live
    /// at root. Returns `None` if `path` does not resolve.
    pub fn replace_children_at(&self, path: &TreePath, children: Vec<TreeNode>) -> Option<Forest> {
        if path.is_root() {
            let roots = children
                .into_iter()
                .filter_map(|n| match n {
                    TreeNode::Folder(f) => Some(f),
                    TreeNode::File(_) => None,
                })
                .collect();
            return Some(Forest { roots });
        }

        let mut children = Some(children);
        self.rebuild_at(path, &mut |folder: &Folder| {
            folder.with_children(children.take().unwrap_or_default())
        })
    }

    /// Rebuilds the folder at `path` through `edit`, sharing all other subtrees
    fn rebuild_at(&self, path: &TreePath, edit: &mut dyn FnMut(&Folder) -> Folder) -> Option<Forest> {
        fn descend(
            folder: &Arc<Folder>,
            rest: &[String],
            edit: &mut dyn FnMut(&Folder) -> Folder,
        ) -> Option<Arc<Folder>> {
            let Some((slug, rest)) = rest.split_first() else {
                return Some(Arc::new(edit(folder)));
            };
            let (pos, child) = folder.children.iter().enumerate().find_map(|(i, n)| {
                n.as_folder().filter(|f| &f.slug == slug).map(|f| (i, f))
            })?;
            let rebuilt = descend(child, rest, edit)?;
            let mut updated = (**folder).clone();
            updated.children[pos] = TreeNode::Folder(rebuilt);
            Some(Arc::new(updated))
        }

        let (first, rest) = path.segments().split_first()?;
        let pos = self.roots.iter().position(|f| &f.slug == first)?;
        let rebuilt = descend(&self.roots[pos], rest, edit)?;
        let mut roots = self.roots.clone();
        roots[pos] = rebuilt;
        Some(Forest { roots })
    }

    /// Replaces the node with `id` by `edit(node)`, wherever it is loaded.
    ///
    /// A root-level folder must stay a folder; an edit turning it into a
    /// file is rejected. Returns `None` if the node is not loaded.
    pub fn update_node(&self, id: &ItemId, edit: &mut dyn FnMut(&TreeNode) -> TreeNode) -> Option<Forest> {
        fn descend(
            folder: &Arc<Folder>,
            id: &ItemId,
            edit: &mut dyn FnMut(&TreeNode) -> TreeNode,
        ) -> Option<Arc<Folder>> {
            for (i, node) in folder.children.iter().enumerate() {
                if node.has_id(id) {
                    let mut updated = (**folder).clone();
                    updated.children[i] = edit(node);
                    return Some(Arc::new(updated));
                }
                if let TreeNode::Folder(child) = node {
                    if let Some(rebuilt) = descend(child, id, edit) {
                        let mut updated = (**folder).clone();
                        updated.children[i] = TreeNode::Folder(rebuilt);
                        return Some(Arc::new(updated));
                    }
                }
            }
            None
        }

        for (i, root) in self.roots.iter().enumerate() {
            let rebuilt = if ItemId::Folder(root.id) == *id {
                match edit(&TreeNode::Folder(Arc::clone(root))) {
                    TreeNode::Folder(f) => Some(f),
                    TreeNode::File(_) => return None,
                }
            } else {
                descend(root, id, edit)
            };
            if let Some(rebuilt) = rebuilt {
                let mut roots = self.roots.clone();
                roots[i] = rebuilt;
                return Some(Forest { roots });
            }
        }
        None
    }

    /// Edits a loaded folder by id
    pub fn update_folder(&self, id: &FolderId, edit: impl FnOnce(&Folder) -> Folder) -> Option<Forest> {
        let mut edit = Some(edit);
        self.update_node(&ItemId::Folder(*id), &mut |node: &TreeNode| match (node, edit.take()) {
            (TreeNode::Folder(f), Some(edit)) => TreeNode::Folder(Arc::new(edit(f))),
            _ => node.clone(),
        })
    }

    /// Removes the node with `id`, returning the new forest and the node
    pub fn remove_node(&self, id: &ItemId) -> Option<(Forest, TreeNode)> {
        if let Some(pos) = self.roots.iter().position(|f| ItemId::Folder(f.id) == *id) {
            let mut roots = self.roots.clone();
            let removed = roots.remove(pos);
            return Some((Forest { roots }, TreeNode::Folder(removed)));
        }

        let parent = self.flatten().into_iter().find_map(|entry| match &entry.node {
            TreeNode::Folder(f) if f.children.iter().any(|c| c.has_id(id)) => Some(f.id),
            _ => None,
        })?;

        let mut removed = None;
        let forest = self.update_folder(&parent, |folder| {
            let mut updated = folder.clone();
            if let Some(pos) = updated.children.iter().position(|c| c.has_id(id)) {
                removed = Some(updated.children.remove(pos));
            }
            updated
        })?;
        removed.map(|node| (forest, node))
    }

    /// Appends `node` to the children of `target` (root level when `None`).
    ///
    /// Folders are inserted after the last folder so the folders-then-files
    /// ordering holds. Returns `None` if `target` is not loaded or if a file
    /// is appended at root.
    pub fn append_child(&self, target: Option<&FolderId>, node: TreeNode) -> Option<Forest> {
        match target {
            None => match node {
                TreeNode::Folder(f) => {
                    let mut roots = self.roots.clone();
                    roots.push(f);
                    Some(Forest { roots })
                }
                TreeNode::File(_) => None,
            },
            Some(target) => {
                let mut node = Some(node);
                self.update_folder(target, |folder| {
                    let mut updated = folder.clone();
                    if let Some(node) = node.take() {
                        match node {
                            TreeNode::Folder(_) => {
                                let pos = updated.subfolders().count();
                                updated.children.insert(pos, node);
                            }
                            TreeNode::File(_) => updated.children.push(node),
                        }
                    }
                    updated
                })
            }
        }
    }

    /// Assigns `order_index` by position in `ordered` to the folders at
    /// `path` and re-sorts them. Folders absent from `ordered` keep their
    /// index and sort after the listed ones on ties.
    pub fn reorder_folders_at(&self, path: &TreePath, ordered: &[FolderId]) -> Option<Forest> {
        let positions: HashMap<&FolderId, i64> = ordered
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i as i64))
            .collect();

        let reorder = |folders: Vec<Arc<Folder>>| -> Vec<Arc<Folder>> {
            let mut folders: Vec<Arc<Folder>> = folders
                .into_iter()
                .map(|f| match positions.get(&f.id) {
                    Some(&idx) if idx != f.order_index => {
                        let mut updated = (*f).clone();
                        updated.order_index = idx;
                        Arc::new(updated)
                    }
                    _ => f,
                })
                .collect();
            folders.sort_by_key(|f| (f.order_index, !positions.contains_key(&f.id)));
            folders
        };

        if path.is_root() {
            return Some(Forest {
                roots: reorder(self.roots.clone()),
            });
        }

        self.rebuild_at(path, &mut |folder: &Folder| {
            let folders = reorder(folder.subfolders().cloned().collect());
            let files = folder.files().cloned().map(TreeNode::File);
            folder.with_children(folders.into_iter().map(TreeNode::Folder).chain(files).collect())
        })
    }
}
