//! A mutable overlay view over raw [`Tree`]s.
//!
//! A `TreeObject` holds an in-memory overlay of children keyed by
//! name. Children loaded from the store start out as unresolved ids
//! and are materialized lazily on access; children created in memory
//! exist only in the overlay until `persist` writes them out
//! post-order (children first, then the tree itself). Empty children
//! (blobs with no data, trees with no persistable children) are
//! dropped on persist rather than stored.

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;

// Layer 3: Internal module imports
use loam_grit::{Object, ObjectId, Tree, TreeId};

use crate::blob_object::BlobObject;
use crate::error::WitError;
use crate::handler::SharedStore;

/// One child of a [`TreeObject`].
#[derive(Clone)]
pub enum TreeNode {
    /// Known only by id; resolved on first access.
    Unresolved(ObjectId),
    Blob(BlobObject),
    Tree(TreeObject),
}

impl TreeNode {
    pub fn as_blob_mut(&mut self) -> Option<&mut BlobObject> {
        match self {
            TreeNode::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut TreeObject> {
        match self {
            TreeNode::Tree(tree) => Some(tree),
            _ => None,
        }
    }
}

/// An in-memory tree with lazy loading and post-order persistence.
#[derive(Clone, Default)]
pub struct TreeObject {
    loader: Option<SharedStore>,
    children: BTreeMap<String, TreeNode>,
    base_id: Option<TreeId>,
}

impl std::fmt::Debug for TreeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeObject")
            .field("keys", &self.children.keys().collect::<Vec<_>>())
            .field("base_id", &self.base_id)
            .finish()
    }
}

impl TreeObject {
    /// A fresh tree with no children and no backing store.
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// A fresh tree that can lazily resolve children through `loader`.
    pub fn new_with_loader(loader: SharedStore) -> Self {
        Self {
            loader: Some(loader),
            children: BTreeMap::new(),
            base_id: None,
        }
    }

    /// Wrap a raw tree; children start unresolved.
    pub fn from_tree(loader: SharedStore, tree: Tree) -> Self {
        Self {
            loader: Some(loader),
            children: tree
                .into_iter()
                .map(|(name, id)| (name, TreeNode::Unresolved(id)))
                .collect(),
            base_id: None,
        }
    }

    /// Load a tree by id; children start unresolved.
    pub async fn from_tree_id(loader: &SharedStore, tree_id: TreeId) -> Result<Self, WitError> {
        let object = loader
            .load(tree_id)
            .await?
            .ok_or(WitError::MissingObject(tree_id))?;
        let tree = object
            .into_tree()
            .ok_or_else(|| WitError::InvalidCore(format!("object {tree_id} is not a tree")))?;
        let mut loaded = Self::from_tree(SharedStore::clone(loader), tree);
        loaded.base_id = Some(tree_id);
        Ok(loaded)
    }

    /// The id this tree was loaded from or last persisted as.
    pub fn object_id(&self) -> Option<TreeId> {
        self.base_id
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    /// Child names, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Overlay a raw id as a child (it will resolve lazily on access).
    pub fn insert_id(&mut self, name: impl Into<String>, id: ObjectId) {
        self.children.insert(name.into(), TreeNode::Unresolved(id));
    }

    /// Remove a child from the overlay.
    pub fn remove(&mut self, name: &str) -> Option<TreeNode> {
        self.children.remove(name)
    }

    fn loader(&self) -> Result<&SharedStore, WitError> {
        self.loader
            .as_ref()
            .ok_or_else(|| WitError::Handler("tree has no loader attached".to_string()))
    }

    /// Get a child, resolving it through the loader if needed.
    pub async fn get(&mut self, name: &str) -> Result<Option<&mut TreeNode>, WitError> {
        let pending = match self.children.get(name) {
            Some(TreeNode::Unresolved(id)) => Some(*id),
            _ => None,
        };
        if let Some(id) = pending {
            let loader = SharedStore::clone(self.loader()?);
            let object = loader.load(id).await?.ok_or(WitError::MissingObject(id))?;
            let node = match object {
                Object::Blob(blob) => TreeNode::Blob(BlobObject::from_loaded(blob, id)),
                Object::Tree(tree) => {
                    let mut child = TreeObject::from_tree(SharedStore::clone(&loader), tree);
                    child.base_id = Some(id);
                    TreeNode::Tree(child)
                }
                other => {
                    return Err(WitError::InvalidCore(format!(
                        "child '{name}' is a {}, expected blob or tree",
                        other.kind().as_str()
                    )))
                }
            };
            self.children.insert(name.to_string(), node);
        }
        Ok(self.children.get_mut(name))
    }

    /// Get a child that must be a tree.
    pub async fn get_tree(&mut self, name: &str) -> Result<Option<&mut TreeObject>, WitError> {
        match self.get(name).await? {
            Some(TreeNode::Tree(tree)) => Ok(Some(tree)),
            Some(_) => Err(WitError::InvalidCore(format!("'{name}' is not a tree"))),
            None => Ok(None),
        }
    }

    /// Get a child that must be a blob.
    pub async fn get_blob(&mut self, name: &str) -> Result<Option<&mut BlobObject>, WitError> {
        match self.get(name).await? {
            Some(TreeNode::Blob(blob)) => Ok(Some(blob)),
            Some(_) => Err(WitError::InvalidCore(format!("'{name}' is not a blob"))),
            None => Ok(None),
        }
    }

    /// Traverse a relative `a/b/c` path; `None` when any part is
    /// absent.
    pub fn get_path<'a>(
        &'a mut self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<&'a mut TreeNode>, WitError>> {
        Box::pin(async move {
            let parts: Vec<String> = split_path(path)?.into_iter().map(String::from).collect();
            if parts.is_empty() {
                return Ok(None);
            }
            self.get_parts(parts).await
        })
    }

    fn get_parts(
        &mut self,
        parts: Vec<String>,
    ) -> BoxFuture<'_, Result<Option<&mut TreeNode>, WitError>> {
        Box::pin(async move {
            match parts.split_first() {
                None => Ok(None),
                Some((last, [])) => self.get(last).await,
                Some((head, rest)) => match self.get(head).await? {
                    Some(TreeNode::Tree(child)) => child.get_parts(rest.to_vec()).await,
                    _ => Ok(None),
                },
            }
        })
    }

    /// Get-or-create a child tree.
    pub async fn maket(&mut self, name: &str) -> Result<&mut TreeObject, WitError> {
        if self.contains(name) {
            // resolve so an existing subtree is extended, not replaced
            match self.get(name).await? {
                Some(TreeNode::Tree(_)) => {}
                _ => {
                    return Err(WitError::InvalidCore(format!(
                        "'{name}' exists and is not a tree"
                    )))
                }
            }
        } else {
            let child = match &self.loader {
                Some(loader) => TreeObject::new_with_loader(SharedStore::clone(loader)),
                None => TreeObject::new_empty(),
            };
            self.children
                .insert(name.to_string(), TreeNode::Tree(child));
        }
        match self.children.get_mut(name) {
            Some(TreeNode::Tree(tree)) => Ok(tree),
            _ => Err(WitError::InvalidCore(format!("'{name}' is not a tree"))),
        }
    }

    /// Get-or-create a child blob.
    pub async fn makeb(&mut self, name: &str) -> Result<&mut BlobObject, WitError> {
        if self.contains(name) {
            match self.get(name).await? {
                Some(TreeNode::Blob(_)) => {}
                _ => {
                    return Err(WitError::InvalidCore(format!(
                        "'{name}' exists and is not a blob"
                    )))
                }
            }
        } else {
            self.children
                .insert(name.to_string(), TreeNode::Blob(BlobObject::new_empty()));
        }
        match self.children.get_mut(name) {
            Some(TreeNode::Blob(blob)) => Ok(blob),
            _ => Err(WitError::InvalidCore(format!("'{name}' is not a blob"))),
        }
    }

    /// Get-or-create the tree at a relative path like `a/b/c`.
    pub async fn maket_path(&mut self, path: &str) -> Result<&mut TreeObject, WitError> {
        let parts = split_path(path)?;
        let mut current = self;
        for part in parts {
            current = current.maket(part).await?;
        }
        Ok(current)
    }

    /// Get-or-create the blob at a relative path like `a/b/c`.
    ///
    /// The path must not end in `/` (a blob needs a name).
    pub async fn makeb_path(&mut self, path: &str) -> Result<&mut BlobObject, WitError> {
        if path.ends_with('/') {
            return Err(WitError::InvalidCore(format!(
                "blob path must not end in '/': '{path}'"
            )));
        }
        let parts = split_path(path)?;
        let Some((last, init)) = parts.split_last() else {
            return Err(WitError::InvalidCore("blob path is empty".to_string()));
        };
        let mut current = self;
        for part in init {
            current = current.maket(part).await?;
        }
        current.makeb(last).await
    }

    /// Recursively overlay `other` onto this tree: shared subtrees are
    /// merged; everything else in `other` wins.
    pub fn merge(&mut self, other: TreeObject) -> BoxFuture<'_, Result<(), WitError>> {
        Box::pin(async move {
            let other_loader = other.loader.clone();
            for (name, node) in other.children {
                let node = resolve_node(node, other_loader.as_ref(), &name).await?;
                // resolve our own side so an unresolved subtree still merges
                if self.contains(&name) {
                    self.get(&name).await?;
                }
                let both_trees = matches!(self.children.get(&name), Some(TreeNode::Tree(_)))
                    && matches!(node, TreeNode::Tree(_));
                if both_trees {
                    if let (Some(TreeNode::Tree(mine)), TreeNode::Tree(theirs)) =
                        (self.children.get_mut(&name), node)
                    {
                        mine.merge(theirs).await?;
                    }
                } else {
                    self.children.insert(name, node);
                }
            }
            Ok(())
        })
    }

    /// Pre-order walk. The visitor gets each child's slash-joined path
    /// and node; returning `false` for a tree skips its children.
    pub fn walk<'a>(
        &'a mut self,
        visit: &'a mut (dyn FnMut(&str, &TreeNode) -> bool + Send),
    ) -> BoxFuture<'a, Result<(), WitError>> {
        self.walk_inner(String::new(), visit)
    }

    fn walk_inner<'a>(
        &'a mut self,
        prefix: String,
        visit: &'a mut (dyn FnMut(&str, &TreeNode) -> bool + Send),
    ) -> BoxFuture<'a, Result<(), WitError>> {
        Box::pin(async move {
            let names: Vec<String> = self.children.keys().cloned().collect();
            for name in names {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                self.get(&name).await?;
                let descend = match self.children.get(&name) {
                    Some(node) => visit(&path, node),
                    None => continue,
                };
                if descend {
                    if let Some(TreeNode::Tree(child)) = self.children.get_mut(&name) {
                        child.walk_inner(path, visit).await?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Persist post-order: children first, then this tree. Returns the
    /// tree's id. Empty children are dropped, not stored.
    pub async fn persist(&mut self, store: &SharedStore) -> Result<TreeId, WitError> {
        let tree = self.persist_children(store).await?;
        let id = store.store(&Object::Tree(tree)).await?;
        self.base_id = Some(id);
        if self.loader.is_none() {
            self.loader = Some(SharedStore::clone(store));
        }
        Ok(id)
    }

    fn persist_children<'a>(
        &'a mut self,
        store: &'a SharedStore,
    ) -> BoxFuture<'a, Result<Tree, WitError>> {
        Box::pin(async move {
            let mut tree = Tree::new();
            for (name, node) in self.children.iter_mut() {
                match node {
                    TreeNode::Unresolved(id) => {
                        tree.insert(name.clone(), *id);
                    }
                    TreeNode::Blob(blob) => {
                        if blob.is_empty() {
                            continue;
                        }
                        tree.insert(name.clone(), blob.persist(store).await?);
                    }
                    TreeNode::Tree(child) => {
                        let child_tree = child.persist_children(store).await?;
                        if child_tree.is_empty() {
                            continue;
                        }
                        let id = store.store(&Object::Tree(child_tree)).await?;
                        child.base_id = Some(id);
                        tree.insert(name.clone(), id);
                    }
                }
            }
            Ok(tree)
        })
    }
}

async fn resolve_node(
    node: TreeNode,
    loader: Option<&SharedStore>,
    name: &str,
) -> Result<TreeNode, WitError> {
    match node {
        TreeNode::Unresolved(id) => {
            let loader = loader
                .ok_or_else(|| WitError::Handler("tree has no loader attached".to_string()))?;
            let object = loader.load(id).await?.ok_or(WitError::MissingObject(id))?;
            match object {
                Object::Blob(blob) => Ok(TreeNode::Blob(BlobObject::from_loaded(blob, id))),
                Object::Tree(tree) => {
                    let mut child = TreeObject::from_tree(SharedStore::clone(loader), tree);
                    child.base_id = Some(id);
                    Ok(TreeNode::Tree(child))
                }
                other => Err(WitError::InvalidCore(format!(
                    "child '{name}' is a {}, expected blob or tree",
                    other.kind().as_str()
                ))),
            }
        }
        resolved => Ok(resolved),
    }
}

fn split_path(path: &str) -> Result<Vec<&str>, WitError> {
    if path.starts_with('/') {
        return Err(WitError::InvalidCore(format!(
            "tree paths are relative, got absolute path '{path}'"
        )));
    }
    Ok(path.split('/').filter(|p| !p.is_empty()).collect())
}
