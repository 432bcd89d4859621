//! The core: the tree-shaped "source" of an actor.

// Layer 1: Standard library imports
use std::ops::{Deref, DerefMut};

// Layer 3: Internal module imports
use loam_grit::TreeId;

use crate::error::WitError;
use crate::handler::SharedStore;
use crate::tree_object::TreeObject;

/// Node holding the actor's wit handler reference.
pub const WIT_NODE: &str = "wit";
/// Node holding the actor's query handler reference.
pub const WIT_QUERY_NODE: &str = "wit_query";
/// Node holding the actor's update handler reference.
pub const WIT_UPDATE_NODE: &str = "wit_update";
/// Conventional sub-tree for in-core source code.
pub const CODE_NODE: &str = "code";
/// Conventional sub-tree for developer state.
pub const STATE_NODE: &str = "state";
/// Conventional node for genesis arguments.
pub const ARGS_NODE: &str = "args";

/// A [`TreeObject`] rooted at a step's `core`.
///
/// Carries the conventional sub-nodes `wit`, `wit_query`,
/// `wit_update`, `code`, `state`, and `args`. A core is well-formed
/// iff it is a tree and, if it is to be executed, `wit` is a non-empty
/// string blob.
#[derive(Debug, Clone, Default)]
pub struct Core(TreeObject);

impl Core {
    /// An empty core, to be filled in by a builder.
    pub fn new_empty() -> Self {
        Self(TreeObject::new_empty())
    }

    /// Wrap an existing tree view.
    pub fn from_tree_object(tree: TreeObject) -> Self {
        Self(tree)
    }

    /// Load a core by its tree id.
    pub async fn from_core_id(loader: &SharedStore, core_id: TreeId) -> Result<Self, WitError> {
        Ok(Self(TreeObject::from_tree_id(loader, core_id).await?))
    }

    /// Build a minimal core whose handlers resolve through the host
    /// registry: `wit = "external:<wit_ref>"` and optionally
    /// `wit_query = "external:<query_ref>"`.
    pub async fn from_external_wit_ref(
        wit_ref: &str,
        query_ref: Option<&str>,
    ) -> Result<Self, WitError> {
        let mut core = Self::new_empty();
        core.makeb(WIT_NODE)
            .await?
            .set_as_str(format!("external:{wit_ref}"));
        if let Some(query_ref) = query_ref {
            core.makeb(WIT_QUERY_NODE)
                .await?
                .set_as_str(format!("external:{query_ref}"));
        }
        Ok(core)
    }

    /// The underlying tree view.
    pub fn tree(&self) -> &TreeObject {
        &self.0
    }

    pub fn tree_mut(&mut self) -> &mut TreeObject {
        &mut self.0
    }

    pub fn into_tree_object(self) -> TreeObject {
        self.0
    }
}

impl Deref for Core {
    type Target = TreeObject;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Core {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<TreeObject> for Core {
    fn from(tree: TreeObject) -> Self {
        Self(tree)
    }
}
