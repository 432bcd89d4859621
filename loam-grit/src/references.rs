//! The reference namespace: named mutable pointers into the object
//! graph.
//!
//! References are the only mutable state in the system. The namespace
//! is small and flat, with a few well-known prefixes:
//!
//! - `heads/<hex actor id>` — the actor's latest step (its HEAD)
//! - `actors/<name>` — user-assigned actor names
//! - `prototypes/<name>` — prototype actors
//! - `runtime/agent` — the root actor of this agent
//!
//! Updates are serialized per reference by the back-end;
//! last-writer-wins. No multi-reference atomicity is required: the only
//! reference written concurrently per actor is its own HEAD, and only
//! by its own executor.

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use thiserror::Error;

// Layer 3: Internal module imports
use crate::error::StoreError;
use crate::id::{ActorId, ObjectId};

/// Actor name that may not be claimed through `actors/<name>`.
pub const RESERVED_ACTOR_NAME: &str = "root";

/// Raised when a caller tries to claim the reserved actor name.
#[derive(Error, Debug)]
#[error("actor name 'root' is reserved")]
pub struct ReservedNameError;

/// Store and query named references.
#[async_trait]
pub trait References: Send + Sync {
    /// Resolve a reference; `None` when it was never set.
    async fn get(&self, name: &str) -> Result<Option<ObjectId>, StoreError>;

    /// All references in the namespace.
    async fn get_all(&self) -> Result<BTreeMap<String, ObjectId>, StoreError>;

    /// All references whose name starts with `prefix`.
    async fn get_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        let all = self.get_all().await?;
        Ok(all
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .collect())
    }

    /// Create or overwrite a reference.
    async fn set(&self, name: &str, object_id: ObjectId) -> Result<(), StoreError>;

    /// Synchronous face of [`References::get`].
    fn get_sync(&self, name: &str) -> Result<Option<ObjectId>, StoreError>;

    /// Synchronous face of [`References::get_all`].
    fn get_all_sync(&self) -> Result<BTreeMap<String, ObjectId>, StoreError>;

    /// Synchronous face of [`References::set`].
    fn set_sync(&self, name: &str, object_id: ObjectId) -> Result<(), StoreError>;
}

/// `heads/<hex actor id>` — the per-actor HEAD reference.
pub fn ref_step_head(actor_id: ActorId) -> String {
    format!("heads/{actor_id}")
}

/// Prefix shared by all HEAD references.
pub const REF_HEADS_PREFIX: &str = "heads/";

/// `actors/<name>` — a user-assigned actor name.
pub fn ref_actor_name(name: &str) -> Result<String, ReservedNameError> {
    if name == RESERVED_ACTOR_NAME {
        return Err(ReservedNameError);
    }
    Ok(format!("actors/{name}"))
}

/// `prototypes/<name>` — a named prototype actor.
pub fn ref_prototype_name(name: &str) -> String {
    format!("prototypes/{name}")
}

/// `runtime/agent` — the root actor of this agent.
pub fn ref_root_actor() -> &'static str {
    "runtime/agent"
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::id::ObjectId;

    #[test]
    fn test_ref_step_head_format() {
        let actor = ObjectId::digest(b"actor");
        let name = ref_step_head(actor);
        assert!(name.starts_with(REF_HEADS_PREFIX));
        assert!(name.ends_with(&actor.to_hex()));
    }

    #[test]
    fn test_ref_actor_name_rejects_reserved() {
        assert!(ref_actor_name("root").is_err());
        assert_eq!(ref_actor_name("echo").unwrap(), "actors/echo");
    }

    #[test]
    fn test_prototype_and_root_refs() {
        assert_eq!(ref_prototype_name("chat"), "prototypes/chat");
        assert_eq!(ref_root_actor(), "runtime/agent");
    }
}
