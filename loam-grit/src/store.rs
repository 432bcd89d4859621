//! Object store traits: the persistence seam of the grit layer.
//!
//! Back-ends (in-memory, single-file directory, memory-mapped
//! database) are interchangeable behind these traits. Each trait has
//! an async face and a sync face on the same object; sync faces exist
//! for callers that run inside non-async code paths such as the module
//! loader.
//!
//! `store` is idempotent: writing an object that already exists is a
//! no-op that returns the same id. Caches are permitted but must honor
//! content-address equality.

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::error::StoreError;
use crate::id::ObjectId;
use crate::object::Object;

/// Read-only access to stored objects.
#[async_trait]
pub trait ObjectLoader: Send + Sync {
    /// Load and decode an object; `None` when the id is absent.
    async fn load(&self, object_id: ObjectId) -> Result<Option<Object>, StoreError>;

    /// Synchronous face of [`ObjectLoader::load`].
    fn load_sync(&self, object_id: ObjectId) -> Result<Option<Object>, StoreError>;
}

/// Read-write access to stored objects.
#[async_trait]
pub trait ObjectStore: ObjectLoader {
    /// Serialize, hash, and persist an object, returning its id.
    ///
    /// # Errors
    /// [`StoreError::Full`] is recoverable (resize and retry); any
    /// other error is fatal for the back-end.
    async fn store(&self, object: &Object) -> Result<ObjectId, StoreError>;

    /// Synchronous face of [`ObjectStore::store`].
    fn store_sync(&self, object: &Object) -> Result<ObjectId, StoreError>;
}
