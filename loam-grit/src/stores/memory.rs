//! In-memory object store and reference namespace.
//!
//! Default back-end for tests and single-process agents. Objects are
//! kept as their encoded bytes keyed by id, so a load always
//! round-trips through the canonical decoder exactly like the durable
//! back-ends.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

// Layer 3: Internal module imports
use crate::encoding::{bytes_to_object, object_id, object_to_bytes};
use crate::error::StoreError;
use crate::id::ObjectId;
use crate::object::Object;
use crate::references::References;
use crate::store::{ObjectLoader, ObjectStore};

/// In-memory object store.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<DashMap<ObjectId, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct objects held.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectLoader for MemoryObjectStore {
    async fn load(&self, object_id: ObjectId) -> Result<Option<Object>, StoreError> {
        self.load_sync(object_id)
    }

    fn load_sync(&self, id: ObjectId) -> Result<Option<Object>, StoreError> {
        match self.objects.get(&id) {
            Some(bytes) => {
                let object = bytes_to_object(bytes.value())
                    .map_err(|source| StoreError::Corrupt { id, source })?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn store(&self, object: &Object) -> Result<ObjectId, StoreError> {
        self.store_sync(object)
    }

    fn store_sync(&self, object: &Object) -> Result<ObjectId, StoreError> {
        let bytes = object_to_bytes(object);
        let id = object_id(&bytes);
        self.objects.entry(id).or_insert(bytes);
        Ok(id)
    }
}

/// In-memory reference namespace.
#[derive(Clone, Default)]
pub struct MemoryReferences {
    refs: Arc<RwLock<BTreeMap<String, ObjectId>>>,
}

impl MemoryReferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl References for MemoryReferences {
    async fn get(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        self.get_sync(name)
    }

    async fn get_all(&self) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        self.get_all_sync()
    }

    async fn set(&self, name: &str, object_id: ObjectId) -> Result<(), StoreError> {
        self.set_sync(name, object_id)
    }

    fn get_sync(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        Ok(self.refs.read().get(name).copied())
    }

    fn get_all_sync(&self) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        Ok(self.refs.read().clone())
    }

    fn set_sync(&self, name: &str, object_id: ObjectId) -> Result<(), StoreError> {
        self.refs.write().insert(name.to_string(), object_id);
        Ok(())
    }
}
