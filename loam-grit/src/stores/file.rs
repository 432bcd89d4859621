//! File-directory object store and reference namespace.
//!
//! Objects live as one file per id under `<root>/obj/<hex>`; references
//! live as small files under `<root>/refs/<name>` (reference names
//! contain `/` and map to nested directories). Suitable for a
//! single-process agent that needs its state to survive restarts.
//!
//! Writes go through a store-wide mutex so two tasks never race on the
//! same path. Grit files are tiny; writing them synchronously on the
//! async face is faster than bouncing every write through the blocking
//! pool.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use walkdir::WalkDir;

// Layer 3: Internal module imports
use crate::encoding::{bytes_to_object, object_id, object_to_bytes};
use crate::error::StoreError;
use crate::id::ObjectId;
use crate::object::Object;
use crate::references::References;
use crate::store::{ObjectLoader, ObjectStore};

/// Object store over a plain directory of content-addressed files.
#[derive(Clone)]
pub struct FileObjectStore {
    inner: Arc<FileStoreInner>,
}

struct FileStoreInner {
    object_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileObjectStore {
    /// Open (creating if needed) a store rooted at `store_path`.
    pub fn open(store_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let object_dir = store_path.as_ref().join("obj");
        fs::create_dir_all(&object_dir)?;
        Ok(Self {
            inner: Arc::new(FileStoreInner {
                object_dir,
                write_lock: Mutex::new(()),
            }),
        })
    }

    fn object_path(&self, id: ObjectId) -> PathBuf {
        self.inner.object_dir.join(id.to_hex())
    }
}

#[async_trait]
impl ObjectLoader for FileObjectStore {
    async fn load(&self, object_id: ObjectId) -> Result<Option<Object>, StoreError> {
        self.load_sync(object_id)
    }

    fn load_sync(&self, id: ObjectId) -> Result<Option<Object>, StoreError> {
        let path = self.object_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let object =
            bytes_to_object(&bytes).map_err(|source| StoreError::Corrupt { id, source })?;
        Ok(Some(object))
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn store(&self, object: &Object) -> Result<ObjectId, StoreError> {
        self.store_sync(object)
    }

    fn store_sync(&self, object: &Object) -> Result<ObjectId, StoreError> {
        let bytes = object_to_bytes(object);
        let id = object_id(&bytes);
        let path = self.object_path(id);
        // Content-addressed: an existing file already holds these bytes.
        if path.exists() {
            return Ok(id);
        }
        let _guard = self.inner.write_lock.lock();
        fs::write(&path, &bytes)?;
        Ok(id)
    }
}

/// Reference namespace over files beneath `<root>/refs/`.
#[derive(Clone)]
pub struct FileReferences {
    inner: Arc<FileRefsInner>,
}

struct FileRefsInner {
    refs_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileReferences {
    /// Open (creating if needed) a namespace rooted at `store_path`.
    pub fn open(store_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let refs_dir = store_path.as_ref().join("refs");
        fs::create_dir_all(&refs_dir)?;
        Ok(Self {
            inner: Arc::new(FileRefsInner {
                refs_dir,
                write_lock: Mutex::new(()),
            }),
        })
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        let mut path = self.inner.refs_dir.clone();
        for part in name.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    fn ref_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.inner.refs_dir).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl References for FileReferences {
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
        let path = self.ref_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let id = ObjectId::from_hex(text.trim())
            .map_err(|err| StoreError::Backend(format!("bad reference '{name}': {err}")))?;
        Ok(Some(id))
    }

    fn get_all_sync(&self) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        let mut refs = BTreeMap::new();
        for entry in WalkDir::new(&self.inner.refs_dir) {
            let entry = entry.map_err(|err| StoreError::Backend(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = self.ref_name(entry.path()) {
                if let Some(id) = self.get_sync(&name)? {
                    refs.insert(name, id);
                }
            }
        }
        Ok(refs)
    }

    fn set_sync(&self, name: &str, object_id: ObjectId) -> Result<(), StoreError> {
        let path = self.ref_path(name);
        let _guard = self.inner.write_lock.lock();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, object_id.to_hex())?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::object::Blob;
    use crate::references::ref_step_head;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::open(dir.path()).unwrap();
        let object = Object::Blob(Blob::new("persisted"));
        let id = store.store(&object).await.unwrap();
        assert_eq!(store.load(id).await.unwrap(), Some(object));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileObjectStore::open(dir.path()).unwrap();
            store
                .store(&Object::Blob(Blob::new("durable")))
                .await
                .unwrap()
        };
        let reopened = FileObjectStore::open(dir.path()).unwrap();
        let loaded = reopened.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.as_blob().unwrap().data, b"durable");
    }

    #[tokio::test]
    async fn test_file_store_idempotent_put() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::open(dir.path()).unwrap();
        let object = Object::Blob(Blob::new("once"));
        let id1 = store.store(&object).await.unwrap();
        let id2 = store.store(&object).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn test_file_references_nested_names() {
        let dir = tempfile::tempdir().unwrap();
        let refs = FileReferences::open(dir.path()).unwrap();
        let actor = ObjectId::digest(b"actor");
        let step = ObjectId::digest(b"step");

        refs.set(&ref_step_head(actor), step).await.unwrap();
        refs.set("runtime/agent", actor).await.unwrap();

        assert_eq!(refs.get(&ref_step_head(actor)).await.unwrap(), Some(step));
        let all = refs.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("runtime/agent"));
        assert!(all.contains_key(&ref_step_head(actor)));
    }
}
