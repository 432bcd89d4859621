//! A mutable, typed view over a raw [`Blob`].

// Layer 2: Third-party crate imports
use serde::de::DeserializeOwned;
use serde::Serialize;

// Layer 3: Internal module imports
use loam_grit::{headers, Blob, BlobId, Headers, Object};

use crate::error::WitError;
use crate::handler::SharedStore;

/// An in-memory blob with dirty tracking and typed accessors.
///
/// `persist` stores the blob iff it is dirty or was never persisted.
/// A blob whose data was never set is *empty*: tree persistence drops
/// empty children instead of storing them.
#[derive(Debug, Clone)]
pub struct BlobObject {
    headers: Headers,
    data: Option<Vec<u8>>,
    dirty: bool,
    base_id: Option<BlobId>,
}

impl BlobObject {
    /// A blob with no headers and no data yet.
    pub fn new_empty() -> Self {
        Self {
            headers: Headers::new(),
            data: None,
            dirty: false,
            base_id: None,
        }
    }

    /// Wrap a raw blob (not yet persisted as far as this view knows).
    pub fn from_blob(blob: Blob) -> Self {
        Self {
            headers: blob.headers.unwrap_or_default(),
            data: Some(blob.data),
            dirty: false,
            base_id: None,
        }
    }

    /// Wrap a blob known to already be stored under `blob_id`.
    pub(crate) fn from_loaded(blob: Blob, blob_id: BlobId) -> Self {
        Self {
            headers: blob.headers.unwrap_or_default(),
            data: Some(blob.data),
            dirty: false,
            base_id: Some(blob_id),
        }
    }

    /// Load a blob by id.
    pub async fn from_blob_id(loader: &SharedStore, blob_id: BlobId) -> Result<Self, WitError> {
        let object = loader
            .load(blob_id)
            .await?
            .ok_or(WitError::MissingObject(blob_id))?;
        let blob = object
            .into_blob()
            .ok_or_else(|| WitError::InvalidCore(format!("object {blob_id} is not a blob")))?;
        Ok(Self {
            headers: blob.headers.unwrap_or_default(),
            data: Some(blob.data),
            dirty: false,
            base_id: Some(blob_id),
        })
    }

    pub fn from_str(value: impl Into<String>) -> Self {
        let mut blob = Self::new_empty();
        blob.set_as_str(value);
        blob
    }

    pub fn from_bytes(value: impl Into<Vec<u8>>) -> Self {
        let mut blob = Self::new_empty();
        blob.set_as_bytes(value);
        blob
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, WitError> {
        let mut blob = Self::new_empty();
        blob.set_as_json(value)?;
        Ok(blob)
    }

    pub fn from_model<T: Serialize>(value: &T) -> Result<Self, WitError> {
        Self::from_json(&serde_json::to_value(value)?)
    }

    /// True when no data was ever set.
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
        self.dirty = true;
    }

    /// The blob's `Content-Type` header, falling back on the `ct` code.
    pub fn content_type(&self) -> Option<&str> {
        self.header(headers::CONTENT_TYPE)
            .or_else(|| match self.header(headers::CT) {
                Some("s") => Some("text/plain; charset=utf-8"),
                Some("j") => Some("application/json"),
                Some("b") => Some("application/octet-stream"),
                _ => None,
            })
    }

    pub fn get_as_bytes(&self) -> Result<&[u8], WitError> {
        self.data
            .as_deref()
            .ok_or_else(|| WitError::InvalidMessage("blob has no data".to_string()))
    }

    pub fn get_as_str(&self) -> Result<String, WitError> {
        let bytes = self.get_as_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| WitError::InvalidMessage("blob data is not utf-8".to_string()))
    }

    pub fn get_as_json(&self) -> Result<serde_json::Value, WitError> {
        Ok(serde_json::from_slice(self.get_as_bytes()?)?)
    }

    pub fn get_as_model<T: DeserializeOwned>(&self) -> Result<T, WitError> {
        Ok(serde_json::from_slice(self.get_as_bytes()?)?)
    }

    pub fn set_as_bytes(&mut self, value: impl Into<Vec<u8>>) {
        self.data = Some(value.into());
        self.headers
            .insert(headers::CT.to_string(), headers::CT_BYTES.to_string());
        self.dirty = true;
    }

    pub fn set_as_str(&mut self, value: impl Into<String>) {
        self.data = Some(value.into().into_bytes());
        self.headers
            .insert(headers::CT.to_string(), headers::CT_STR.to_string());
        self.dirty = true;
    }

    pub fn set_as_json(&mut self, value: &serde_json::Value) -> Result<(), WitError> {
        self.data = Some(serde_json::to_vec(value)?);
        self.headers
            .insert(headers::CT.to_string(), headers::CT_JSON.to_string());
        self.dirty = true;
        Ok(())
    }

    pub fn set_as_model<T: Serialize>(&mut self, value: &T) -> Result<(), WitError> {
        self.set_as_json(&serde_json::to_value(value)?)
    }

    /// Drop the data, making the blob empty again.
    pub fn set_empty(&mut self) {
        self.data = None;
        self.dirty = true;
        self.base_id = None;
    }

    /// The raw blob this view represents.
    pub fn get_as_blob(&self) -> Result<Blob, WitError> {
        let data = self.get_as_bytes()?.to_vec();
        let headers = if self.headers.is_empty() {
            None
        } else {
            Some(self.headers.clone())
        };
        Ok(Blob { headers, data })
    }

    /// The id this blob was loaded from or last persisted as.
    pub fn object_id(&self) -> Option<BlobId> {
        self.base_id
    }

    /// Store the blob iff dirty or never persisted; returns its id.
    pub async fn persist(&mut self, store: &SharedStore) -> Result<BlobId, WitError> {
        if !self.dirty {
            if let Some(id) = self.base_id {
                return Ok(id);
            }
        }
        let blob = self.get_as_blob()?;
        let id = store.store(&Object::Blob(blob)).await?;
        self.base_id = Some(id);
        self.dirty = false;
        Ok(id)
    }
}

impl Default for BlobObject {
    fn default() -> Self {
        Self::new_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use loam_grit::MemoryObjectStore;
    use serde::{Deserialize, Serialize};

    use super::*;

    fn shared_store() -> SharedStore {
        Arc::new(MemoryObjectStore::new())
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        name: String,
        retries: u32,
    }

    #[test]
    fn test_str_view_sets_ct() {
        let blob = BlobObject::from_str("hello");
        assert_eq!(blob.get_as_str().unwrap(), "hello");
        assert_eq!(blob.header(headers::CT), Some("s"));
        assert_eq!(blob.content_type(), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_model_round_trip() {
        let settings = Settings {
            name: "echo".to_string(),
            retries: 3,
        };
        let blob = BlobObject::from_model(&settings).unwrap();
        assert_eq!(blob.header(headers::CT), Some("j"));
        assert_eq!(blob.get_as_model::<Settings>().unwrap(), settings);
    }

    #[test]
    fn test_empty_blob_has_no_data() {
        let mut blob = BlobObject::new_empty();
        assert!(blob.is_empty());
        assert!(blob.get_as_bytes().is_err());
        blob.set_as_bytes(vec![1, 2, 3]);
        assert!(!blob.is_empty());
        blob.set_empty();
        assert!(blob.is_empty());
    }

    #[tokio::test]
    async fn test_persist_only_when_dirty() {
        let store = shared_store();
        let mut blob = BlobObject::from_str("stable");
        let id1 = blob.persist(&store).await.unwrap();
        // unchanged: same id without touching the store again
        let id2 = blob.persist(&store).await.unwrap();
        assert_eq!(id1, id2);

        blob.set_as_str("changed");
        let id3 = blob.persist(&store).await.unwrap();
        assert_ne!(id1, id3);
    }

    #[tokio::test]
    async fn test_load_round_trip() {
        let store = shared_store();
        let mut blob = BlobObject::from_str("on disk");
        let id = blob.persist(&store).await.unwrap();

        let loaded = BlobObject::from_blob_id(&store, id).await.unwrap();
        assert_eq!(loaded.get_as_str().unwrap(), "on disk");
        assert_eq!(loaded.object_id(), Some(id));
    }
}
