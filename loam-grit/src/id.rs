//! Content-derived object identifiers.
//!
//! Every grit object is identified by the SHA-256 of its canonical byte
//! encoding. Identity is therefore a pure function of content: equal
//! content always yields equal ids, and ids double as wire-level
//! addresses between nodes.

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use sha2::{Digest, Sha256};

// Layer 3: Internal module imports
use crate::error::EncodingError;

/// Length of an object id in bytes (SHA-256 digest).
pub const ID_LEN: usize = 32;

/// Length of an object id in lower-hex characters.
pub const ID_STR_LEN: usize = 64;

/// A 32-byte content address: the SHA-256 of an object's canonical
/// encoding.
///
/// The all-zero value is reserved as the wire encoding of "absent" and
/// is never a valid id of a stored object.
///
/// # Example
/// ```
/// use loam_grit::ObjectId;
///
/// let id: ObjectId = "aa".repeat(32).parse().unwrap();
/// assert_eq!(id.to_string().len(), 64);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; ID_LEN]);

/// Id of a [`crate::Blob`].
pub type BlobId = ObjectId;
/// Id of a [`crate::Tree`].
pub type TreeId = ObjectId;
/// Id of a [`crate::Message`].
pub type MessageId = ObjectId;
/// Id of a [`crate::Mailbox`].
pub type MailboxId = ObjectId;
/// Id of a [`crate::Step`].
pub type StepId = ObjectId;
/// Id of an actor: the tree id of its genesis core.
pub type ActorId = ObjectId;
/// Id of an agent: the actor id of its root actor.
pub type AgentId = ObjectId;

impl ObjectId {
    /// Wrap a raw 32-byte digest.
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse an id from a byte slice, enforcing the 32-byte length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EncodingError> {
        let arr: [u8; ID_LEN] = bytes
            .try_into()
            .map_err(|_| EncodingError::IdLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Parse an id from its 64-character lower-hex form.
    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// Hash raw bytes into an id (SHA-256).
    pub fn digest(bytes: &[u8]) -> Self {
        let hash = Sha256::digest(bytes);
        Self(hash.into())
    }

    /// Borrow the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// The 64-character lower-hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True for the reserved all-zero value ("absent" on the wire).
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Check whether a string is a well-formed hex object id.
///
/// Used by the module loader to recognize tree-id prefixes in
/// fully-qualified module names.
pub fn is_object_id_str(s: &str) -> bool {
    s.len() == ID_STR_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let a = ObjectId::digest(b"hello");
        let b = ObjectId::digest(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, ObjectId::digest(b"world"));
    }

    #[test]
    fn test_hex_round_trip() {
        let id = ObjectId::digest(b"round trip");
        let parsed: ObjectId = id.to_hex().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(matches!(
            ObjectId::from_slice(&[0u8; 16]),
            Err(EncodingError::IdLength(16))
        ));
    }

    #[test]
    fn test_zero_id() {
        let zero = ObjectId::from_bytes([0u8; ID_LEN]);
        assert!(zero.is_zero());
        assert!(!ObjectId::digest(b"x").is_zero());
    }

    #[test]
    fn test_is_object_id_str() {
        let id = ObjectId::digest(b"x");
        assert!(is_object_id_str(&id.to_hex()));
        assert!(!is_object_id_str("not-an-id"));
        assert!(!is_object_id_str(&id.to_hex()[..10]));
    }
}
