//! Error types for encoding and storage.

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::id::ObjectId;

/// Failures while decoding (or framing) the canonical byte encoding.
///
/// Encoding itself is total; only decoding can fail.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// The `<type>` token of the object header is not one of the five
    /// known variants.
    #[error("unknown object type '{0}'")]
    UnknownType(String),

    /// The buffer ended before the declared structure was complete.
    #[error("truncated object encoding")]
    Truncated,

    /// The object header declared a body length that does not match
    /// the actual body.
    #[error("expected object body of {expected} bytes but got {actual}")]
    BodyLength { expected: usize, actual: usize },

    /// The object header itself is malformed.
    #[error("malformed object header")]
    Header,

    /// A header block or tree name is not valid UTF-8.
    #[error("non-utf8 text in object encoding")]
    NonUtf8,

    /// An id slot that must reference an object was all zero.
    #[error("object id must not be all zero")]
    ZeroId,

    /// An id had the wrong byte length.
    #[error("expected object id of 32 bytes but got {0}")]
    IdLength(usize),

    /// A hex id string could not be parsed.
    #[error("invalid hex id: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Failures of an object-store or reference back-end.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The back-end exhausted its capacity. Recoverable: resize and
    /// retry the write.
    #[error("storage full")]
    Full,

    /// Unrecoverable back-end failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// I/O failure of a file-based back-end.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes for `id` did not decode.
    #[error("corrupt object {id}: {source}")]
    Corrupt {
        id: ObjectId,
        #[source]
        source: EncodingError,
    },
}

impl StoreError {
    /// Transient errors may resolve by resizing/retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Full)
    }

    /// Fatal errors indicate the back-end cannot continue.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::Full.is_transient());
        assert!(!StoreError::Full.is_fatal());
        assert!(StoreError::Backend("boom".to_string()).is_fatal());
    }

    #[test]
    fn test_encoding_error_display() {
        let err = EncodingError::BodyLength {
            expected: 10,
            actual: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("7"));
    }
}
