//! Error kinds surfaced to and by wit handlers.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use loam_grit::{ActorId, ObjectId, StoreError};

/// Failures of the stateless query path.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query name is not registered on the actor.
    #[error("unknown query '{0}'")]
    UnknownQuery(String),

    /// The actor has no HEAD step yet (genesis not completed).
    #[error("actor '{0}' has no head step")]
    NoHead(ActorId),

    /// The HEAD reference points at a missing or malformed step.
    #[error("bad head step: {0}")]
    BadHead(String),

    /// The actor's core has no `wit_query` node.
    #[error("actor '{0}' has no query function")]
    NoQueryFunction(loam_grit::ActorId),

    /// The query handler itself failed.
    #[error("query failed: {0}")]
    Failed(String),
}

impl QueryError {
    /// True when the failure should surface as "not found" rather than
    /// an internal error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::UnknownQuery(_) | QueryError::NoHead(_))
    }
}

/// Errors raised while loading, running, or persisting a wit step.
#[derive(Error, Debug)]
pub enum WitError {
    /// A core is missing a required node, the `wit` blob is empty, or
    /// a node is the wrong object variant.
    #[error("invalid core: {0}")]
    InvalidCore(String),

    /// A message's `mt` or content does not match what the handler
    /// declared.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An update step did not contain exactly one update message, or
    /// its content was not a tree.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// The actor's genesis message is not yet in its inbox. Transient;
    /// the executor re-sleeps and retries.
    #[error("genesis message not ready")]
    GenesisNotReady,

    /// An id that must resolve did not.
    #[error("missing object {0}")]
    MissingObject(ObjectId),

    /// No reply arrived within the request-response window.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// Handler-defined failure.
    #[error("handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WitError {
    /// Transient errors are recovered locally by the executor; all
    /// others are logged and re-raised to the runtime.
    pub fn is_transient(&self) -> bool {
        match self {
            WitError::GenesisNotReady => true,
            WitError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WitError::GenesisNotReady.is_transient());
        assert!(WitError::Store(StoreError::Full).is_transient());
        assert!(!WitError::InvalidCore("no wit".to_string()).is_transient());
    }

    #[test]
    fn test_query_error_not_found() {
        assert!(QueryError::UnknownQuery("q".to_string()).is_not_found());
        assert!(!QueryError::Failed("boom".to_string()).is_not_found());
    }
}
