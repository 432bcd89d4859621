//! Runtime-level error types.

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use loam_grit::{ActorId, StoreError};
use loam_wit::WitError;

/// The in-core module loader could not locate or materialize a module.
#[derive(Error, Debug)]
pub enum ImportError {
    /// No object at the module's path inside the tree.
    #[error("module '{0}' not found")]
    NotFound(String),

    /// The path resolved, but a module must be a blob.
    #[error("module '{0}' is not a blob")]
    NotABlob(String),

    /// The fully-qualified name does not start with a tree id, or is
    /// otherwise malformed.
    #[error("invalid module name '{0}'")]
    InvalidName(String),

    /// A namespace package has no code and therefore no functions.
    #[error("namespace package '{0}' has no code")]
    NamespacePackage(String),

    /// The code engine failed to materialize the module.
    #[error("cannot load module '{name}': {reason}")]
    Engine { name: String, reason: String },

    /// The module loaded but lacks the requested function.
    #[error("cannot find function '{function}' in module '{module}'")]
    FunctionNotFound { module: String, function: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of executors and the runtime orchestrator.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A handler failed while advancing an actor. The actor's HEAD did
    /// not move; its inbox remains unread.
    #[error("actor '{actor}' failed: {source}")]
    ActorFailed {
        actor: ActorId,
        #[source]
        source: WitError,
    },

    /// The store's root actor does not match this runtime's point.
    #[error("agent mismatch: store has '{stored}', runtime derived '{derived}'")]
    AgentMismatch { stored: ActorId, derived: ActorId },

    /// A reference the runtime relies on is missing or points nowhere.
    #[error("broken reference '{0}'")]
    BrokenReference(String),

    /// The runtime is not running (stopped or never started).
    #[error("runtime is not running")]
    NotRunning,

    #[error(transparent)]
    Wit(#[from] WitError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_import_error_display() {
        let err = ImportError::FunctionNotFound {
            module: "abc.main".to_string(),
            function: "run".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("run"));
        assert!(msg.contains("abc.main"));
    }

    #[test]
    fn test_runtime_error_wraps_wit_error() {
        let err: RuntimeError = WitError::GenesisNotReady.into();
        assert!(matches!(err, RuntimeError::Wit(WitError::GenesisNotReady)));
    }
}
