//! Handler function types: the contract between the runtime's
//! executors and user-supplied wit code.
//!
//! A wit advances an actor one step: it receives the proposed inbox
//! and returns the id of the new step it persisted. A query reads an
//! actor's HEAD step and returns a tree or blob without advancing
//! anything. Both are stored as `Arc` function objects so the resolver
//! can cache and hand them out cheaply.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use loam_grit::{ActorId, AgentId, Blob, Mailbox, ObjectStore, StepId, Tree};

use crate::error::WitError;
use crate::request_response::RequestResponse;

/// Shared handle to an object store, as handlers receive it.
pub type SharedStore = Arc<dyn ObjectStore>;

/// Per-invocation input of a wit function.
#[derive(Clone)]
pub struct WitInput {
    pub actor_id: ActorId,
    pub agent_id: AgentId,
    /// `None` exactly when this is the actor's genesis step.
    pub last_step_id: Option<StepId>,
    /// The inbox the executor proposes for this step.
    pub new_inbox: Mailbox,
}

/// Collaborators injected into a wit invocation.
///
/// An explicit context struct; which collaborators a handler uses is
/// its own business, injection is not name-based.
#[derive(Clone)]
pub struct WitContext {
    pub store: SharedStore,
    /// Cooperative cancel signal; honor it at suspension points.
    pub cancel: CancellationToken,
    /// Correlated request-response, when the runtime provides it.
    pub request_response: Option<Arc<dyn RequestResponse>>,
}

impl WitContext {
    /// A context with only a store, for tests and offline tools.
    pub fn bare(store: SharedStore) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
            request_response: None,
        }
    }
}

/// The future a wit function returns: the new step id.
pub type WitFuture = BoxFuture<'static, Result<StepId, WitError>>;

/// A resolved, callable wit function.
pub type WitFn = Arc<dyn Fn(WitInput, WitContext) -> WitFuture + Send + Sync>;

/// What a query handler may return; typed records are converted to
/// JSON blobs by the query router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Tree(Tree),
    Blob(Blob),
}

/// Per-invocation input of a query function.
#[derive(Clone)]
pub struct QueryInput {
    pub actor_id: ActorId,
    pub agent_id: AgentId,
    /// The HEAD step the query runs against.
    pub step_id: StepId,
    pub query_name: String,
    /// Caller-supplied context blob (query string, JSON, ...).
    pub context: Option<Blob>,
}

/// Collaborators injected into a query invocation. Queries are
/// side-effect-free with respect to grit state; the store handle is
/// for reads.
#[derive(Clone)]
pub struct QueryContext {
    pub loader: SharedStore,
}

/// The future a query function returns.
pub type QueryFuture = BoxFuture<'static, Result<QueryResult, WitError>>;

/// A resolved, callable query function.
pub type QueryFn = Arc<dyn Fn(QueryInput, QueryContext) -> QueryFuture + Send + Sync>;
