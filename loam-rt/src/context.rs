//! Shared execution context for all executors of one runtime.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use loam_grit::{agent_id_from_point, AgentId, Point, References};
use loam_wit::{RequestResponse, SharedStore, WitContext};

use crate::resolver::Resolver;

/// Everything an executor needs that is shared runtime-wide: the
/// store, the reference namespace, the resolver, the agent identity,
/// and the optional concurrency gate for handler execution.
pub struct ExecutionContext {
    pub store: SharedStore,
    pub references: Arc<dyn References>,
    pub resolver: Arc<dyn Resolver>,
    pub agent_id: AgentId,
    pub point: Point,
    /// Caps concurrently running wit handlers when set.
    pub wit_semaphore: Option<Arc<Semaphore>>,
    /// Installed once the root executor exists; handed to handlers.
    request_response: RwLock<Option<Arc<dyn RequestResponse>>>,
}

impl ExecutionContext {
    pub fn new(
        store: SharedStore,
        references: Arc<dyn References>,
        resolver: Arc<dyn Resolver>,
        point: Point,
        wit_concurrency: Option<usize>,
    ) -> Self {
        Self {
            store,
            references,
            resolver,
            agent_id: agent_id_from_point(point),
            point,
            wit_semaphore: wit_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            request_response: RwLock::new(None),
        }
    }

    /// Install the request-response collaborator (done by the runtime
    /// once the root executor is up).
    pub fn set_request_response(&self, request_response: Arc<dyn RequestResponse>) {
        *self.request_response.write() = Some(request_response);
    }

    /// Build the context handed to one wit invocation.
    pub fn wit_context(&self, cancel: CancellationToken) -> WitContext {
        WitContext {
            store: SharedStore::clone(&self.store),
            cancel,
            request_response: self.request_response.read().clone(),
        }
    }
}
