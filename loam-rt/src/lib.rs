//! # loam-rt - The Actor Runtime
//!
//! Deterministically advances each actor through a chain of
//! hash-linked steps: executors consume inbox messages, run the wit
//! resolved from the actor's core, persist the new step, and hand the
//! outbox delta to the runtime router, which fans it out to recipient
//! inboxes (spawning genesis executors for actors that do not exist
//! yet).
//!
//! # Architecture
//!
//! ```text
//! external injection
//!        ↓
//!   RootExecutor outbox ──► Runtime router ──► ActorExecutor inbox
//!        ▲                                          │ wit runs,
//!        │                                          │ new step
//!        └───────── outbox delta callback ◄─────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`executor`] - the per-actor step loop
//! - [`root`] - the root executor and agent bootstrap
//! - [`runtime`] - executor ownership, routing, recovery
//! - [`resolver`] - `wit`/`wit_query`/`wit_update` node resolution
//! - [`loader`] - the in-core module loader and code-engine seam
//! - [`query`] - stateless HEAD-step queries
//! - [`request_response`] - correlated reply wait
//! - [`context`] - the shared [`ExecutionContext`]
//! - [`error`] - [`RuntimeError`] and [`ImportError`]

pub mod context;
pub mod error;
pub mod executor;
pub mod loader;
pub mod query;
pub mod request_response;
pub mod resolver;
pub mod root;
pub mod runtime;

// Re-export commonly used types
pub use context::ExecutionContext;
pub use error::{ImportError, RuntimeError};
pub use executor::{ActorExecutor, MailboxUpdate, MailboxUpdateSender};
pub use loader::{
    CodeEngine, CoreLoader, LoadedModule, ModuleFunctions, NativeCodeEngine, NativeModuleRegistry,
    INIT_NAMES, MODULE_EXT,
};
pub use query::QueryExecutor;
pub use request_response::RequestResponseExecutor;
pub use resolver::{
    CoreNode, CoreResolver, ExternalResolver, HandlerRegistry, MetaResolver, RegisteredHandler,
    Resolver,
};
pub use root::{create_or_load_root_actor, RootExecutor};
pub use runtime::Runtime;
