//! # loam-wit - Ergonomic Views and Handler API over Grit
//!
//! The layer wit (handler) code is written against: typed views over
//! raw grit objects, the inbox/outbox projections, step load/persist
//! helpers, the message and query routers, state serialization, and
//! the collaborator traits the runtime implements.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use loam_wit::{OutboxMessage, Wit};
//!
//! let echo = Wit::new()
//!     .on_message("hi", |frame, msg| Box::pin(async move {
//!         let text = msg.get_content_as_str(&frame.ctx.store).await?;
//!         frame.outbox.add(OutboxMessage::from_reply(&msg, text, Some("hi-back")));
//!         Ok(())
//!     }))
//!     .into_wit_fn();
//! ```
//!
//! # Module Organization
//!
//! - [`blob_object`] / [`tree_object`] / [`core`] - mutable views with
//!   dirty tracking and post-order persistence
//! - [`inbox`] / [`outbox`] - per-sender read cursors and chained
//!   message builders
//! - [`step`] - genesis-aware step load/persist
//! - [`router`] - the [`Wit`] message router and [`QueryRouter`]
//! - [`state`] - field-wise state serialization under `state/`
//! - [`prototype`] - the factory-actor wit
//! - [`handler`] - the `WitFn`/`QueryFn` contract with the executors
//! - [`query`] / [`request_response`] - collaborator traits the
//!   runtime implements
//! - [`error`] - [`WitError`] and [`QueryError`]

pub mod blob_object;
pub mod core;
pub mod error;
pub mod handler;
pub mod inbox;
pub mod outbox;
pub mod prototype;
pub mod query;
pub mod request_response;
pub mod router;
pub mod state;
pub mod step;
pub mod tree_object;

// Re-export commonly used types
pub use self::core::{
    Core, ARGS_NODE, CODE_NODE, STATE_NODE, WIT_NODE, WIT_QUERY_NODE, WIT_UPDATE_NODE,
};
pub use blob_object::BlobObject;
pub use error::{QueryError, WitError};
pub use handler::{
    QueryContext, QueryFn, QueryFuture, QueryInput, QueryResult, SharedStore, WitContext, WitFn,
    WitFuture, WitInput,
};
pub use inbox::{Inbox, InboxMessage};
pub use outbox::{Outbox, OutboxContent, OutboxMessage};
pub use prototype::{prototype_wit, CREATED_NODE, MT_CREATE, MT_CREATED, PROTOTYPE_NODE};
pub use query::{Query, QueryExt};
pub use request_response::RequestResponse;
pub use router::{
    default_update, default_update_wit_fn, query_result_from_model, HandlerFuture, MessageHandler,
    QueryFrame, QueryHandler, QueryHandlerFuture, QueryRouter, StepFrame, Wit,
};
pub use state::{load_state, persist_state};
pub use step::{
    find_genesis_message, load_step, load_step_from_genesis_message, load_step_from_last,
    load_step_object, persist_step,
};
pub use tree_object::{TreeNode, TreeObject};
