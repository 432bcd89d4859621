//! The request-response collaborator: correlated reply wait atop the
//! mailbox model.
//!
//! Implemented by the runtime; declared here so wit code can issue
//! requests without depending on the runtime crate.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::error::WitError;
use crate::inbox::InboxMessage;
use crate::outbox::OutboxMessage;

/// Send a message and await its correlated reply.
///
/// A reply matches when its `previous` equals the sent message's id or
/// its `reply_to` header names it, and its `mt` is one of
/// `response_types`. Timeouts surface as
/// [`WitError::RequestTimeout`]; unrelated traffic is ignored and left
/// for other observers.
#[async_trait]
pub trait RequestResponse: Send + Sync {
    async fn request(
        &self,
        msg: OutboxMessage,
        response_types: &[String],
        timeout: Duration,
    ) -> Result<InboxMessage, WitError>;
}
