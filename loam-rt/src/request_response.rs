//! Correlated request-response atop the mailbox model.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{timeout_at, Instant};

// Layer 3: Internal module imports
use loam_grit::headers;
use loam_wit::{InboxMessage, OutboxMessage, RequestResponse, SharedStore, WitError};

use crate::root::RootExecutor;

/// Sends a message as the agent and waits for the correlated reply on
/// the root executor's incoming stream.
pub struct RequestResponseExecutor {
    store: SharedStore,
    root: RootExecutor,
}

impl RequestResponseExecutor {
    pub fn new(store: SharedStore, root: RootExecutor) -> Self {
        Self { store, root }
    }
}

#[async_trait]
impl RequestResponse for RequestResponseExecutor {
    async fn request(
        &self,
        msg: OutboxMessage,
        response_types: &[String],
        timeout: Duration,
    ) -> Result<InboxMessage, WitError> {
        // subscribe before sending so the reply cannot slip past
        let mut incoming = self.root.subscribe();
        let request_id = self.root.inject_message(msg).await?;
        let request_id_hex = request_id.to_hex();
        let deadline = Instant::now() + timeout;

        loop {
            let received = match timeout_at(deadline, incoming.recv()).await {
                Err(_) => return Err(WitError::RequestTimeout(timeout)),
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => {
                    return Err(WitError::Handler("runtime stopped".to_string()))
                }
                Ok(Ok(update)) => update,
            };
            let (sender_id, _recipient_id, message_id) = received;
            let inbound = InboxMessage::load(&self.store, sender_id, message_id).await?;

            let correlated = inbound.previous_id() == Some(request_id)
                || inbound.header(headers::REPLY_TO) == Some(request_id_hex.as_str());
            if !correlated {
                // unrelated traffic stays in the stream for others
                continue;
            }
            let mt_matches = match inbound.mt() {
                Some(mt) => response_types.is_empty() || response_types.iter().any(|t| t == mt),
                None => response_types.is_empty(),
            };
            if mt_matches {
                return Ok(inbound);
            }
        }
    }
}
