//! Server-sent events stream of routed messages.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::convert::Infallible;

// Layer 2: Third-party crate imports
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

// Layer 3: Internal module imports
use crate::routes::WebError;
use crate::AppState;

/// `GET /messages-sse` — stream messages actors send to the agent,
/// optionally filtered by `mt`.
pub async fn get_messages_sse(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, WebError> {
    let mt_filter = params.get("mt").cloned();
    let mut incoming = state.runtime.subscribe_to_messages().await?;
    let store = state.runtime.store();

    // a forwarding task does the async filtering; the response just
    // drains the channel
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    tokio::spawn(async move {
        loop {
            let (sender_id, recipient_id, message_id) = match incoming.recv().await {
                Ok(update) => update,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "sse subscriber lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let message = match store.load(message_id).await {
                Ok(Some(object)) => object.into_message(),
                _ => None,
            };
            let Some(message) = message else { continue };
            let mt = message.mt().map(str::to_string);
            if let Some(filter) = &mt_filter {
                if mt.as_deref() != Some(filter.as_str()) {
                    continue;
                }
            }
            let payload = json!({
                "sender": sender_id.to_hex(),
                "recipient": recipient_id.to_hex(),
                "message": message_id.to_hex(),
                "mt": mt,
            });
            let event = Event::default().event("message").data(payload.to_string());
            if tx.send(Ok(event)).await.is_err() {
                break; // client went away
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}
