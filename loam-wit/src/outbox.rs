//! The outbox: message builders that chain into per-recipient linked
//! lists on persist.

// Layer 2: Third-party crate imports
use serde::Serialize;

// Layer 3: Internal module imports
use loam_grit::{
    headers, ActorId, Headers, Mailbox, MailboxId, Message, MessageId, Object, ObjectId,
};

use crate::blob_object::BlobObject;
use crate::core::Core;
use crate::error::WitError;
use crate::handler::SharedStore;
use crate::inbox::InboxMessage;
use crate::tree_object::TreeObject;

/// Content of an outgoing message; serialized to an object id on
/// persist unless it already is one.
#[derive(Debug, Clone)]
pub enum OutboxContent {
    Id(ObjectId),
    Blob(BlobObject),
    Tree(TreeObject),
}

impl From<ObjectId> for OutboxContent {
    fn from(id: ObjectId) -> Self {
        OutboxContent::Id(id)
    }
}

impl From<BlobObject> for OutboxContent {
    fn from(blob: BlobObject) -> Self {
        OutboxContent::Blob(blob)
    }
}

impl From<TreeObject> for OutboxContent {
    fn from(tree: TreeObject) -> Self {
        OutboxContent::Tree(tree)
    }
}

impl From<&str> for OutboxContent {
    fn from(value: &str) -> Self {
        OutboxContent::Blob(BlobObject::from_str(value))
    }
}

impl From<String> for OutboxContent {
    fn from(value: String) -> Self {
        OutboxContent::Blob(BlobObject::from_str(value))
    }
}

impl OutboxContent {
    /// JSON-encode a typed record as blob content.
    pub fn from_model<T: Serialize>(value: &T) -> Result<Self, WitError> {
        Ok(OutboxContent::Blob(BlobObject::from_model(value)?))
    }

    async fn persist(self, store: &SharedStore) -> Result<ObjectId, WitError> {
        match self {
            OutboxContent::Id(id) => Ok(id),
            OutboxContent::Blob(mut blob) => blob.persist(store).await,
            OutboxContent::Tree(mut tree) => tree.persist(store).await,
        }
    }
}

/// Builder for one outgoing message.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub recipient_id: ActorId,
    /// Explicit chain override; when `None` the outbox chains to its
    /// current entry for the recipient.
    pub previous_id: Option<MessageId>,
    pub is_signal: bool,
    headers: Headers,
    content: OutboxContent,
}

impl OutboxMessage {
    pub fn new(recipient_id: ActorId, content: impl Into<OutboxContent>) -> Self {
        Self {
            recipient_id,
            previous_id: None,
            is_signal: false,
            headers: Headers::new(),
            content: content.into(),
        }
    }

    /// A queued (chained) message, optionally typed with `mt`.
    pub fn from_new(
        recipient_id: ActorId,
        content: impl Into<OutboxContent>,
        is_signal: bool,
        mt: Option<&str>,
    ) -> Self {
        let mut msg = Self::new(recipient_id, content);
        msg.is_signal = is_signal;
        if let Some(mt) = mt {
            msg.set_mt(mt);
        }
        msg
    }

    /// The genesis message for a new actor: persists `core` to learn
    /// the child's id, which doubles as the recipient.
    pub async fn from_genesis(store: &SharedStore, core: &mut Core) -> Result<Self, WitError> {
        let core_id = core.persist(store).await?;
        let mut msg = Self::new(core_id, OutboxContent::Id(core_id));
        msg.set_mt(headers::MT_GENESIS);
        Ok(msg)
    }

    /// A core-update message for an existing actor.
    pub fn from_update(recipient_id: ActorId, content: impl Into<OutboxContent>) -> Self {
        let mut msg = Self::new(recipient_id, content);
        msg.set_mt(headers::MT_UPDATE);
        msg
    }

    /// Reply to an inbound message. The inbound id is recorded in the
    /// `reply_to` header so the requester can correlate the reply;
    /// the outgoing `previous` still chains on the reply channel.
    pub fn from_reply(
        reply_to: &InboxMessage,
        content: impl Into<OutboxContent>,
        mt: Option<&str>,
    ) -> Self {
        let mut msg = Self::new(reply_to.sender_id, content);
        msg.headers
            .insert(headers::REPLY_TO.to_string(), reply_to.message_id.to_hex());
        if let Some(mt) = mt {
            msg.set_mt(mt);
        }
        msg
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn set_mt(&mut self, mt: &str) -> &mut Self {
        self.set_header(headers::MT, mt)
    }

    pub fn mt(&self) -> Option<&str> {
        self.headers.get(headers::MT).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Persist content and message as-is (no outbox chaining beyond
    /// the explicit `previous_id`); returns the message id.
    pub async fn persist(self, store: &SharedStore) -> Result<MessageId, WitError> {
        let content_id = self.content.persist(store).await?;
        let headers = if self.headers.is_empty() {
            None
        } else {
            Some(self.headers)
        };
        let previous = if self.is_signal {
            None
        } else {
            self.previous_id
        };
        let message = Message::new(previous, headers, content_id);
        Ok(store.store(&Object::Message(message)).await?)
    }

    /// Persist and return the `(sender, recipient, message)` delivery
    /// triple the runtime routes on.
    pub async fn persist_to_mailbox_update(
        self,
        store: &SharedStore,
        sender_id: ActorId,
    ) -> Result<(ActorId, ActorId, MessageId), WitError> {
        let recipient_id = self.recipient_id;
        let message_id = self.persist(store).await?;
        Ok((sender_id, recipient_id, message_id))
    }
}

/// Accumulates outgoing messages for one step.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    current: Mailbox,
    pending: Vec<OutboxMessage>,
}

impl Outbox {
    /// Continue from the previous step's outbox mailbox.
    pub fn new(current: Mailbox) -> Self {
        Self {
            current,
            pending: Vec::new(),
        }
    }

    /// Rebuild from a persisted outbox mailbox.
    pub async fn from_outbox_id(
        loader: &SharedStore,
        outbox_id: MailboxId,
    ) -> Result<Self, WitError> {
        let object = loader
            .load(outbox_id)
            .await?
            .ok_or(WitError::MissingObject(outbox_id))?;
        let current = object.into_mailbox().ok_or_else(|| {
            WitError::InvalidMessage(format!("object {outbox_id} is not a mailbox"))
        })?;
        Ok(Self::new(current))
    }

    /// Queue a message for the next persist.
    pub fn add(&mut self, message: OutboxMessage) {
        self.pending.push(message);
    }

    /// True when nothing was ever sent and nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.pending.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The outbox mailbox as of the last persist.
    pub fn get_current(&self) -> Mailbox {
        self.current.clone()
    }

    /// Serialize queued messages in order: each message's content is
    /// stored, its `previous` chained to the current entry for the
    /// recipient (unless it is a signal or carries an explicit
    /// override), and the mailbox entry advanced. Returns the id of
    /// the stored mailbox.
    pub async fn persist(&mut self, store: &SharedStore) -> Result<MailboxId, WitError> {
        for mut message in std::mem::take(&mut self.pending) {
            if !message.is_signal && message.previous_id.is_none() {
                message.previous_id = self.current.get(&message.recipient_id).copied();
            }
            let recipient_id = message.recipient_id;
            let message_id = message.persist(store).await?;
            self.current.insert(recipient_id, message_id);
        }
        Ok(store.store(&Object::Mailbox(self.current.clone())).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use loam_grit::{MemoryObjectStore, ObjectId};

    use super::*;

    fn shared_store() -> SharedStore {
        Arc::new(MemoryObjectStore::new())
    }

    fn actor(seed: &[u8]) -> ActorId {
        ObjectId::digest(seed)
    }

    async fn message_content(store: &SharedStore, message_id: MessageId) -> (Message, String) {
        let message = store
            .load(message_id)
            .await
            .unwrap()
            .unwrap()
            .into_message()
            .unwrap();
        let blob = BlobObject::from_blob_id(store, message.content)
            .await
            .unwrap();
        let text = blob.get_as_str().unwrap();
        (message, text)
    }

    #[tokio::test]
    async fn test_outbox_from_new() {
        let store = shared_store();
        let recipients = [actor(b"r1"), actor(b"r2"), actor(b"r3")];

        let mut outbox = Outbox::default();
        for recipient in &recipients {
            outbox.add(OutboxMessage::from_new(
                *recipient,
                "message 1",
                false,
                None,
            ));
        }
        let outbox_id = outbox.persist(&store).await.unwrap();

        let mailbox = store
            .load(outbox_id)
            .await
            .unwrap()
            .unwrap()
            .into_mailbox()
            .unwrap();
        assert_eq!(mailbox.len(), 3);
        for recipient in &recipients {
            let (message, text) = message_content(&store, mailbox[recipient]).await;
            assert_eq!(text, "message 1");
            assert!(message.previous.is_none());
        }
    }

    #[tokio::test]
    async fn test_outbox_chains_from_previous() {
        let store = shared_store();
        let recipients = [actor(b"r1"), actor(b"r2"), actor(b"r3")];

        let mut outbox = Outbox::default();
        for recipient in &recipients {
            outbox.add(OutboxMessage::from_new(
                *recipient,
                "message 1",
                false,
                None,
            ));
            outbox.add(OutboxMessage::from_new(
                *recipient,
                "message 2",
                false,
                None,
            ));
        }
        let first_outbox_id = outbox.persist(&store).await.unwrap();

        // a later step continues from the persisted outbox
        let mut outbox = Outbox::from_outbox_id(&store, first_outbox_id)
            .await
            .unwrap();
        outbox.add(OutboxMessage::from_new(
            recipients[0],
            "message 3",
            false,
            None,
        ));
        outbox.add(OutboxMessage::from_new(
            recipients[1],
            "message 3",
            false,
            None,
        ));
        let second_outbox_id = outbox.persist(&store).await.unwrap();

        let mailbox = store
            .load(second_outbox_id)
            .await
            .unwrap()
            .unwrap()
            .into_mailbox()
            .unwrap();
        assert_eq!(mailbox.len(), 3);

        let (m3, text) = message_content(&store, mailbox[&recipients[0]]).await;
        assert_eq!(text, "message 3");
        // message 3 chains back to message 2
        let (m2, text) = message_content(&store, m3.previous.unwrap()).await;
        assert_eq!(text, "message 2");
        let (m1, text) = message_content(&store, m2.previous.unwrap()).await;
        assert_eq!(text, "message 1");
        assert!(m1.previous.is_none());

        // recipient 3 got nothing new this step
        let (_, text) = message_content(&store, mailbox[&recipients[2]]).await;
        assert_eq!(text, "message 2");
    }

    #[tokio::test]
    async fn test_signals_do_not_chain() {
        let store = shared_store();
        let recipient = actor(b"r");

        let mut outbox = Outbox::default();
        outbox.add(OutboxMessage::from_new(
            recipient,
            "first",
            true,
            Some("ping"),
        ));
        outbox.persist(&store).await.unwrap();
        outbox.add(OutboxMessage::from_new(
            recipient,
            "second",
            true,
            Some("ping"),
        ));
        let outbox_id = outbox.persist(&store).await.unwrap();

        let mailbox = store
            .load(outbox_id)
            .await
            .unwrap()
            .unwrap()
            .into_mailbox()
            .unwrap();
        let (message, text) = message_content(&store, mailbox[&recipient]).await;
        assert_eq!(text, "second");
        assert!(message.is_signal());
        assert_eq!(message.mt(), Some("ping"));
    }

    #[tokio::test]
    async fn test_genesis_message_recipient_is_core_id() {
        let store = shared_store();
        let mut core = Core::from_external_wit_ref("noop", None).await.unwrap();
        let msg = OutboxMessage::from_genesis(&store, &mut core)
            .await
            .unwrap();
        let core_id = core.object_id().unwrap();
        assert_eq!(msg.recipient_id, core_id);
        assert_eq!(msg.mt(), Some(headers::MT_GENESIS));

        let message_id = msg.persist(&store).await.unwrap();
        let message = store
            .load(message_id)
            .await
            .unwrap()
            .unwrap()
            .into_message()
            .unwrap();
        assert_eq!(message.content, core_id);
        assert!(message.is_signal());
    }

    #[tokio::test]
    async fn test_reply_records_reply_to_header() {
        let store = shared_store();
        let sender = actor(b"requester");

        // inbound request
        let content = store
            .store(&Object::Blob(loam_grit::Blob::new("ping")))
            .await
            .unwrap();
        let request = Message::new(None, None, content);
        let request_id = store.store(&Object::Message(request)).await.unwrap();
        let inbound = InboxMessage::load(&store, sender, request_id)
            .await
            .unwrap();

        let reply = OutboxMessage::from_reply(&inbound, "pong", Some("pong"));
        assert_eq!(reply.recipient_id, sender);
        assert_eq!(
            reply.header(headers::REPLY_TO),
            Some(request_id.to_hex().as_str())
        );
        assert_eq!(reply.mt(), Some("pong"));
    }
}
