//! The inbox: a read-cursor projection over two mailboxes.
//!
//! `last_read` is what the previous step consumed; `current` is what
//! the router has delivered by now. For every sender whose pointers
//! differ, the new messages are recovered by walking the message
//! `previous` chain from the current pointer back to (but not
//! including) the last-read pointer, then reversing into chronological
//! order. Reading advances `last_read`, giving at-most-once step
//! consumption; persisting writes the advanced `last_read` mailbox.
//!
//! Signals (messages with no `previous`) terminate the walk, so a
//! reader only ever sees the latest unread signal from a sender.

// Layer 2: Third-party crate imports
use serde::de::DeserializeOwned;

// Layer 3: Internal module imports
use loam_grit::{ActorId, Mailbox, MailboxId, Message, MessageId, Object, ObjectId};

use crate::blob_object::BlobObject;
use crate::error::WitError;
use crate::handler::SharedStore;
use crate::tree_object::TreeObject;

/// A received message together with its channel coordinates.
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub sender_id: ActorId,
    pub message_id: MessageId,
    message: Message,
}

impl InboxMessage {
    /// Load a message by id, attributing it to `sender_id`.
    pub async fn load(
        loader: &SharedStore,
        sender_id: ActorId,
        message_id: MessageId,
    ) -> Result<Self, WitError> {
        let object = loader
            .load(message_id)
            .await?
            .ok_or(WitError::MissingObject(message_id))?;
        let message = object.into_message().ok_or_else(|| {
            WitError::InvalidMessage(format!("object {message_id} is not a message"))
        })?;
        Ok(Self {
            sender_id,
            message_id,
            message,
        })
    }

    pub fn previous_id(&self) -> Option<MessageId> {
        self.message.previous
    }

    pub fn content_id(&self) -> ObjectId {
        self.message.content
    }

    pub fn is_signal(&self) -> bool {
        self.message.is_signal()
    }

    /// The message-type header.
    pub fn mt(&self) -> Option<&str> {
        self.message.mt()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message
            .headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Load the message content as a raw object.
    pub async fn get_content(&self, loader: &SharedStore) -> Result<Object, WitError> {
        loader
            .load(self.message.content)
            .await?
            .ok_or(WitError::MissingObject(self.message.content))
    }

    /// Content as a blob view; fails when it is a tree.
    pub async fn get_content_as_blob(&self, loader: &SharedStore) -> Result<BlobObject, WitError> {
        BlobObject::from_blob_id(loader, self.message.content).await
    }

    /// Content as a tree view; fails when it is a blob.
    pub async fn get_content_as_tree(&self, loader: &SharedStore) -> Result<TreeObject, WitError> {
        TreeObject::from_tree_id(loader, self.message.content).await
    }

    pub async fn get_content_as_str(&self, loader: &SharedStore) -> Result<String, WitError> {
        self.get_content_as_blob(loader).await?.get_as_str()
    }

    pub async fn get_content_as_model<T: DeserializeOwned>(
        &self,
        loader: &SharedStore,
    ) -> Result<T, WitError> {
        self.get_content_as_blob(loader).await?.get_as_model()
    }
}

/// The read cursor over an actor's incoming channels.
#[derive(Debug, Clone)]
pub struct Inbox {
    last_read: Mailbox,
    current: Mailbox,
}

impl Inbox {
    pub fn new(last_read: Mailbox, current: Mailbox) -> Self {
        Self { last_read, current }
    }

    /// Rebuild the cursor from a persisted last-read mailbox.
    pub async fn from_inbox_id(
        loader: &SharedStore,
        last_read_id: MailboxId,
        current: Mailbox,
    ) -> Result<Self, WitError> {
        let object = loader
            .load(last_read_id)
            .await?
            .ok_or(WitError::MissingObject(last_read_id))?;
        let last_read = object.into_mailbox().ok_or_else(|| {
            WitError::InvalidMessage(format!("object {last_read_id} is not a mailbox"))
        })?;
        Ok(Self { last_read, current })
    }

    /// The delivered (current) mailbox.
    pub fn get_current(&self) -> Mailbox {
        self.current.clone()
    }

    /// The consumed (last-read) mailbox.
    pub fn get_last_read(&self) -> Mailbox {
        self.last_read.clone()
    }

    /// True when nothing has ever been read.
    pub fn is_empty(&self) -> bool {
        self.last_read.is_empty()
    }

    /// True when `current` has senders or pointers `last_read` lacks.
    pub fn has_unread(&self) -> bool {
        self.current
            .iter()
            .any(|(sender, message_id)| self.last_read.get(sender) != Some(message_id))
    }

    /// Mark a message as consumed without walking its chain.
    pub fn set_read_manually(&mut self, sender_id: ActorId, message_id: MessageId) {
        self.last_read.insert(sender_id, message_id);
    }

    /// Read all new messages, advancing the cursor.
    pub async fn read_new(&mut self, loader: &SharedStore) -> Result<Vec<InboxMessage>, WitError> {
        self.read_new_with_limit(loader, None).await
    }

    /// Read new messages, at most `limit` per sender (oldest first),
    /// advancing the cursor only over what was returned.
    pub async fn read_new_with_limit(
        &mut self,
        loader: &SharedStore,
        limit: Option<usize>,
    ) -> Result<Vec<InboxMessage>, WitError> {
        let mut result = Vec::new();
        let senders: Vec<(ActorId, MessageId)> =
            self.current.iter().map(|(s, m)| (*s, *m)).collect();
        for (sender_id, head_id) in senders {
            let last_read = self.last_read.get(&sender_id).copied();
            if last_read == Some(head_id) {
                continue;
            }
            // newest-first walk back to the read cursor (exclusive)
            let mut chain = Vec::new();
            let mut cursor = Some(head_id);
            while let Some(message_id) = cursor {
                if Some(message_id) == last_read {
                    break;
                }
                let message = InboxMessage::load(loader, sender_id, message_id).await?;
                cursor = message.previous_id();
                chain.push(message);
            }
            chain.reverse();
            if let Some(limit) = limit {
                chain.truncate(limit);
            }
            if let Some(consumed) = chain.last() {
                self.last_read.insert(sender_id, consumed.message_id);
            }
            result.extend(chain);
        }
        Ok(result)
    }

    /// Store the consumed mailbox and return its id.
    pub async fn persist(&self, store: &SharedStore) -> Result<MailboxId, WitError> {
        Ok(store
            .store(&Object::Mailbox(self.last_read.clone()))
            .await?)
    }
}
