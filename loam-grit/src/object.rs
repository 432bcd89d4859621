//! The grit object model: five immutable, content-addressed variants.
//!
//! All edges in the model are object ids, so the object graph is an
//! append-only DAG. The only mutable state in the whole system is the
//! reference namespace (see [`crate::references`]).

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 3: Internal module imports
use crate::id::{ActorId, MailboxId, MessageId, ObjectId, StepId, TreeId};

/// Well-known header names and values used across the runtime.
pub mod headers {
    /// Message-type header (`genesis`, `update`, or user-defined).
    pub const MT: &str = "mt";
    /// Blob content-kind header: `b` (bytes), `s` (string), `j` (json).
    pub const CT: &str = "ct";
    /// MIME hint for a blob.
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// Hex message id this message replies to (request-response).
    pub const REPLY_TO: &str = "reply_to";

    /// `mt` value of a genesis message.
    pub const MT_GENESIS: &str = "genesis";
    /// `mt` value of a core-update message.
    pub const MT_UPDATE: &str = "update";

    /// `ct` code for raw bytes.
    pub const CT_BYTES: &str = "b";
    /// `ct` code for a UTF-8 string.
    pub const CT_STR: &str = "s";
    /// `ct` code for JSON.
    pub const CT_JSON: &str = "j";
}

/// Object headers: small string key-value pairs.
///
/// Kept in a sorted map so the canonical encoding is key-ordered and
/// independent of construction order.
pub type Headers = BTreeMap<String, String>;

/// An opaque byte payload with optional headers (MIME hints, `ct`
/// short codes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub headers: Option<Headers>,
    pub data: Vec<u8>,
}

impl Blob {
    /// A blob with no headers.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: None,
            data: data.into(),
        }
    }

    /// A blob with headers.
    pub fn with_headers(headers: Headers, data: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: Some(headers),
            data: data.into(),
        }
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }
}

/// An ordered mapping from ASCII names to object ids; the
/// directory-like structure of the model.
pub type Tree = BTreeMap<String, ObjectId>;

/// An immutable message: a content id plus a link to the previous
/// message in the same sender/recipient channel.
///
/// A message with `previous == None` is a *signal*: it may be
/// superseded by a later signal before being read. A non-null
/// `previous` makes the channel an ordered linked list the receiver
/// must not skip across.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub previous: Option<MessageId>,
    pub headers: Option<Headers>,
    pub content: ObjectId,
}

impl Message {
    pub fn new(previous: Option<MessageId>, headers: Option<Headers>, content: ObjectId) -> Self {
        Self {
            previous,
            headers,
            content,
        }
    }

    /// True when this message is a signal (no previous link).
    pub fn is_signal(&self) -> bool {
        self.previous.is_none()
    }

    /// The `mt` (message type) header, if present.
    pub fn mt(&self) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(headers::MT))
            .map(String::as_str)
    }
}

/// A mailbox maps a peer actor id to the latest-known message id
/// from (inbox) or to (outbox) that peer.
pub type Mailbox = BTreeMap<ActorId, MessageId>;

/// One advancement of one actor.
///
/// Links to the predecessor step, the consumed inbox, the produced
/// outbox, and the core the actor ran under. The per-actor step chain
/// is strictly monotone: `previous` is null only for the genesis step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub previous: Option<StepId>,
    pub actor: ActorId,
    pub inbox: Option<MailboxId>,
    pub outbox: Option<MailboxId>,
    pub core: TreeId,
}

impl Step {
    pub fn new(
        previous: Option<StepId>,
        actor: ActorId,
        inbox: Option<MailboxId>,
        outbox: Option<MailboxId>,
        core: TreeId,
    ) -> Self {
        Self {
            previous,
            actor,
            inbox,
            outbox,
            core,
        }
    }
}

/// The tag of an [`Object`] variant; also the `<type>` token of the
/// canonical encoding header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Message,
    Mailbox,
    Step,
}

impl ObjectKind {
    /// The wire token for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Message => "message",
            ObjectKind::Mailbox => "mailbox",
            ObjectKind::Step => "step",
        }
    }

    /// Parse a wire token.
    pub fn from_str_token(token: &str) -> Option<Self> {
        match token {
            "blob" => Some(ObjectKind::Blob),
            "tree" => Some(ObjectKind::Tree),
            "message" => Some(ObjectKind::Message),
            "mailbox" => Some(ObjectKind::Mailbox),
            "step" => Some(ObjectKind::Step),
            _ => None,
        }
    }
}

/// The tagged union over all five object variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Message(Message),
    Mailbox(Mailbox),
    Step(Step),
}

impl Object {
    /// The variant tag.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Message(_) => ObjectKind::Message,
            Object::Mailbox(_) => ObjectKind::Mailbox,
            Object::Step(_) => ObjectKind::Step,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Object::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Object::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Object::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mailbox(&self) -> Option<&Mailbox> {
        match self {
            Object::Mailbox(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_step(&self) -> Option<&Step> {
        match self {
            Object::Step(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_blob(self) -> Option<Blob> {
        match self {
            Object::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_tree(self) -> Option<Tree> {
        match self {
            Object::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Object::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_mailbox(self) -> Option<Mailbox> {
        match self {
            Object::Mailbox(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_step(self) -> Option<Step> {
        match self {
            Object::Step(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Blob> for Object {
    fn from(value: Blob) -> Self {
        Object::Blob(value)
    }
}

impl From<Message> for Object {
    fn from(value: Message) -> Self {
        Object::Message(value)
    }
}

impl From<Step> for Object {
    fn from(value: Step) -> Self {
        Object::Step(value)
    }
}
