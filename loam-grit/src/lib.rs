//! # loam-grit - Content-Addressed Object Store
//!
//! The grit layer: a Git-like, append-only object model where every
//! object is identified by the SHA-256 of its canonical byte encoding.
//! All objects are immutable; the only mutable state is the named
//! reference namespace.
//!
//! # Object Model
//!
//! Five variants, all content-addressed ([`Object`]):
//! - [`Blob`] — headers + raw bytes
//! - [`Tree`] — ordered name → id mapping (directory-like)
//! - [`Message`] — content id + link to the previous message in the
//!   same sender/recipient channel
//! - [`Mailbox`] — peer actor id → latest known message id
//! - [`Step`] — one advancement of one actor (previous step, inbox,
//!   outbox, core)
//!
//! # Wire Contract
//!
//! The canonical encoding ([`encoding`]) is byte-exact and part of the
//! wire format: two nodes exchanging objects by id must agree on every
//! byte. See the module docs for the exact layouts.
//!
//! # Quick Start
//!
//! ```rust
//! use loam_grit::{Blob, MemoryObjectStore, Object, ObjectLoader, ObjectStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), loam_grit::StoreError> {
//! let store = MemoryObjectStore::new();
//! let id = store.store(&Object::Blob(Blob::new("hello"))).await?;
//! let loaded = store.load(id).await?;
//! assert!(loaded.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`object`] - The five object variants and well-known headers
//! - [`encoding`] - Canonical byte encoding and content hashing
//! - [`id`] - The 32-byte [`ObjectId`] newtype and aliases
//! - [`store`] - [`ObjectLoader`] / [`ObjectStore`] seams
//! - [`references`] - The mutable reference namespace
//! - [`stores`] - Memory and file back-ends
//! - [`bootstrap`] - Deterministic point → agent-id derivation

pub mod bootstrap;
pub mod encoding;
pub mod error;
pub mod id;
pub mod object;
pub mod references;
pub mod store;
pub mod stores;

// Re-export commonly used types
pub use bootstrap::{
    agent_id_from_name, agent_id_from_point, bootstrap_root_actor_bytes,
    bootstrap_root_actor_objects, bytes_to_point, point_to_bytes, Point,
};
pub use encoding::{bytes_to_object, id_of, object_id, object_to_bytes, peek_object_kind};
pub use error::{EncodingError, StoreError};
pub use id::{
    is_object_id_str, ActorId, AgentId, BlobId, MailboxId, MessageId, ObjectId, StepId, TreeId,
    ID_LEN, ID_STR_LEN,
};
pub use object::{headers, Blob, Headers, Mailbox, Message, Object, ObjectKind, Step, Tree};
pub use references::{
    ref_actor_name, ref_prototype_name, ref_root_actor, ref_step_head, References,
    ReservedNameError, REF_HEADS_PREFIX, RESERVED_ACTOR_NAME,
};
pub use store::{ObjectLoader, ObjectStore};
pub use stores::{FileObjectStore, FileReferences, MemoryObjectStore, MemoryReferences};
