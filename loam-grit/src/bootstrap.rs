//! Deterministic root-actor bootstrap.
//!
//! An agent's identity is reproducible without coordination: a small
//! integer [`Point`] deterministically produces the root actor's
//! genesis core, and the core's tree id *is* the agent id. Any node
//! can therefore derive an agent id offline and later exchange objects
//! by id.
//!
//! The legacy name-based derivation is kept for compatibility with
//! stores bootstrapped before points existed.

// Layer 1: Standard library imports
use std::collections::BTreeMap;

// Layer 3: Internal module imports
use crate::encoding::{id_of, object_to_bytes};
use crate::error::EncodingError;
use crate::id::{AgentId, ObjectId};
use crate::object::{headers, Blob, Headers, Mailbox, Message, Object, Step, Tree};

/// A 64-bit non-negative integer that seeds an agent identity.
pub type Point = u64;

/// Encode a point as 8 big-endian bytes (the body of the root core's
/// `point` blob).
pub fn point_to_bytes(point: Point) -> [u8; 8] {
    point.to_be_bytes()
}

/// Decode a point from its 8-byte big-endian form.
pub fn bytes_to_point(bytes: &[u8]) -> Result<Point, EncodingError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| EncodingError::IdLength(bytes.len()))?;
    Ok(Point::from_be_bytes(arr))
}

/// All grit objects of the genesis sequence for a root actor, in
/// store order: point blob, root core, genesis message, genesis inbox,
/// genesis step.
///
/// The genesis step satisfies the genesis invariant: its inbox holds
/// exactly one message whose content is the actor's own core (the
/// actor bootstraps itself).
pub fn bootstrap_root_actor_objects(point: Point) -> Vec<Object> {
    let point_blob = Blob::new(point_to_bytes(point).to_vec());
    let point_blob_id = id_of(&Object::Blob(point_blob.clone()));

    let mut core = Tree::new();
    core.insert("point".to_string(), point_blob_id);
    let core_id = id_of(&Object::Tree(core.clone()));
    let agent_id = core_id; // the agent id is the core id

    let mut msg_headers = Headers::new();
    msg_headers.insert(headers::MT.to_string(), headers::MT_GENESIS.to_string());
    let genesis_msg = Message::new(None, Some(msg_headers), core_id);
    let genesis_msg_id = id_of(&Object::Message(genesis_msg.clone()));

    let mut inbox = Mailbox::new();
    inbox.insert(agent_id, genesis_msg_id);
    let inbox_id = id_of(&Object::Mailbox(inbox.clone()));

    let genesis_step = Step::new(None, agent_id, Some(inbox_id), None, core_id);

    vec![
        Object::Blob(point_blob),
        Object::Tree(core),
        Object::Message(genesis_msg),
        Object::Mailbox(inbox),
        Object::Step(genesis_step),
    ]
}

/// The genesis sequence as `(id, encoded bytes)` pairs, for callers
/// that write raw bytes (sync tooling, remote stores).
pub fn bootstrap_root_actor_bytes(point: Point) -> Vec<(ObjectId, Vec<u8>)> {
    bootstrap_root_actor_objects(point)
        .into_iter()
        .map(|object| {
            let bytes = object_to_bytes(&object);
            (ObjectId::digest(&bytes), bytes)
        })
        .collect()
}

/// Derive an agent id from a point without storing anything.
pub fn agent_id_from_point(point: Point) -> AgentId {
    let point_blob_id = id_of(&Object::Blob(Blob::new(point_to_bytes(point).to_vec())));
    let mut core = Tree::new();
    core.insert("point".to_string(), point_blob_id);
    id_of(&Object::Tree(core))
}

/// Legacy derivation: agent id from an agent name.
///
/// Builds `Blob({"ct": "s"}, name)` and the core `{"name": <blob id>}`;
/// the core's id is the agent id.
pub fn agent_id_from_name(name: &str) -> AgentId {
    let mut blob_headers = BTreeMap::new();
    blob_headers.insert(headers::CT.to_string(), headers::CT_STR.to_string());
    let name_blob_id = id_of(&Object::Blob(Blob::with_headers(blob_headers, name)));
    let mut core = Tree::new();
    core.insert("name".to_string(), name_blob_id);
    id_of(&Object::Tree(core))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_point_bytes_round_trip() {
        assert_eq!(point_to_bytes(0), [0u8; 8]);
        assert_eq!(bytes_to_point(&point_to_bytes(7)).unwrap(), 7);
        assert_eq!(bytes_to_point(&point_to_bytes(u64::MAX)).unwrap(), u64::MAX);
        assert!(bytes_to_point(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_agent_id_is_deterministic() {
        assert_eq!(agent_id_from_point(42), agent_id_from_point(42));
        assert_ne!(agent_id_from_point(42), agent_id_from_point(43));
        assert_eq!(agent_id_from_name("ada"), agent_id_from_name("ada"));
        assert_ne!(agent_id_from_name("ada"), agent_id_from_point(0));
    }

    #[test]
    fn test_bootstrap_sequence_shape() {
        let objects = bootstrap_root_actor_objects(7);
        assert_eq!(objects.len(), 5);

        let agent_id = agent_id_from_point(7);
        let core_id = id_of(&objects[1]);
        assert_eq!(core_id, agent_id);

        let msg = objects[2].as_message().unwrap();
        assert!(msg.is_signal());
        assert_eq!(msg.mt(), Some(headers::MT_GENESIS));
        assert_eq!(msg.content, agent_id);

        let inbox = objects[3].as_mailbox().unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox.get(&agent_id), Some(&id_of(&objects[2])));

        let step = objects[4].as_step().unwrap();
        assert_eq!(step.previous, None);
        assert_eq!(step.actor, agent_id);
        assert_eq!(step.core, agent_id);
        assert_eq!(step.outbox, None);
        assert_eq!(step.inbox, Some(id_of(&objects[3])));
    }

    #[test]
    fn test_bootstrap_bytes_match_objects() {
        let objects = bootstrap_root_actor_objects(3);
        let pairs = bootstrap_root_actor_bytes(3);
        assert_eq!(objects.len(), pairs.len());
        for (object, (id, bytes)) in objects.iter().zip(&pairs) {
            assert_eq!(*id, id_of(object));
            assert_eq!(*bytes, object_to_bytes(object));
        }
    }
}
