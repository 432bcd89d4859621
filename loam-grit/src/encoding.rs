//! Canonical byte encoding of grit objects.
//!
//! Every object encodes as `"<type> <body-length>\x00"` followed by a
//! variant-specific body. Object identity is the SHA-256 of the full
//! encoding (header + body), so this layout is a wire-level contract:
//! two nodes exchanging objects by id must agree on every byte.
//!
//! Body layouts:
//! - blob: header lines `key\x00value\x00`, a lone `\x00`, then raw data
//! - tree: repeating `name\x00<32 id bytes>`
//! - message: 32-byte previous (all-zero = null), header block, 32-byte content
//! - mailbox: repeating `<32 key><32 value>`
//! - step: 32-byte previous, actor, inbox, outbox, core (all-zero = null
//!   where optional)
//!
//! Maps (trees, mailboxes, headers) are sorted, so the encoding is a
//! pure function of content regardless of construction order.

// Layer 3: Internal module imports
use crate::error::EncodingError;
use crate::id::{ObjectId, ID_LEN};
use crate::object::{Blob, Headers, Mailbox, Message, Object, ObjectKind, Step, Tree};

const ZERO_ID: [u8; ID_LEN] = [0u8; ID_LEN];

/// Hash raw encoded bytes into an object id.
pub fn object_id(bytes: &[u8]) -> ObjectId {
    ObjectId::digest(bytes)
}

/// The id an object would get when stored: the hash of its canonical
/// encoding.
pub fn id_of(object: &Object) -> ObjectId {
    object_id(&object_to_bytes(object))
}

/// Serialize an object to its canonical byte encoding.
pub fn object_to_bytes(object: &Object) -> Vec<u8> {
    let body = match object {
        Object::Blob(blob) => blob_body(blob),
        Object::Tree(tree) => tree_body(tree),
        Object::Message(message) => message_body(message),
        Object::Mailbox(mailbox) => mailbox_body(mailbox),
        Object::Step(step) => step_body(step),
    };
    let mut out = format!("{} {}\x00", object.kind().as_str(), body.len()).into_bytes();
    out.extend_from_slice(&body);
    out
}

/// Deserialize an object from its canonical byte encoding.
pub fn bytes_to_object(bytes: &[u8]) -> Result<Object, EncodingError> {
    let (kind, body) = split_object_header(bytes)?;
    match kind {
        ObjectKind::Blob => decode_blob(body).map(Object::Blob),
        ObjectKind::Tree => decode_tree(body).map(Object::Tree),
        ObjectKind::Message => decode_message(body).map(Object::Message),
        ObjectKind::Mailbox => decode_mailbox(body).map(Object::Mailbox),
        ObjectKind::Step => decode_step(body).map(Object::Step),
    }
}

/// Read the `<type>` tag of an encoding without decoding the body.
pub fn peek_object_kind(bytes: &[u8]) -> Result<ObjectKind, EncodingError> {
    let (kind, _) = split_object_header(bytes)?;
    Ok(kind)
}

fn split_object_header(bytes: &[u8]) -> Result<(ObjectKind, &[u8]), EncodingError> {
    let nul = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or(EncodingError::Truncated)?;
    let header = std::str::from_utf8(&bytes[..nul]).map_err(|_| EncodingError::NonUtf8)?;
    let body = &bytes[nul + 1..];
    let (type_token, len_token) = header.split_once(' ').ok_or(EncodingError::Header)?;
    let kind = ObjectKind::from_str_token(type_token)
        .ok_or_else(|| EncodingError::UnknownType(type_token.to_string()))?;
    let expected: usize = len_token.parse().map_err(|_| EncodingError::Header)?;
    if body.len() != expected {
        return Err(EncodingError::BodyLength {
            expected,
            actual: body.len(),
        });
    }
    Ok((kind, body))
}

fn write_id(out: &mut Vec<u8>, id: &ObjectId) {
    out.extend_from_slice(id.as_bytes());
}

fn write_optional_id(out: &mut Vec<u8>, id: Option<&ObjectId>) {
    match id {
        Some(id) => out.extend_from_slice(id.as_bytes()),
        None => out.extend_from_slice(&ZERO_ID),
    }
}

fn write_headers(out: &mut Vec<u8>, headers: Option<&Headers>) {
    if let Some(headers) = headers {
        for (key, value) in headers {
            out.extend_from_slice(key.as_bytes());
            out.push(0);
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }
    }
    out.push(0);
}

fn blob_body(blob: &Blob) -> Vec<u8> {
    let mut out = Vec::with_capacity(blob.data.len() + 16);
    write_headers(&mut out, blob.headers.as_ref());
    out.extend_from_slice(&blob.data);
    out
}

fn tree_body(tree: &Tree) -> Vec<u8> {
    let mut out = Vec::with_capacity(tree.len() * (ID_LEN + 8));
    for (name, id) in tree {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        write_id(&mut out, id);
    }
    out
}

fn message_body(message: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(ID_LEN * 2 + 16);
    write_optional_id(&mut out, message.previous.as_ref());
    write_headers(&mut out, message.headers.as_ref());
    write_id(&mut out, &message.content);
    out
}

fn mailbox_body(mailbox: &Mailbox) -> Vec<u8> {
    let mut out = Vec::with_capacity(mailbox.len() * ID_LEN * 2);
    for (key, value) in mailbox {
        write_id(&mut out, key);
        write_id(&mut out, value);
    }
    out
}

fn step_body(step: &Step) -> Vec<u8> {
    let mut out = Vec::with_capacity(ID_LEN * 5);
    write_optional_id(&mut out, step.previous.as_ref());
    write_id(&mut out, &step.actor);
    write_optional_id(&mut out, step.inbox.as_ref());
    write_optional_id(&mut out, step.outbox.as_ref());
    write_id(&mut out, &step.core);
    out
}

/// A cursor over a body slice for the decoders.
struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    /// Read bytes up to (not including) the next NUL and consume the NUL.
    fn read_cstr(&mut self) -> Result<&'a str, EncodingError> {
        let nul = self
            .rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(EncodingError::Truncated)?;
        let (text, rest) = self.rest.split_at(nul);
        self.rest = &rest[1..];
        std::str::from_utf8(text).map_err(|_| EncodingError::NonUtf8)
    }

    /// Read a required (non-zero) 32-byte id.
    fn read_id(&mut self) -> Result<ObjectId, EncodingError> {
        let id = self.read_raw_id()?;
        if id.is_zero() {
            return Err(EncodingError::ZeroId);
        }
        Ok(id)
    }

    /// Read a 32-byte id slot where all-zero means "absent".
    fn read_optional_id(&mut self) -> Result<Option<ObjectId>, EncodingError> {
        let id = self.read_raw_id()?;
        Ok(if id.is_zero() { None } else { Some(id) })
    }

    fn read_raw_id(&mut self) -> Result<ObjectId, EncodingError> {
        if self.rest.len() < ID_LEN {
            return Err(EncodingError::Truncated);
        }
        let (id, rest) = self.rest.split_at(ID_LEN);
        self.rest = rest;
        ObjectId::from_slice(id)
    }

    /// Read the header block: `key\x00value\x00`* terminated by a lone
    /// NUL. An empty block decodes as `None`.
    fn read_headers(&mut self) -> Result<Option<Headers>, EncodingError> {
        let mut headers = Headers::new();
        loop {
            let key = self.read_cstr()?;
            if key.is_empty() {
                break;
            }
            let value = self.read_cstr()?;
            headers.insert(key.to_string(), value.to_string());
        }
        Ok(if headers.is_empty() {
            None
        } else {
            Some(headers)
        })
    }

    fn take_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.rest)
    }
}

fn decode_blob(body: &[u8]) -> Result<Blob, EncodingError> {
    let mut reader = Reader::new(body);
    let headers = reader.read_headers()?;
    let data = reader.take_rest().to_vec();
    Ok(Blob { headers, data })
}

fn decode_tree(body: &[u8]) -> Result<Tree, EncodingError> {
    let mut reader = Reader::new(body);
    let mut tree = Tree::new();
    while !reader.is_empty() {
        let name = reader.read_cstr()?.to_string();
        let id = reader.read_id()?;
        tree.insert(name, id);
    }
    Ok(tree)
}

fn decode_message(body: &[u8]) -> Result<Message, EncodingError> {
    let mut reader = Reader::new(body);
    let previous = reader.read_optional_id()?;
    let headers = reader.read_headers()?;
    let content = reader.read_id()?;
    Ok(Message {
        previous,
        headers,
        content,
    })
}

fn decode_mailbox(body: &[u8]) -> Result<Mailbox, EncodingError> {
    let mut reader = Reader::new(body);
    let mut mailbox = Mailbox::new();
    while !reader.is_empty() {
        let key = reader.read_id()?;
        let value = reader.read_id()?;
        mailbox.insert(key, value);
    }
    Ok(mailbox)
}

fn decode_step(body: &[u8]) -> Result<Step, EncodingError> {
    let mut reader = Reader::new(body);
    let previous = reader.read_optional_id()?;
    let actor = reader.read_id()?;
    let inbox = reader.read_optional_id()?;
    let outbox = reader.read_optional_id()?;
    let core = reader.read_id()?;
    Ok(Step {
        previous,
        actor,
        inbox,
        outbox,
        core,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::object::headers;

    fn some_id(seed: &[u8]) -> ObjectId {
        ObjectId::digest(seed)
    }

    #[test]
    fn test_blob_golden_bytes() {
        let blob = Blob::new("hello");
        let bytes = object_to_bytes(&Object::Blob(blob));
        assert_eq!(bytes, b"blob 6\x00\x00hello");
    }

    #[test]
    fn test_blob_golden_bytes_with_headers() {
        let mut h = Headers::new();
        h.insert(headers::CT.to_string(), headers::CT_STR.to_string());
        let blob = Blob::with_headers(h, "hello");
        let bytes = object_to_bytes(&Object::Blob(blob));
        assert_eq!(bytes, b"blob 11\x00ct\x00s\x00\x00hello");
    }

    #[test]
    fn test_tree_golden_bytes() {
        let mut tree = Tree::new();
        let id = some_id(b"child");
        tree.insert("a".to_string(), id);
        let bytes = object_to_bytes(&Object::Tree(tree));
        let mut expected = b"tree 34\x00a\x00".to_vec();
        expected.extend_from_slice(id.as_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_headers_encode_key_sorted() {
        let mut h = Headers::new();
        h.insert("zz".to_string(), "1".to_string());
        h.insert("aa".to_string(), "2".to_string());
        let bytes = object_to_bytes(&Object::Blob(Blob::with_headers(h, "")));
        let aa = bytes.windows(2).position(|w| w == b"aa").unwrap();
        let zz = bytes.windows(2).position(|w| w == b"zz").unwrap();
        assert!(aa < zz);
    }

    #[test]
    fn test_message_round_trip() {
        let mut h = Headers::new();
        h.insert(headers::MT.to_string(), "hi".to_string());
        let message = Message::new(Some(some_id(b"prev")), Some(h), some_id(b"content"));
        let bytes = object_to_bytes(&Object::Message(message.clone()));
        let decoded = bytes_to_object(&bytes).unwrap();
        assert_eq!(decoded, Object::Message(message));
    }

    #[test]
    fn test_signal_message_round_trip() {
        let message = Message::new(None, None, some_id(b"content"));
        let bytes = object_to_bytes(&Object::Message(message.clone()));
        let decoded = bytes_to_object(&bytes).unwrap().into_message().unwrap();
        assert!(decoded.is_signal());
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_mailbox_round_trip() {
        let mut mailbox = Mailbox::new();
        mailbox.insert(some_id(b"actor-1"), some_id(b"msg-1"));
        mailbox.insert(some_id(b"actor-2"), some_id(b"msg-2"));
        let bytes = object_to_bytes(&Object::Mailbox(mailbox.clone()));
        let decoded = bytes_to_object(&bytes).unwrap();
        assert_eq!(decoded, Object::Mailbox(mailbox));
    }

    #[test]
    fn test_step_round_trip_with_nulls() {
        let step = Step::new(None, some_id(b"actor"), None, None, some_id(b"core"));
        let bytes = object_to_bytes(&Object::Step(step.clone()));
        // header + five 32-byte slots
        assert_eq!(bytes, {
            let mut v = b"step 160\x00".to_vec();
            v.extend_from_slice(&[0u8; 32]);
            v.extend_from_slice(some_id(b"actor").as_bytes());
            v.extend_from_slice(&[0u8; 32]);
            v.extend_from_slice(&[0u8; 32]);
            v.extend_from_slice(some_id(b"core").as_bytes());
            v
        });
        let decoded = bytes_to_object(&bytes).unwrap();
        assert_eq!(decoded, Object::Step(step));
    }

    #[test]
    fn test_identity_is_content_hash() {
        let a = Object::Blob(Blob::new("same"));
        let b = Object::Blob(Blob::new("same"));
        assert_eq!(id_of(&a), id_of(&b));
        assert_ne!(id_of(&a), id_of(&Object::Blob(Blob::new("other"))));
    }

    #[test]
    fn test_map_order_does_not_change_id() {
        let (x, y) = (some_id(b"x"), some_id(b"y"));
        let mut t1 = Tree::new();
        t1.insert("a".to_string(), x);
        t1.insert("b".to_string(), y);
        let mut t2 = Tree::new();
        t2.insert("b".to_string(), y);
        t2.insert("a".to_string(), x);
        assert_eq!(id_of(&Object::Tree(t1)), id_of(&Object::Tree(t2)));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(matches!(
            bytes_to_object(b"list 0\x00"),
            Err(EncodingError::UnknownType(_))
        ));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        assert!(matches!(
            bytes_to_object(b"blob 99\x00\x00hello"),
            Err(EncodingError::BodyLength { expected: 99, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_zero_content_id() {
        let mut bytes = b"message 65\x00".to_vec();
        bytes.extend_from_slice(&[0u8; 32]); // previous: null is fine
        bytes.push(0); // empty headers
        bytes.extend_from_slice(&[0u8; 32]); // content: zero is not
        assert!(matches!(
            bytes_to_object(&bytes),
            Err(EncodingError::ZeroId)
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_tree() {
        let mut bytes = b"tree 12\x00".to_vec();
        bytes.extend_from_slice(b"name\x00shortid");
        assert!(matches!(
            bytes_to_object(&bytes),
            Err(EncodingError::Truncated)
        ));
    }

    proptest! {
        #[test]
        fn prop_blob_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512),
                                ct in proptest::option::of("[a-z]{1,8}")) {
            let headers = ct.map(|c| {
                let mut h = Headers::new();
                h.insert("ct".to_string(), c);
                h
            });
            let blob = Blob { headers, data };
            let bytes = object_to_bytes(&Object::Blob(blob.clone()));
            let decoded = bytes_to_object(&bytes).unwrap();
            prop_assert_eq!(decoded, Object::Blob(blob));
        }

        #[test]
        fn prop_tree_round_trip(names in proptest::collection::btree_set("[a-zA-Z0-9_.]{1,16}", 0..16)) {
            let tree: Tree = names
                .into_iter()
                .map(|n| {
                    let id = ObjectId::digest(n.as_bytes());
                    (n, id)
                })
                .collect();
            let bytes = object_to_bytes(&Object::Tree(tree.clone()));
            let decoded = bytes_to_object(&bytes).unwrap();
            prop_assert_eq!(decoded, Object::Tree(tree));
        }
    }
}
