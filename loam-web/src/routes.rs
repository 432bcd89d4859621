//! HTTP handlers for references, objects, actors, and queries.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

// Layer 3: Internal module imports
use loam_grit::{headers, Blob, Mailbox, Message, Object, ObjectId, Step, Tree, REF_HEADS_PREFIX};
use loam_wit::{OutboxMessage, QueryError, QueryResult, WitError};

use crate::AppState;

/// Error envelope: invalid ids are 400, unknown things are 404,
/// handler failures are 500.
pub struct WebError {
    status: StatusCode,
    message: String,
}

impl WebError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<WitError> for WebError {
    fn from(err: WitError) -> Self {
        match &err {
            WitError::Query(query_err) if query_err.is_not_found() => {
                WebError::not_found(err.to_string())
            }
            WitError::MissingObject(_) => WebError::not_found(err.to_string()),
            _ => {
                warn!(error = %err, "handler failed");
                WebError::internal(err.to_string())
            }
        }
    }
}

impl From<loam_grit::StoreError> for WebError {
    fn from(err: loam_grit::StoreError) -> Self {
        WebError::internal(err.to_string())
    }
}

impl From<loam_rt::RuntimeError> for WebError {
    fn from(err: loam_rt::RuntimeError) -> Self {
        match err {
            loam_rt::RuntimeError::Wit(wit) => wit.into(),
            other => WebError::internal(other.to_string()),
        }
    }
}

fn parse_id(hex: &str) -> Result<ObjectId, WebError> {
    hex.parse()
        .map_err(|_| WebError::bad_request(format!("invalid id '{hex}'")))
}

/// `GET /refs` — the whole reference namespace.
pub async fn get_refs(State(state): State<AppState>) -> Result<Json<Value>, WebError> {
    let refs = state.runtime.references().get_all().await?;
    let map: serde_json::Map<String, Value> = refs
        .into_iter()
        .map(|(name, id)| (name, Value::String(id.to_hex())))
        .collect();
    Ok(Json(Value::Object(map)))
}

/// `GET /refs/<name>` — one reference.
pub async fn get_ref(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, WebError> {
    let id = state
        .runtime
        .references()
        .get(&name)
        .await?
        .ok_or_else(|| WebError::not_found(format!("no reference '{name}'")))?;
    Ok(Json(json!({ "name": name, "id": id.to_hex() })))
}

/// `GET /objects/<hex>` — a blob as raw bytes with its content type;
/// any other variant rendered as JSON.
pub async fn get_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, WebError> {
    let id = parse_id(&id)?;
    let object = state
        .runtime
        .store()
        .load(id)
        .await?
        .ok_or_else(|| WebError::not_found(format!("no object {id}")))?;
    match object {
        Object::Blob(blob) => Ok(blob_response(blob)),
        other => Ok(Json(object_to_json(&other)).into_response()),
    }
}

/// `GET /actors` — actor ids with their HEAD steps.
pub async fn get_actors(State(state): State<AppState>) -> Result<Json<Value>, WebError> {
    let heads = state
        .runtime
        .references()
        .get_with_prefix(REF_HEADS_PREFIX)
        .await?;
    let actors: Vec<Value> = heads
        .into_iter()
        .map(|(name, step_id)| {
            let actor = name.trim_start_matches(REF_HEADS_PREFIX).to_string();
            json!({ "actor": actor, "head": step_id.to_hex() })
        })
        .collect();
    Ok(Json(Value::Array(actors)))
}

/// `POST /actors/<id>/inbox` — the body becomes a new message to the
/// actor. Query parameters: `mt` (message type) and `is_signal`.
pub async fn post_inbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<Value>, WebError> {
    let actor_id = parse_id(&id)?;
    let is_signal = params
        .get("is_signal")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let mt = params.get("mt").map(String::as_str);

    let content = loam_wit::BlobObject::from_bytes(body.to_vec());
    let msg = OutboxMessage::from_new(actor_id, content, is_signal, mt);
    let message_id = state.runtime.inject_message(msg).await?;
    Ok(Json(json!({ "message": message_id.to_hex() })))
}

/// `GET /actors/<id>/query/<name>` — run `wit_query`; trees render as
/// JSON, blobs with their content type. The query string becomes the
/// context blob.
pub async fn get_query(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, WebError> {
    let actor_id = parse_id(&id)?;
    let result = run_query(&state, actor_id, &name, raw_query).await?;
    match result {
        QueryResult::Tree(tree) => Ok(Json(tree_to_json(&tree)).into_response()),
        QueryResult::Blob(blob) => Ok(blob_response(blob)),
    }
}

/// `GET /actors/<id>/query/<name>/<path>` — run the query and descend
/// the returned tree along `path`.
pub async fn get_query_path(
    State(state): State<AppState>,
    Path((id, name, path)): Path<(String, String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, WebError> {
    let actor_id = parse_id(&id)?;
    let result = run_query(&state, actor_id, &name, raw_query).await?;
    let QueryResult::Tree(tree) = result else {
        return Err(WebError::bad_request(
            "query returned a blob; there is nothing to descend",
        ));
    };

    let store = state.runtime.store();
    let mut current = tree;
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    for (index, part) in parts.iter().enumerate() {
        let child_id = current
            .get(*part)
            .copied()
            .ok_or_else(|| WebError::not_found(format!("no '{part}' under the query result")))?;
        let object = store
            .load(child_id)
            .await?
            .ok_or_else(|| WebError::not_found(format!("no object {child_id}")))?;
        match object {
            Object::Tree(child) => current = child,
            Object::Blob(blob) if index == parts.len() - 1 => {
                return Ok(blob_response(blob));
            }
            Object::Blob(_) => {
                return Err(WebError::not_found(format!(
                    "'{part}' is a blob in the middle of the path"
                )))
            }
            _ => {
                return Err(WebError::internal(
                    "query result references a non-core object",
                ))
            }
        }
    }
    Ok(Json(tree_to_json(&current)).into_response())
}

async fn run_query(
    state: &AppState,
    actor_id: ObjectId,
    name: &str,
    raw_query: Option<String>,
) -> Result<QueryResult, WebError> {
    let context = raw_query
        .filter(|q| !q.is_empty())
        .map(|q| Blob::new(q.into_bytes()));
    let result = state
        .runtime
        .query_executor()
        .run(actor_id, name, context)
        .await;
    match result {
        Ok(result) => Ok(result),
        Err(WitError::Query(QueryError::NoHead(_))) => Err(WebError::not_found(format!(
            "actor '{actor_id}' has no head step"
        ))),
        Err(err) => Err(err.into()),
    }
}

fn blob_response(blob: Blob) -> Response {
    let content_type = blob
        .header(headers::CONTENT_TYPE)
        .map(str::to_string)
        .or_else(|| match blob.header(headers::CT) {
            Some("s") => Some("text/plain; charset=utf-8".to_string()),
            Some("j") => Some("application/json".to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());
    ([(header::CONTENT_TYPE, content_type)], blob.data).into_response()
}

fn tree_to_json(tree: &Tree) -> Value {
    let map: serde_json::Map<String, Value> = tree
        .iter()
        .map(|(name, id)| (name.clone(), Value::String(id.to_hex())))
        .collect();
    Value::Object(map)
}

fn mailbox_to_json(mailbox: &Mailbox) -> Value {
    let map: serde_json::Map<String, Value> = mailbox
        .iter()
        .map(|(actor, message)| (actor.to_hex(), Value::String(message.to_hex())))
        .collect();
    Value::Object(map)
}

fn message_to_json(message: &Message) -> Value {
    json!({
        "previous": message.previous.map(|id| id.to_hex()),
        "headers": message.headers,
        "content": message.content.to_hex(),
    })
}

fn step_to_json(step: &Step) -> Value {
    json!({
        "previous": step.previous.map(|id| id.to_hex()),
        "actor": step.actor.to_hex(),
        "inbox": step.inbox.map(|id| id.to_hex()),
        "outbox": step.outbox.map(|id| id.to_hex()),
        "core": step.core.to_hex(),
    })
}

/// JSON rendering for non-blob objects.
pub fn object_to_json(object: &Object) -> Value {
    match object {
        Object::Blob(blob) => json!({
            "kind": "blob",
            "headers": blob.headers,
            "size": blob.data.len(),
        }),
        Object::Tree(tree) => json!({ "kind": "tree", "entries": tree_to_json(tree) }),
        Object::Mailbox(mailbox) => {
            json!({ "kind": "mailbox", "entries": mailbox_to_json(mailbox) })
        }
        Object::Message(message) => {
            json!({ "kind": "message", "message": message_to_json(message) })
        }
        Object::Step(step) => json!({ "kind": "step", "step": step_to_json(step) }),
    }
}
