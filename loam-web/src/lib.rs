//! # loam-web - HTTP Surface over a Running Agent
//!
//! A thin axum router over [`loam_rt::Runtime`]: read references and
//! objects, list actors, inject inbox messages, run queries with tree
//! path descent, and stream routed messages over SSE.
//!
//! The core is transport-agnostic; everything here is plumbing around
//! it, and none of it is part of the wire contract.

pub mod routes;
pub mod sse;

// Layer 2: Third-party crate imports
use axum::routing::{get, post};
use axum::Router;

// Layer 3: Internal module imports
use loam_rt::Runtime;

/// Shared state of all handlers: the running agent.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Runtime,
}

/// Build the HTTP router over a running runtime.
pub fn router(runtime: Runtime) -> Router {
    Router::new()
        .route("/refs", get(routes::get_refs))
        .route("/refs/{*name}", get(routes::get_ref))
        .route("/objects/{id}", get(routes::get_object))
        .route("/actors", get(routes::get_actors))
        .route("/actors/{id}/inbox", post(routes::post_inbox))
        .route("/actors/{id}/query/{name}", get(routes::get_query))
        .route(
            "/actors/{id}/query/{name}/{*path}",
            get(routes::get_query_path),
        )
        .route("/messages-sse", get(sse::get_messages_sse))
        .with_state(AppState { runtime })
}
