//! The query collaborator: stateless reads against an actor's HEAD.
//!
//! Implemented by the runtime's query executor; declared here so wit
//! code can depend on the capability without depending on the runtime.

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

// Layer 3: Internal module imports
use loam_grit::{ActorId, Blob};

use crate::blob_object::BlobObject;
use crate::error::WitError;
use crate::handler::QueryResult;

/// Run named queries against actors.
///
/// Queries are side-effect-free with respect to grit state and never
/// advance a step.
#[async_trait]
pub trait Query: Send + Sync {
    /// Run `query_name` against the HEAD step of `actor_id`.
    async fn run(
        &self,
        actor_id: ActorId,
        query_name: &str,
        context: Option<Blob>,
    ) -> Result<QueryResult, WitError>;
}

/// Extension helpers over [`Query`] for typed contexts and results.
#[async_trait]
pub trait QueryExt: Query {
    /// Run with a string context.
    async fn run_with_str(
        &self,
        actor_id: ActorId,
        query_name: &str,
        context: &str,
    ) -> Result<QueryResult, WitError> {
        let blob = BlobObject::from_str(context).get_as_blob()?;
        self.run(actor_id, query_name, Some(blob)).await
    }

    /// Run with a typed record context (JSON-encoded).
    async fn run_with_model<C: Serialize + Sync>(
        &self,
        actor_id: ActorId,
        query_name: &str,
        context: &C,
    ) -> Result<QueryResult, WitError> {
        let blob = BlobObject::from_model(context)?.get_as_blob()?;
        self.run(actor_id, query_name, Some(blob)).await
    }

    /// Run and decode a blob result into a typed record.
    async fn run_as_model<T: DeserializeOwned>(
        &self,
        actor_id: ActorId,
        query_name: &str,
        context: Option<Blob>,
    ) -> Result<T, WitError> {
        match self.run(actor_id, query_name, context).await? {
            QueryResult::Blob(blob) => Ok(serde_json::from_slice(&blob.data)?),
            QueryResult::Tree(_) => Err(WitError::InvalidMessage(
                "query returned a tree, expected a blob".to_string(),
            )),
        }
    }
}

impl<Q: Query + ?Sized> QueryExt for Q {}
