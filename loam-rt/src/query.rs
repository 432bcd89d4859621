//! Stateless queries against an actor's HEAD step.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tracing::error;

// Layer 3: Internal module imports
use loam_grit::{ref_step_head, ActorId, AgentId, Blob, References};
use loam_wit::{
    load_step_object, Query, QueryContext, QueryError, QueryInput, QueryResult, SharedStore,
    WitError,
};

use crate::resolver::Resolver;

/// Executes `wit_query` handlers against HEAD steps. Queries never
/// advance a step and must be side-effect-free with respect to grit
/// state.
pub struct QueryExecutor {
    store: SharedStore,
    references: Arc<dyn References>,
    resolver: Arc<dyn Resolver>,
    agent_id: AgentId,
}

impl QueryExecutor {
    pub fn new(
        store: SharedStore,
        references: Arc<dyn References>,
        resolver: Arc<dyn Resolver>,
        agent_id: AgentId,
    ) -> Self {
        Self {
            store,
            references,
            resolver,
            agent_id,
        }
    }
}

#[async_trait]
impl Query for QueryExecutor {
    async fn run(
        &self,
        actor_id: ActorId,
        query_name: &str,
        context: Option<Blob>,
    ) -> Result<QueryResult, WitError> {
        // resolve and validate the HEAD step
        let head_step_id = self
            .references
            .get(&ref_step_head(actor_id))
            .await?
            .ok_or(QueryError::NoHead(actor_id))?;
        let step = load_step_object(&self.store, head_step_id)
            .await
            .map_err(|err| QueryError::BadHead(err.to_string()))?;
        if step.actor != actor_id {
            return Err(QueryError::BadHead(format!(
                "head step {head_step_id} belongs to actor '{}'",
                step.actor
            ))
            .into());
        }

        let query_fn = self
            .resolver
            .resolve_query(step.core)
            .await
            .map_err(|err| QueryError::Failed(err.to_string()))?
            .ok_or(QueryError::NoQueryFunction(actor_id))?;

        let input = QueryInput {
            actor_id,
            agent_id: self.agent_id,
            step_id: head_step_id,
            query_name: query_name.to_string(),
            context,
        };
        let qctx = QueryContext {
            loader: SharedStore::clone(&self.store),
        };
        match query_fn(input, qctx).await {
            Ok(result) => Ok(result),
            // unknown-name failures keep their identity for callers
            // that map them to "not found"
            Err(WitError::Query(err)) => Err(WitError::Query(err)),
            Err(err) => {
                error!(actor = %actor_id, query = query_name, error = %err, "query failed");
                Err(QueryError::Failed(err.to_string()).into())
            }
        }
    }
}
