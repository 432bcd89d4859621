//! Message and query routers.
//!
//! A [`Wit`] owns a map from message type (`mt`) to handler, plus
//! dedicated genesis/update/fallback slots, and drives one full step:
//! load state, read new messages, dispatch each, persist the new step.
//! Handlers receive an explicit [`StepFrame`] context struct; there is
//! no reflection-based injection. Frames move through handlers by
//! value (frame in, frame out), which keeps handler futures free of
//! borrows.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use serde::Serialize;

// Layer 3: Internal module imports
use loam_grit::{headers, ActorId, AgentId, Blob, StepId};

use crate::blob_object::BlobObject;
use crate::core::Core;
use crate::error::{QueryError, WitError};
use crate::handler::{
    QueryContext, QueryFn, QueryInput, QueryResult, SharedStore, WitContext, WitFn, WitInput,
};
use crate::inbox::{Inbox, InboxMessage};
use crate::outbox::Outbox;
use crate::step::{load_step, load_step_object, persist_step};

/// Everything a message handler may touch while advancing a step.
pub struct StepFrame {
    pub actor_id: ActorId,
    pub agent_id: AgentId,
    pub last_step_id: Option<StepId>,
    pub inbox: Inbox,
    pub outbox: Outbox,
    pub core: Core,
    pub ctx: WitContext,
}

/// Future returned by a message handler: the frame it was given,
/// mutated.
pub type HandlerFuture = BoxFuture<'static, Result<StepFrame, WitError>>;

/// A registered message handler.
pub type MessageHandler = Box<dyn Fn(StepFrame, InboxMessage) -> HandlerFuture + Send + Sync>;

/// The wit message router.
///
/// ```ignore
/// let wit = Wit::new()
///     .on_message("hi", |mut frame, msg| Box::pin(async move {
///         let text = msg.get_content_as_str(&frame.ctx.store).await?;
///         frame.outbox.add(OutboxMessage::from_reply(&msg, text, Some("hi-back")));
///         Ok(frame)
///     }))
///     .into_wit_fn();
/// ```
pub struct Wit {
    genesis: Option<MessageHandler>,
    update: Option<MessageHandler>,
    handlers: HashMap<String, MessageHandler>,
    fallback: Option<MessageHandler>,
    fail_on_unhandled: bool,
}

impl Default for Wit {
    fn default() -> Self {
        Self::new()
    }
}

impl Wit {
    pub fn new() -> Self {
        Self {
            genesis: None,
            update: None,
            handlers: HashMap::new(),
            fallback: None,
            fail_on_unhandled: false,
        }
    }

    /// Handler for the genesis message. Without one, genesis just
    /// materializes the core out of the message content.
    pub fn on_genesis<F>(mut self, handler: F) -> Self
    where
        F: Fn(StepFrame, InboxMessage) -> HandlerFuture + Send + Sync + 'static,
    {
        self.genesis = Some(Box::new(handler));
        self
    }

    /// Handler for `mt = "update"` messages. Without one, the default
    /// merge-update applies (update core merged over the current one).
    pub fn on_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(StepFrame, InboxMessage) -> HandlerFuture + Send + Sync + 'static,
    {
        self.update = Some(Box::new(handler));
        self
    }

    /// Handler for a named message type.
    pub fn on_message<F>(mut self, mt: &str, handler: F) -> Self
    where
        F: Fn(StepFrame, InboxMessage) -> HandlerFuture + Send + Sync + 'static,
    {
        self.handlers.insert(mt.to_string(), Box::new(handler));
        self
    }

    /// Handler for anything no named handler matched.
    pub fn on_fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(StepFrame, InboxMessage) -> HandlerFuture + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Fail the step on unhandled message types instead of skipping
    /// them.
    pub fn fail_on_unhandled(mut self, fail: bool) -> Self {
        self.fail_on_unhandled = fail;
        self
    }

    /// Drive one step: load state, read new messages, dispatch,
    /// persist. Returns the new step id.
    pub async fn run(&self, input: WitInput, ctx: WitContext) -> Result<StepId, WitError> {
        let store = ctx.store.clone();
        let (mut inbox, outbox, core) = load_step(
            &store,
            input.actor_id,
            input.last_step_id,
            Some(input.new_inbox.clone()),
        )
        .await?;
        let messages = inbox.read_new(&store).await?;

        let mut frame = StepFrame {
            actor_id: input.actor_id,
            agent_id: input.agent_id,
            last_step_id: input.last_step_id,
            inbox,
            outbox,
            core,
            ctx,
        };

        for message in messages {
            frame = self.dispatch(frame, message).await?;
        }

        let StepFrame {
            inbox,
            mut outbox,
            mut core,
            ..
        } = frame;
        persist_step(
            &store,
            input.actor_id,
            input.last_step_id,
            &inbox,
            &mut outbox,
            &mut core,
        )
        .await
    }

    async fn dispatch(
        &self,
        frame: StepFrame,
        message: InboxMessage,
    ) -> Result<StepFrame, WitError> {
        let mt = message.mt().map(str::to_string);
        match mt.as_deref() {
            Some(headers::MT_GENESIS) => match &self.genesis {
                Some(handler) => handler(frame, message).await,
                None => Ok(frame),
            },
            Some(headers::MT_UPDATE) => match &self.update {
                Some(handler) => handler(frame, message).await,
                None => {
                    let mut frame = frame;
                    default_update(&mut frame, message).await?;
                    Ok(frame)
                }
            },
            Some(other) if self.handlers.contains_key(other) => {
                let handler = &self.handlers[other];
                handler(frame, message).await
            }
            _ => match &self.fallback {
                Some(handler) => handler(frame, message).await,
                None if self.fail_on_unhandled => Err(WitError::InvalidMessage(format!(
                    "no handler for message type {mt:?}"
                ))),
                None => Ok(frame),
            },
        }
    }

    /// Adapt this router to the executor's wit function type.
    pub fn into_wit_fn(self) -> WitFn {
        let wit = Arc::new(self);
        Arc::new(move |input: WitInput, ctx: WitContext| {
            let wit = Arc::clone(&wit);
            Box::pin(async move { wit.run(input, ctx).await })
        })
    }
}

/// The default update behavior: the update message carries a core
/// tree which is merged over the current core; the next step runs
/// under the merged core.
pub async fn default_update(frame: &mut StepFrame, message: InboxMessage) -> Result<(), WitError> {
    if message.mt() != Some(headers::MT_UPDATE) {
        return Err(WitError::InvalidUpdate(format!(
            "expected an update message, got mt {:?}",
            message.mt()
        )));
    }
    let update_core = message
        .get_content_as_tree(&frame.ctx.store)
        .await
        .map_err(|_| WitError::InvalidUpdate("update message content is not a tree".to_string()))?;
    frame.core.merge(update_core).await
}

/// A wit that only understands update messages, used when a core has
/// no `wit_update` of its own. Anything else in the restricted inbox
/// makes the update invalid.
pub fn default_update_wit_fn() -> WitFn {
    Wit::new()
        .on_fallback(|_frame, msg| {
            Box::pin(async move {
                Err(WitError::InvalidUpdate(format!(
                    "expected exactly one update message, also got mt {:?}",
                    msg.mt()
                )))
            })
        })
        .into_wit_fn()
}

/// Read-only context handed to query handlers.
pub struct QueryFrame {
    pub actor_id: ActorId,
    pub agent_id: AgentId,
    pub step_id: StepId,
    pub name: String,
    pub context: Option<Blob>,
    pub core: Core,
    pub loader: SharedStore,
}

impl QueryFrame {
    /// The context blob parsed as a string.
    pub fn context_str(&self) -> Option<String> {
        self.context
            .as_ref()
            .and_then(|blob| String::from_utf8(blob.data.clone()).ok())
    }
}

/// Future returned by a query handler.
pub type QueryHandlerFuture = BoxFuture<'static, Result<QueryResult, WitError>>;

/// A registered query handler.
pub type QueryHandler = Box<dyn Fn(QueryFrame) -> QueryHandlerFuture + Send + Sync>;

/// Routes query names to handlers over an actor's HEAD step.
#[derive(Default)]
pub struct QueryRouter {
    handlers: HashMap<String, QueryHandler>,
}

impl QueryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_query<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(QueryFrame) -> QueryHandlerFuture + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
        self
    }

    /// Run a named query against the given HEAD step.
    pub async fn run(
        &self,
        input: QueryInput,
        qctx: QueryContext,
    ) -> Result<QueryResult, WitError> {
        let handler = self
            .handlers
            .get(&input.query_name)
            .ok_or_else(|| QueryError::UnknownQuery(input.query_name.clone()))?;

        let step = load_step_object(&qctx.loader, input.step_id).await?;
        let core = Core::from_core_id(&qctx.loader, step.core).await?;
        let frame = QueryFrame {
            actor_id: input.actor_id,
            agent_id: input.agent_id,
            step_id: input.step_id,
            name: input.query_name,
            context: input.context,
            core,
            loader: qctx.loader,
        };
        handler(frame).await
    }

    /// Adapt this router to the executor's query function type.
    pub fn into_query_fn(self) -> QueryFn {
        let router = Arc::new(self);
        Arc::new(move |input: QueryInput, qctx: QueryContext| {
            let router = Arc::clone(&router);
            Box::pin(async move { router.run(input, qctx).await })
        })
    }
}

/// Convert a typed record to a JSON blob query result.
pub fn query_result_from_model<T: Serialize>(value: &T) -> Result<QueryResult, WitError> {
    let blob = BlobObject::from_model(value)?;
    Ok(QueryResult::Blob(blob.get_as_blob()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use loam_grit::{Mailbox, MemoryObjectStore, Object, ObjectId, Tree};

    use super::*;
    use crate::handler::SharedStore;
    use crate::outbox::OutboxMessage;

    fn shared_store() -> SharedStore {
        Arc::new(MemoryObjectStore::new())
    }

    /// Stand up an actor with a persisted genesis step and return
    /// (actor_id, genesis_step_id, sender_id).
    async fn spawn_actor(store: &SharedStore, wit: &Wit) -> (ObjectId, StepId, ObjectId) {
        let sender = ObjectId::digest(b"creator");
        let mut core = Core::from_external_wit_ref("test", None).await.unwrap();
        let genesis = OutboxMessage::from_genesis(store, &mut core).await.unwrap();
        let actor_id = genesis.recipient_id;
        let genesis_id = genesis.persist(store).await.unwrap();

        let mut delivered = Mailbox::new();
        delivered.insert(sender, genesis_id);
        let input = WitInput {
            actor_id,
            agent_id: sender,
            last_step_id: None,
            new_inbox: delivered,
        };
        let step_id = wit
            .run(input, WitContext::bare(SharedStore::clone(store)))
            .await
            .unwrap();
        (actor_id, step_id, sender)
    }

    async fn deliver(
        store: &SharedStore,
        wit: &Wit,
        actor_id: ObjectId,
        agent_id: ObjectId,
        last_step_id: StepId,
        new_inbox: Mailbox,
    ) -> StepId {
        let input = WitInput {
            actor_id,
            agent_id,
            last_step_id: Some(last_step_id),
            new_inbox,
        };
        wit.run(input, WitContext::bare(SharedStore::clone(store)))
            .await
            .unwrap()
    }

    async fn read_proposal(store: &SharedStore, step_id: StepId) -> Mailbox {
        let step = load_step_object(store, step_id).await.unwrap();
        store
            .load(step.inbox.unwrap())
            .await
            .unwrap()
            .unwrap()
            .into_mailbox()
            .unwrap()
    }

    #[tokio::test]
    async fn test_genesis_then_named_handler() {
        let store = shared_store();
        let wit = Wit::new().on_message("hi", |mut frame, msg| {
            Box::pin(async move {
                let text = msg.get_content_as_str(&frame.ctx.store).await?;
                frame
                    .outbox
                    .add(OutboxMessage::from_reply(&msg, text, Some("hi-back")));
                Ok(frame)
            })
        });

        let (actor_id, genesis_step, sender) = spawn_actor(&store, &wit).await;

        // send a "hi" message
        let msg = OutboxMessage::from_new(actor_id, "hello there", false, Some("hi"));
        let (_, _, msg_id) = msg.persist_to_mailbox_update(&store, sender).await.unwrap();
        let mut proposal = read_proposal(&store, genesis_step).await;
        proposal.insert(sender, msg_id);

        let step2 = deliver(&store, &wit, actor_id, sender, genesis_step, proposal).await;

        let step = load_step_object(&store, step2).await.unwrap();
        assert_eq!(step.previous, Some(genesis_step));
        let outbox = store
            .load(step.outbox.unwrap())
            .await
            .unwrap()
            .unwrap()
            .into_mailbox()
            .unwrap();
        let reply = store
            .load(outbox[&sender])
            .await
            .unwrap()
            .unwrap()
            .into_message()
            .unwrap();
        assert_eq!(reply.mt(), Some("hi-back"));
    }

    #[tokio::test]
    async fn test_unhandled_skipped_or_fatal() {
        let store = shared_store();
        let lenient = Wit::new();
        let (actor_id, genesis_step, sender) = spawn_actor(&store, &lenient).await;

        let msg = OutboxMessage::from_new(actor_id, "???", false, Some("mystery"));
        let (_, _, msg_id) = msg.persist_to_mailbox_update(&store, sender).await.unwrap();
        let mut proposal = read_proposal(&store, genesis_step).await;
        proposal.insert(sender, msg_id);

        // lenient router consumes and moves on
        let step2 = deliver(
            &store,
            &lenient,
            actor_id,
            sender,
            genesis_step,
            proposal.clone(),
        )
        .await;
        assert_ne!(step2, genesis_step);

        // strict router refuses the step
        let strict = Wit::new().fail_on_unhandled(true);
        let input = WitInput {
            actor_id,
            agent_id: sender,
            last_step_id: Some(genesis_step),
            new_inbox: proposal,
        };
        let result = strict
            .run(input, WitContext::bare(SharedStore::clone(&store)))
            .await;
        assert!(matches!(result, Err(WitError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_default_update_merges_core() {
        let store = shared_store();
        let wit = Wit::new();
        let (actor_id, genesis_step, sender) = spawn_actor(&store, &wit).await;

        // an update that swaps the wit reference
        let mut new_core = Tree::new();
        let wit_blob = store
            .store(&Object::Blob(loam_grit::Blob::new("external:other")))
            .await
            .unwrap();
        new_core.insert("wit".to_string(), wit_blob);
        let new_core_id = store.store(&Object::Tree(new_core)).await.unwrap();

        let update = OutboxMessage::from_update(actor_id, new_core_id);
        let (_, _, update_id) = update
            .persist_to_mailbox_update(&store, sender)
            .await
            .unwrap();

        let mut proposal = read_proposal(&store, genesis_step).await;
        proposal.insert(sender, update_id);

        let step2 = deliver(&store, &wit, actor_id, sender, genesis_step, proposal).await;
        let step = load_step_object(&store, step2).await.unwrap();
        let mut core = Core::from_core_id(&store, step.core).await.unwrap();
        let wit_node = core.get_blob("wit").await.unwrap().unwrap();
        assert_eq!(wit_node.get_as_str().unwrap(), "external:other");
        // the core changed, so its id no longer equals the actor id
        assert_ne!(step.core, actor_id);
    }

    #[tokio::test]
    async fn test_query_router_dispatch() {
        let store = shared_store();
        let wit = Wit::new();
        let (actor_id, step_id, sender) = spawn_actor(&store, &wit).await;

        let router = QueryRouter::new().on_query("greeting", |frame| {
            Box::pin(async move {
                let who = frame.context_str().unwrap_or_else(|| "world".to_string());
                let mut tree = Tree::new();
                let blob = frame
                    .loader
                    .store(&Object::Blob(loam_grit::Blob::new(format!("hello {who}"))))
                    .await?;
                tree.insert("a".to_string(), blob);
                Ok(QueryResult::Tree(tree))
            })
        });

        let input = QueryInput {
            actor_id,
            agent_id: sender,
            step_id,
            query_name: "greeting".to_string(),
            context: None,
        };
        let result = router
            .run(
                input,
                QueryContext {
                    loader: SharedStore::clone(&store),
                },
            )
            .await
            .unwrap();
        match result {
            QueryResult::Tree(tree) => assert!(tree.contains_key("a")),
            QueryResult::Blob(_) => panic!("expected a tree"),
        }

        let missing = QueryInput {
            actor_id,
            agent_id: sender,
            step_id,
            query_name: "nope".to_string(),
            context: None,
        };
        let err = router
            .run(
                missing,
                QueryContext {
                    loader: SharedStore::clone(&store),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WitError::Query(QueryError::UnknownQuery(_))));
    }

    #[test]
    fn test_query_result_from_model() {
        #[derive(Serialize)]
        struct Info {
            version: u32,
        }
        let result = query_result_from_model(&Info { version: 2 }).unwrap();
        match result {
            QueryResult::Blob(blob) => {
                let value: serde_json::Value = serde_json::from_slice(&blob.data).unwrap();
                assert_eq!(value["version"], 2);
            }
            QueryResult::Tree(_) => panic!("expected a blob"),
        }
    }
}
