//! The root executor: the agent itself as an actor.
//!
//! External messages have to come from somewhere. They are injected
//! into the root actor's outbox and routed from there to ordinary
//! actors; conversely, traffic sent to the root actor is republished
//! to external subscribers. The root's wit is built in, not resolved
//! from its core: each step merges injected outbox entries with
//! whatever arrived, and nothing else.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio::sync::broadcast;
use tracing::info;

// Layer 3: Internal module imports
use loam_grit::{
    bootstrap_root_actor_objects, bytes_to_point, ref_root_actor, ref_step_head, AgentId, Mailbox,
    MessageId, Object, Point, References, Step, StepId,
};
use loam_wit::{load_step, Core, OutboxMessage, SharedStore, WitError};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::executor::{ActorExecutor, MailboxUpdate};

/// Handle over the root-mode [`ActorExecutor`].
#[derive(Clone)]
pub struct RootExecutor {
    inner: Arc<ActorExecutor>,
}

impl RootExecutor {
    /// Create or load the agent's root actor for `point` and build its
    /// executor.
    pub async fn from_point(
        ctx: Arc<ExecutionContext>,
        point: Point,
    ) -> Result<Self, RuntimeError> {
        let (agent_id, last_step_id) =
            create_or_load_root_actor(&ctx.store, &ctx.references, point).await?;
        if agent_id != ctx.agent_id {
            return Err(RuntimeError::AgentMismatch {
                stored: agent_id,
                derived: ctx.agent_id,
            });
        }
        let inner = ActorExecutor::root_from_last_step(ctx, agent_id, last_step_id).await?;
        Ok(Self { inner })
    }

    pub fn agent_id(&self) -> AgentId {
        self.inner.actor_id
    }

    /// The underlying executor, for the runtime to spawn and route to.
    pub fn executor(&self) -> Arc<ActorExecutor> {
        Arc::clone(&self.inner)
    }

    /// Snapshot of the root outbox (persisted entries plus injected
    /// ones).
    pub async fn get_current_outbox(&self) -> Mailbox {
        self.inner.current_outbox().await
    }

    /// Inject routed deliveries into the root outbox from outside the
    /// scheduler; the next root step picks them up.
    pub async fn update_current_outbox(&self, new_messages: &[MailboxUpdate]) {
        {
            let mut state = self.inner.state.lock().await;
            for (_sender_id, recipient_id, message_id) in new_messages {
                state.current_outbox.insert(*recipient_id, *message_id);
            }
        }
        self.inner.wake.notify_one();
    }

    /// Persist an outgoing message as the agent and queue it for
    /// routing. Unless the message is a signal, its `previous` is
    /// chained to the last message the agent sent that recipient.
    pub async fn inject_message(&self, mut msg: OutboxMessage) -> Result<MessageId, WitError> {
        if !msg.is_signal && msg.previous_id.is_none() {
            let outbox = self.get_current_outbox().await;
            msg.previous_id = outbox.get(&msg.recipient_id).copied();
        }
        let update = msg
            .persist_to_mailbox_update(&self.inner.ctx.store, self.agent_id())
            .await?;
        self.update_current_outbox(&[update]).await;
        Ok(update.2)
    }

    /// Subscribe to the stream of messages other actors send to this
    /// agent.
    pub fn subscribe(&self) -> broadcast::Receiver<MailboxUpdate> {
        match &self.inner.root {
            Some(parts) => parts.subscribers.subscribe(),
            // constructors always build root parts; a closed receiver
            // keeps this total without panicking
            None => broadcast::channel(1).1,
        }
    }
}

/// The built-in root wit, called by the executor in root mode.
///
/// Forwards newly arrived messages to external subscribers, merges
/// injected outbox entries with entries produced by traffic, and
/// writes the next step under the unchanged root core.
pub(crate) async fn run_root_step(
    executor: &ActorExecutor,
    last_step_id: Option<StepId>,
    new_inbox: Mailbox,
) -> Result<StepId, WitError> {
    let store = &executor.ctx.store;
    let last_step_id = last_step_id.ok_or_else(|| {
        WitError::Handler("root executor started without a bootstrap step".to_string())
    })?;

    let (mut inbox, outbox, core) = load_step(
        store,
        executor.actor_id,
        Some(last_step_id),
        Some(new_inbox),
    )
    .await?;

    // republish incoming traffic to external subscribers
    let new_messages = inbox.read_new(store).await?;
    if let Some(root) = &executor.root {
        for msg in &new_messages {
            let _ = root
                .subscribers
                .send((msg.sender_id, executor.actor_id, msg.message_id));
        }
    }
    let new_inbox_id = inbox.persist(store).await?;

    // merge entries injected from outside the scheduler
    let pending_outbox = executor.state.lock().await.current_outbox.clone();
    let mut new_outbox = outbox.get_current();
    for (recipient_id, message_id) in pending_outbox {
        new_outbox.insert(recipient_id, message_id);
    }
    let new_outbox_id = store.store(&Object::Mailbox(new_outbox)).await?;

    let core_id = core_id_of(&core)?;
    let new_step = Step::new(
        Some(last_step_id),
        executor.actor_id,
        Some(new_inbox_id),
        Some(new_outbox_id),
        core_id,
    );
    Ok(store.store(&Object::Step(new_step)).await?)
}

fn core_id_of(core: &Core) -> Result<loam_grit::TreeId, WitError> {
    core.object_id()
        .ok_or_else(|| WitError::InvalidCore("root core was never persisted".to_string()))
}

/// Look up the agent's root actor; bootstrap the genesis sequence on
/// first start.
pub async fn create_or_load_root_actor(
    store: &SharedStore,
    references: &Arc<dyn References>,
    point: Point,
) -> Result<(AgentId, StepId), RuntimeError> {
    if let Some(agent_id) = references.get(ref_root_actor()).await? {
        // verify the stored root actor matches this runtime's point
        let mut core = Core::from_core_id(store, agent_id).await?;
        let point_blob = core
            .get_blob("point")
            .await?
            .ok_or_else(|| WitError::InvalidCore("root core has no 'point'".to_string()))?;
        let stored_point = bytes_to_point(point_blob.get_as_bytes()?)
            .map_err(|err| WitError::InvalidCore(format!("bad root point: {err}")))?;
        if stored_point != point {
            return Err(RuntimeError::AgentMismatch {
                stored: agent_id,
                derived: loam_grit::agent_id_from_point(point),
            });
        }
        let head = references
            .get(&ref_step_head(agent_id))
            .await?
            .ok_or_else(|| RuntimeError::BrokenReference(ref_step_head(agent_id)))?;
        return Ok((agent_id, head));
    }

    // first start: write the genesis sequence and the initial refs
    let mut last = None;
    let mut agent_id = None;
    for object in bootstrap_root_actor_objects(point) {
        if let Object::Step(step) = &object {
            agent_id = Some(step.actor);
        }
        last = Some(store.store(&object).await?);
    }
    let (gen_step_id, agent_id) = match (last, agent_id) {
        (Some(step_id), Some(agent_id)) => (step_id, agent_id),
        _ => {
            return Err(RuntimeError::BrokenReference(
                "bootstrap produced no genesis step".to_string(),
            ))
        }
    };
    references
        .set(&ref_step_head(agent_id), gen_step_id)
        .await?;
    references.set(ref_root_actor(), agent_id).await?;
    info!(agent = %agent_id, point, "bootstrapped root actor");
    Ok((agent_id, gen_step_id))
}
