//! The per-actor step executor.
//!
//! One executor owns one actor's step loop: it sleeps until the
//! delivered inbox diverges from the last step's inbox, resolves the
//! wit to run (genesis, update, or normal), runs it, advances the
//! actor's HEAD, and emits the outbox delta to the runtime.
//!
//! The root executor is the same machine in root mode: its step can
//! also be forced by externally injected outbox entries, and it runs a
//! built-in wit instead of resolving one from its core (see
//! [`crate::root`]).

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

// Layer 3: Internal module imports
use loam_grit::{headers, ref_step_head, ActorId, Mailbox, MessageId, Object, StepId};
use loam_wit::{
    default_update_wit_fn, load_step_object, Inbox, SharedStore, WitError, WitFn, WitInput,
};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::resolver::CoreNode;

/// One routed delivery: `(sender, recipient, message)`.
pub type MailboxUpdate = (ActorId, ActorId, MessageId);

/// Channel the executors push outbox deltas into.
pub type MailboxUpdateSender = mpsc::UnboundedSender<Vec<MailboxUpdate>>;

/// Grace given to a running handler after cancellation before it is
/// hard-aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Backoff while an actor's genesis message is still in flight.
const GENESIS_RETRY: Duration = Duration::from_millis(50);

/// Root-mode extras: the externally fed outbox lives in the shared
/// state; the broadcast fans incoming traffic out to subscribers.
pub(crate) struct RootParts {
    pub(crate) subscribers: broadcast::Sender<MailboxUpdate>,
}

/// Mutable state guarded by the step lock.
pub(crate) struct ExecutorState {
    pub(crate) last_step_id: Option<StepId>,
    pub(crate) last_step_inbox: Mailbox,
    pub(crate) last_step_outbox: Mailbox,
    pub(crate) current_inbox: Mailbox,
    /// Root mode only: entries injected from outside the scheduler.
    pub(crate) current_outbox: Mailbox,
}

/// Runs an actor's steps whenever new inbox messages arrive.
///
/// Use the factory methods to create an instance; drive it with
/// [`ActorExecutor::run`] on its own task.
pub struct ActorExecutor {
    pub(crate) ctx: Arc<ExecutionContext>,
    pub actor_id: ActorId,
    pub(crate) state: tokio::sync::Mutex<ExecutorState>,
    pub(crate) wake: Notify,
    cancel: CancellationToken,
    pub(crate) root: Option<RootParts>,
}

impl ActorExecutor {
    fn new(
        ctx: Arc<ExecutionContext>,
        actor_id: ActorId,
        last_step_id: Option<StepId>,
        last_step_inbox: Mailbox,
        last_step_outbox: Mailbox,
        root: Option<RootParts>,
    ) -> Arc<Self> {
        let current_inbox = last_step_inbox.clone();
        let current_outbox = last_step_outbox.clone();
        Arc::new(Self {
            ctx,
            actor_id,
            state: tokio::sync::Mutex::new(ExecutorState {
                last_step_id,
                last_step_inbox,
                last_step_outbox,
                current_inbox,
                current_outbox,
            }),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            root,
        })
    }

    /// An executor for an actor that does not exist yet; its first
    /// step will be the genesis step.
    pub fn from_genesis(ctx: Arc<ExecutionContext>, actor_id: ActorId) -> Arc<Self> {
        Self::new(ctx, actor_id, None, Mailbox::new(), Mailbox::new(), None)
    }

    /// An executor resuming from the actor's persisted HEAD step.
    pub async fn from_last_step(
        ctx: Arc<ExecutionContext>,
        actor_id: ActorId,
        last_step_id: StepId,
    ) -> Result<Arc<Self>, RuntimeError> {
        let (inbox, outbox) = load_step_mailboxes(&ctx.store, last_step_id).await?;
        Ok(Self::new(
            ctx,
            actor_id,
            Some(last_step_id),
            inbox,
            outbox,
            None,
        ))
    }

    /// Root-mode executor resuming from the root actor's HEAD.
    pub(crate) async fn root_from_last_step(
        ctx: Arc<ExecutionContext>,
        actor_id: ActorId,
        last_step_id: StepId,
    ) -> Result<Arc<Self>, RuntimeError> {
        let (inbox, outbox) = load_step_mailboxes(&ctx.store, last_step_id).await?;
        let (subscribers, _) = broadcast::channel(1024);
        Ok(Self::new(
            ctx,
            actor_id,
            Some(last_step_id),
            inbox,
            outbox,
            Some(RootParts { subscribers }),
        ))
    }

    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }

    /// Snapshot of the delivered inbox.
    pub async fn current_inbox(&self) -> Mailbox {
        self.state.lock().await.current_inbox.clone()
    }

    /// Snapshot of the current outbox. For a plain actor this is the
    /// last step's outbox; for the root it includes injected entries.
    pub async fn current_outbox(&self) -> Mailbox {
        let state = self.state.lock().await;
        if self.is_root() {
            state.current_outbox.clone()
        } else {
            state.last_step_outbox.clone()
        }
    }

    /// Deliver routed messages into this actor's inbox.
    ///
    /// A sender can appear several times; deliveries arrive in order,
    /// so keeping the last pointer per sender is lossless for chained
    /// messages (earlier ones stay reachable via `previous`).
    pub async fn update_current_inbox(&self, new_messages: &[MailboxUpdate]) {
        {
            let mut state = self.state.lock().await;
            for (sender_id, _recipient_id, message_id) in new_messages {
                state.current_inbox.insert(*sender_id, *message_id);
            }
        }
        self.wake.notify_one();
    }

    /// Signal the step loop to stop. The current handler gets a
    /// cooperative cancel, then a short grace, then a hard abort.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
    }

    /// The step loop. Runs until [`ActorExecutor::stop`]; emits outbox
    /// deltas through `outbox_tx`.
    pub async fn run(self: Arc<Self>, outbox_tx: MailboxUpdateSender) -> Result<(), RuntimeError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let (new_inbox, inbox_changed, must_run) = {
                let state = self.state.lock().await;
                let changed = state.current_inbox != state.last_step_inbox;
                let must_run = self.is_root() && state.current_outbox != state.last_step_outbox;
                (state.current_inbox.clone(), changed, must_run)
            };

            if !inbox_changed && !must_run {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = self.cancel.cancelled() => return Ok(()),
                }
                continue;
            }

            match self.run_one_step(new_inbox, &outbox_tx).await {
                Ok(()) => {}
                Err(WitError::GenesisNotReady) => {
                    // the genesis message may still be in flight
                    debug!(actor = %self.actor_id, "genesis message not ready, retrying");
                    sleep(GENESIS_RETRY).await;
                }
                Err(err) if self.cancel.is_cancelled() => {
                    warn!(actor = %self.actor_id, error = %err, "step aborted by shutdown");
                    return Ok(());
                }
                Err(err) => {
                    error!(actor = %self.actor_id, error = %err, "wit execution failed");
                    return Err(RuntimeError::ActorFailed {
                        actor: self.actor_id,
                        source: err,
                    });
                }
            }
        }
    }

    /// One iteration: resolve, execute, advance HEAD, emit the delta.
    async fn run_one_step(
        &self,
        new_inbox: Mailbox,
        outbox_tx: &MailboxUpdateSender,
    ) -> Result<(), WitError> {
        // snapshot the outbox before running, to detect changes after
        let (last_step_id, exec_last_outbox) = {
            let state = self.state.lock().await;
            (state.last_step_id, state.last_step_outbox.clone())
        };

        let new_step_id = if self.is_root() {
            crate::root::run_root_step(self, last_step_id, new_inbox).await?
        } else {
            let execution = self.create_execution(last_step_id, new_inbox).await?;
            self.run_execution(execution).await?
        };

        // the new step is the actor's HEAD now
        self.ctx
            .references
            .set(&ref_step_head(self.actor_id), new_step_id)
            .await?;

        let (exec_new_inbox, exec_new_outbox) = load_step_mailboxes(&self.ctx.store, new_step_id)
            .await
            .map_err(|err| WitError::Handler(err.to_string()))?;

        {
            let mut state = self.state.lock().await;
            state.last_step_id = Some(new_step_id);
            state.last_step_inbox = exec_new_inbox;
            state.last_step_outbox = exec_new_outbox.clone();
        }

        // emit only what changed relative to the pre-step outbox
        let delta: Vec<MailboxUpdate> = exec_new_outbox
            .iter()
            .filter(|(recipient, message_id)| exec_last_outbox.get(*recipient) != Some(*message_id))
            .map(|(recipient, message_id)| (self.actor_id, *recipient, *message_id))
            .collect();
        if !delta.is_empty() {
            // unbounded by design: a bounded queue could deadlock an
            // executor that is also a recipient
            let _ = outbox_tx.send(delta);
        }
        Ok(())
    }

    /// Resolve what to execute for this iteration.
    async fn create_execution(
        &self,
        last_step_id: Option<StepId>,
        new_inbox: Mailbox,
    ) -> Result<WitExecution, WitError> {
        let store = &self.ctx.store;
        let last_step_inbox = self.state.lock().await.last_step_inbox.clone();

        let mut probe = Inbox::new(last_step_inbox.clone(), new_inbox.clone());
        let new_messages = probe.read_new(store).await?;

        let (wit, effective_inbox) = match last_step_id {
            None => {
                // genesis: the unique message whose content is this
                // actor's core
                let genesis = new_messages
                    .iter()
                    .find(|msg| msg.content_id() == self.actor_id && msg.previous_id().is_none())
                    .ok_or(WitError::GenesisNotReady)?;
                let mut inbox = Mailbox::new();
                inbox.insert(genesis.sender_id, genesis.message_id);
                let wit = self
                    .resolve_required(genesis.content_id(), CoreNode::Wit)
                    .await?;
                (wit, inbox)
            }
            Some(last_step_id) => {
                if let Some(update) = new_messages
                    .iter()
                    .find(|msg| msg.mt() == Some(headers::MT_UPDATE))
                {
                    // run the update under the new core, with the
                    // inbox restricted to exactly the update message
                    let mut inbox = last_step_inbox.clone();
                    inbox.insert(update.sender_id, update.message_id);
                    let wit = match self
                        .ctx
                        .resolver
                        .resolve_wit(update.content_id(), CoreNode::WitUpdate, false)
                        .await
                        .map_err(flatten_resolution)?
                    {
                        Some(wit) => wit,
                        None => default_update_wit_fn(),
                    };
                    (wit, inbox)
                } else {
                    let step = load_step_object(store, last_step_id).await?;
                    let wit = self.resolve_required(step.core, CoreNode::Wit).await?;
                    (wit, new_inbox)
                }
            }
        };

        Ok(WitExecution {
            wit,
            input: WitInput {
                actor_id: self.actor_id,
                agent_id: self.ctx.agent_id,
                last_step_id,
                new_inbox: effective_inbox,
            },
        })
    }

    async fn resolve_required(
        &self,
        core_id: loam_grit::TreeId,
        node: CoreNode,
    ) -> Result<WitFn, WitError> {
        self.ctx
            .resolver
            .resolve_wit(core_id, node, true)
            .await
            .map_err(flatten_resolution)?
            .ok_or_else(|| {
                WitError::InvalidCore(format!("core {core_id} has no '{}'", node.as_str()))
            })
    }

    /// Run the handler on its own task, gated by the concurrency
    /// semaphore, honoring cancellation with a grace period.
    async fn run_execution(&self, execution: WitExecution) -> Result<StepId, WitError> {
        let _permit = match &self.ctx.wit_semaphore {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| WitError::Handler("runtime shut down".to_string()))?,
            ),
            None => None,
        };

        let handler_cancel = CancellationToken::new();
        let wit_ctx = self.ctx.wit_context(handler_cancel.clone());
        let mut handle = tokio::spawn((execution.wit)(execution.input, wit_ctx));

        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = self.cancel.cancelled() => {
                // cooperative cancel first, then a grace, then abort
                handler_cancel.cancel();
                match timeout(CANCEL_GRACE, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        return Err(WitError::Handler(
                            "handler did not stop within the cancel grace".to_string(),
                        ));
                    }
                }
            }
        };

        match joined {
            Ok(result) => result,
            Err(join_err) => Err(WitError::Handler(format!(
                "handler task failed: {join_err}"
            ))),
        }
    }
}

/// A resolved wit, ready to run against an effective inbox.
struct WitExecution {
    wit: WitFn,
    input: WitInput,
}

fn flatten_resolution(err: RuntimeError) -> WitError {
    match err {
        RuntimeError::Wit(wit) => wit,
        other => WitError::Handler(other.to_string()),
    }
}

/// Load a step's inbox and outbox mailboxes (empty when null).
pub(crate) async fn load_step_mailboxes(
    store: &SharedStore,
    step_id: StepId,
) -> Result<(Mailbox, Mailbox), RuntimeError> {
    let step = load_step_object(store, step_id).await?;
    let inbox = match step.inbox {
        Some(id) => load_mailbox(store, id).await?,
        None => Mailbox::new(),
    };
    let outbox = match step.outbox {
        Some(id) => load_mailbox(store, id).await?,
        None => Mailbox::new(),
    };
    Ok((inbox, outbox))
}

async fn load_mailbox(
    store: &SharedStore,
    id: loam_grit::MailboxId,
) -> Result<Mailbox, RuntimeError> {
    let object = store.load(id).await?.ok_or(WitError::MissingObject(id))?;
    match object {
        Object::Mailbox(mailbox) => Ok(mailbox),
        _ => Err(WitError::InvalidMessage(format!("object {id} is not a mailbox")).into()),
    }
}
