//! The runtime: owns all executors, routes outbox deltas to inboxes,
//! and spawns genesis executors for actors that do not exist yet.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

// Layer 3: Internal module imports
use loam_grit::{
    ActorId, AgentId, Mailbox, MessageId, Point, References, StepId, REF_HEADS_PREFIX,
};
use loam_wit::{OutboxMessage, Query, SharedStore, WitError};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::executor::{ActorExecutor, MailboxUpdate};
use crate::query::QueryExecutor;
use crate::request_response::RequestResponseExecutor;
use crate::resolver::{HandlerRegistry, MetaResolver, NativeModuleRegistry, Resolver};
use crate::root::RootExecutor;

/// How long the router waits on the delta queue before re-checking
/// for cancellation.
const ROUTER_POLL: Duration = Duration::from_millis(50);

/// The main runtime API to run an agent.
///
/// Cheap to clone; all clones drive the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    ctx: Arc<ExecutionContext>,
    registry: HandlerRegistry,
    modules: NativeModuleRegistry,
    query: Arc<QueryExecutor>,
    executors: Mutex<HashMap<ActorId, Arc<ActorExecutor>>>,
    root: OnceCell<RootExecutor>,
    outbox_tx: mpsc::UnboundedSender<Vec<MailboxUpdate>>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<MailboxUpdate>>>>,
    cancel: CancellationToken,
    running: watch::Sender<bool>,
}

impl Runtime {
    /// A runtime over `store`/`references` for the agent at `point`,
    /// with a fresh meta-resolver. Register handlers through
    /// [`Runtime::registry`] and [`Runtime::modules`] before starting.
    pub fn new(store: SharedStore, references: Arc<dyn References>, point: Point) -> Self {
        let (resolver, registry, modules) =
            MetaResolver::with_registries(SharedStore::clone(&store));
        Self::with_parts(
            store,
            references,
            point,
            Arc::new(resolver),
            registry,
            modules,
            None,
        )
    }

    /// A runtime with a caller-supplied resolver (the registries are
    /// still created so `external:` references can be used in tests).
    pub fn with_resolver(
        store: SharedStore,
        references: Arc<dyn References>,
        point: Point,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self::with_parts(
            store,
            references,
            point,
            resolver,
            HandlerRegistry::new(),
            NativeModuleRegistry::new(),
            None,
        )
    }

    fn with_parts(
        store: SharedStore,
        references: Arc<dyn References>,
        point: Point,
        resolver: Arc<dyn Resolver>,
        registry: HandlerRegistry,
        modules: NativeModuleRegistry,
        wit_concurrency: Option<usize>,
    ) -> Self {
        let ctx = Arc::new(ExecutionContext::new(
            SharedStore::clone(&store),
            Arc::clone(&references),
            Arc::clone(&resolver),
            point,
            wit_concurrency,
        ));
        let query = Arc::new(QueryExecutor::new(
            store,
            references,
            resolver,
            ctx.agent_id,
        ));
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(RuntimeInner {
                ctx,
                registry,
                modules,
                query,
                executors: Mutex::new(HashMap::new()),
                root: OnceCell::new(),
                outbox_tx,
                outbox_rx: Mutex::new(Some(outbox_rx)),
                cancel: CancellationToken::new(),
                running,
            }),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.inner.ctx.agent_id
    }

    pub fn point(&self) -> Point {
        self.inner.ctx.point
    }

    pub fn store(&self) -> SharedStore {
        SharedStore::clone(&self.inner.ctx.store)
    }

    pub fn references(&self) -> Arc<dyn References> {
        Arc::clone(&self.inner.ctx.references)
    }

    /// The `external:<name>` handler registry.
    pub fn registry(&self) -> HandlerRegistry {
        self.inner.registry.clone()
    }

    /// The `native:<name>` module registry of the in-core loader.
    pub fn modules(&self) -> NativeModuleRegistry {
        self.inner.modules.clone()
    }

    /// The stateless query face.
    pub fn query_executor(&self) -> Arc<dyn Query> {
        Arc::clone(&self.inner.query) as Arc<dyn Query>
    }

    /// Actors with live executors.
    pub async fn actor_ids(&self) -> Vec<ActorId> {
        self.inner.executors.lock().await.keys().copied().collect()
    }

    pub async fn actor_exists(&self, actor_id: ActorId) -> bool {
        self.inner.executors.lock().await.contains_key(&actor_id)
    }

    /// Inject a raw routed delivery. With rapid signals only the last
    /// one may be processed; chained messages are never lost.
    pub async fn inject_mailbox_update(
        &self,
        update: MailboxUpdate,
    ) -> Result<MessageId, RuntimeError> {
        let root = self.init_root().await?;
        root.update_current_outbox(&[update]).await;
        Ok(update.2)
    }

    /// Persist and inject a message from the agent itself.
    pub async fn inject_message(&self, msg: OutboxMessage) -> Result<MessageId, RuntimeError> {
        let root = self.init_root().await?;
        Ok(root.inject_message(msg).await?)
    }

    /// Subscribe to messages actors send to the agent.
    pub async fn subscribe_to_messages(
        &self,
    ) -> Result<tokio::sync::broadcast::Receiver<MailboxUpdate>, RuntimeError> {
        let root = self.init_root().await?;
        Ok(root.subscribe())
    }

    /// The correlated request-response face (available once the root
    /// executor exists).
    pub async fn request_response(
        &self,
    ) -> Result<Arc<dyn loam_wit::RequestResponse>, RuntimeError> {
        let root = self.init_root().await?;
        Ok(Arc::new(RequestResponseExecutor::new(
            self.store(),
            root.clone(),
        )))
    }

    async fn init_root(&self) -> Result<&RootExecutor, RuntimeError> {
        let inner = &self.inner;
        let root = inner
            .root
            .get_or_try_init(|| async {
                let root =
                    RootExecutor::from_point(Arc::clone(&inner.ctx), inner.ctx.point).await?;
                inner
                    .ctx
                    .set_request_response(Arc::new(RequestResponseExecutor::new(
                        SharedStore::clone(&inner.ctx.store),
                        root.clone(),
                    )));
                Ok::<_, RuntimeError>(root)
            })
            .await?;
        Ok(root)
    }

    /// Resolves once the main loop is about to process deltas.
    pub async fn wait_until_running(&self) {
        let mut rx = self.inner.running.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Ask the runtime (and every executor) to stop.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Run the agent until stopped. Restores executors from
    /// `heads/*`, requeues deliveries lost across the last shutdown,
    /// then routes outbox deltas until cancelled.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let root = self.init_root().await?.clone();
        let mut outbox_rx = self
            .inner
            .outbox_rx
            .lock()
            .await
            .take()
            .ok_or(RuntimeError::NotRunning)?;

        // restore one executor per persisted HEAD (the root actor is
        // managed separately)
        let heads = self.load_actor_heads().await?;
        {
            let mut executors = self.inner.executors.lock().await;
            for (actor_id, step_id) in heads {
                if actor_id == root.agent_id() {
                    continue;
                }
                let executor =
                    ActorExecutor::from_last_step(Arc::clone(&self.inner.ctx), actor_id, step_id)
                        .await?;
                executors.insert(actor_id, executor);
            }
        }

        // recovery: requeue messages whose senders point at them but
        // whose recipients never saw them
        self.gather_pending_messages(&root).await;

        // start all executors
        let mut tasks: JoinSet<Result<(), RuntimeError>> = JoinSet::new();
        {
            let executors = self.inner.executors.lock().await;
            for executor in executors.values() {
                tasks.spawn(Arc::clone(executor).run(self.inner.outbox_tx.clone()));
            }
        }
        tasks.spawn(root.executor().run(self.inner.outbox_tx.clone()));

        let _ = self.inner.running.send(true);
        info!(agent = %root.agent_id(), "runtime running");

        let result = self.route_loop(&root, &mut outbox_rx, &mut tasks).await;

        // wind down: stop everything and surface the first failure
        {
            let executors = self.inner.executors.lock().await;
            for executor in executors.values() {
                executor.stop();
            }
        }
        root.executor().stop();
        let mut shutdown_result = result;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "executor task failed");
                    if shutdown_result.is_ok() {
                        shutdown_result = Err(err);
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    error!(error = %join_err, "executor task panicked");
                }
            }
        }
        let _ = self.inner.running.send(false);
        shutdown_result
    }

    /// The router: pop deltas, coalesce per recipient, deliver.
    async fn route_loop(
        &self,
        root: &RootExecutor,
        outbox_rx: &mut mpsc::UnboundedReceiver<Vec<MailboxUpdate>>,
        tasks: &mut JoinSet<Result<(), RuntimeError>>,
    ) -> Result<(), RuntimeError> {
        while !self.inner.cancel.is_cancelled() {
            // harvest finished executors so failures surface promptly
            while let Some(joined) = tasks.try_join_next() {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) if join_err.is_cancelled() => {}
                    Err(join_err) => {
                        return Err(RuntimeError::Wit(WitError::Handler(format!(
                            "executor task panicked: {join_err}"
                        ))))
                    }
                }
            }

            // a small timeout keeps cancellation responsive
            let mut batches = match timeout(ROUTER_POLL, outbox_rx.recv()).await {
                Err(_) => continue,
                Ok(None) => return Ok(()),
                Ok(Some(batch)) => vec![batch],
            };
            while let Ok(batch) = outbox_rx.try_recv() {
                batches.push(batch);
            }

            // group per recipient; within a recipient, applying in
            // order keeps only the latest pointer per sender (older
            // chained messages stay reachable via `previous`)
            let mut per_recipient: HashMap<ActorId, Vec<MailboxUpdate>> = HashMap::new();
            for (sender_id, recipient_id, message_id) in batches.into_iter().flatten() {
                per_recipient.entry(recipient_id).or_default().push((
                    sender_id,
                    recipient_id,
                    message_id,
                ));
            }

            for (recipient_id, updates) in per_recipient {
                if recipient_id == root.agent_id() {
                    root.executor().update_current_inbox(&updates).await;
                    continue;
                }
                let executor = {
                    let mut executors = self.inner.executors.lock().await;
                    match executors.get(&recipient_id) {
                        Some(executor) => Arc::clone(executor),
                        None => {
                            // unknown recipient: assume a genesis
                            // delivery and give it an executor
                            debug!(actor = %recipient_id, "spawning genesis executor");
                            let executor = ActorExecutor::from_genesis(
                                Arc::clone(&self.inner.ctx),
                                recipient_id,
                            );
                            executors.insert(recipient_id, Arc::clone(&executor));
                            tasks.spawn(Arc::clone(&executor).run(self.inner.outbox_tx.clone()));
                            executor
                        }
                    }
                };
                executor.update_current_inbox(&updates).await;
            }
        }
        Ok(())
    }

    async fn load_actor_heads(&self) -> Result<Vec<(ActorId, StepId)>, RuntimeError> {
        let refs = self
            .inner
            .ctx
            .references
            .get_with_prefix(REF_HEADS_PREFIX)
            .await?;
        let mut heads = Vec::new();
        for (name, step_id) in refs {
            let hex = name.trim_start_matches(REF_HEADS_PREFIX);
            match hex.parse::<ActorId>() {
                Ok(actor_id) => heads.push((actor_id, step_id)),
                Err(_) => return Err(RuntimeError::BrokenReference(name)),
            }
        }
        Ok(heads)
    }

    /// Find `(sender, recipient)` pairs where the sender's outbox
    /// points at a message the recipient's inbox has not seen, and
    /// requeue those deliveries.
    async fn gather_pending_messages(&self, root: &RootExecutor) {
        let mut inboxes: HashMap<ActorId, Mailbox> = HashMap::new();
        let mut outboxes: HashMap<ActorId, Mailbox> = HashMap::new();
        {
            let executors = self.inner.executors.lock().await;
            for (actor_id, executor) in executors.iter() {
                inboxes.insert(*actor_id, executor.current_inbox().await);
                outboxes.insert(*actor_id, executor.current_outbox().await);
            }
        }
        inboxes.insert(root.agent_id(), root.executor().current_inbox().await);
        outboxes.insert(root.agent_id(), root.get_current_outbox().await);

        for pending in find_pending_messages(&inboxes, &outboxes) {
            debug!(
                sender = %pending.0,
                recipient = %pending.1,
                "requeueing delivery lost across restart"
            );
            let _ = self.inner.outbox_tx.send(vec![pending]);
        }
    }
}

/// Match every sender's outbox pointers against the recipients'
/// inboxes; anything the recipient has not seen is pending.
fn find_pending_messages(
    inboxes: &HashMap<ActorId, Mailbox>,
    outboxes: &HashMap<ActorId, Mailbox>,
) -> Vec<MailboxUpdate> {
    let mut pending = Vec::new();
    for (sender_id, outbox) in outboxes {
        for (recipient_id, message_id) in outbox {
            let seen = inboxes
                .get(recipient_id)
                .and_then(|inbox| inbox.get(sender_id));
            if seen != Some(message_id) {
                pending.push((*sender_id, *recipient_id, *message_id));
            }
        }
    }
    pending
}
