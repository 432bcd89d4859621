//! Loading and persisting steps through the Inbox/Outbox/Core views.
//!
//! These helpers carry the genesis-aware logic: an actor with no
//! history loads its step state out of its own genesis message, whose
//! content *is* the new actor's core.

// Layer 3: Internal module imports
use loam_grit::{ActorId, Mailbox, Object, Step, StepId};

use crate::core::Core;
use crate::error::WitError;
use crate::handler::SharedStore;
use crate::inbox::{Inbox, InboxMessage};
use crate::outbox::Outbox;

/// Load the working state for the next step of `actor_id`.
///
/// With no previous step this is the genesis path; otherwise state is
/// rebuilt from the last step, with `new_inbox` as the proposed
/// current mailbox.
pub async fn load_step(
    loader: &SharedStore,
    actor_id: ActorId,
    last_step_id: Option<StepId>,
    new_inbox: Option<Mailbox>,
) -> Result<(Inbox, Outbox, Core), WitError> {
    match last_step_id {
        None => {
            let new_inbox = new_inbox.ok_or_else(|| {
                WitError::InvalidMessage(
                    "an inbox is required to load the genesis step".to_string(),
                )
            })?;
            load_step_from_genesis_message(loader, actor_id, new_inbox).await
        }
        Some(last_step_id) => load_step_from_last(loader, last_step_id, new_inbox).await,
    }
}

/// Locate the genesis message in `new_inbox` and build the initial
/// step state around it.
///
/// The genesis message is the unique message whose content id equals
/// the actor id (its payload is the new actor's core) and whose
/// `previous` is null. When it has not arrived yet the caller gets
/// [`WitError::GenesisNotReady`] and should retry shortly.
pub async fn load_step_from_genesis_message(
    loader: &SharedStore,
    actor_id: ActorId,
    new_inbox: Mailbox,
) -> Result<(Inbox, Outbox, Core), WitError> {
    let genesis = find_genesis_message(loader, actor_id, &new_inbox)
        .await?
        .ok_or(WitError::GenesisNotReady)?;

    let core = Core::from_core_id(loader, genesis.content_id()).await?;

    // the genesis inbox contains only the genesis message; anything
    // else that already arrived is processed in later steps
    let mut genesis_inbox_mailbox = Mailbox::new();
    genesis_inbox_mailbox.insert(genesis.sender_id, genesis.message_id);
    let inbox = Inbox::new(Mailbox::new(), genesis_inbox_mailbox);

    Ok((inbox, Outbox::default(), core))
}

/// Search a delivered mailbox for the genesis message of `actor_id`.
pub async fn find_genesis_message(
    loader: &SharedStore,
    actor_id: ActorId,
    new_inbox: &Mailbox,
) -> Result<Option<InboxMessage>, WitError> {
    let mut probe = Inbox::new(Mailbox::new(), new_inbox.clone());
    let candidates = probe.read_new(loader).await?;
    Ok(candidates
        .into_iter()
        .find(|msg| msg.content_id() == actor_id && msg.previous_id().is_none()))
}

/// Rebuild step state from an existing step.
pub async fn load_step_from_last(
    loader: &SharedStore,
    last_step_id: StepId,
    new_inbox: Option<Mailbox>,
) -> Result<(Inbox, Outbox, Core), WitError> {
    let step = load_step_object(loader, last_step_id).await?;

    let last_read = match step.inbox {
        Some(inbox_id) => load_mailbox(loader, inbox_id).await?,
        None => Mailbox::new(),
    };
    // without a proposal (no router running), re-read the last inbox
    let current = match new_inbox {
        Some(current) => current,
        None => last_read.clone(),
    };
    let inbox = Inbox::new(last_read, current);

    let outbox = match step.outbox {
        Some(outbox_id) => Outbox::from_outbox_id(loader, outbox_id).await?,
        None => Outbox::default(),
    };

    let core = Core::from_core_id(loader, step.core).await?;
    Ok((inbox, outbox, core))
}

/// Load and type-check a step object.
pub async fn load_step_object(loader: &SharedStore, step_id: StepId) -> Result<Step, WitError> {
    let object = loader
        .load(step_id)
        .await?
        .ok_or(WitError::MissingObject(step_id))?;
    object
        .into_step()
        .ok_or_else(|| WitError::InvalidMessage(format!("object {step_id} is not a step")))
}

async fn load_mailbox(
    loader: &SharedStore,
    mailbox_id: loam_grit::MailboxId,
) -> Result<Mailbox, WitError> {
    let object = loader
        .load(mailbox_id)
        .await?
        .ok_or(WitError::MissingObject(mailbox_id))?;
    object
        .into_mailbox()
        .ok_or_else(|| WitError::InvalidMessage(format!("object {mailbox_id} is not a mailbox")))
}

/// Persist inbox, outbox, and core, then the step that ties them
/// together; returns the new step id. Empty inboxes/outboxes are
/// recorded as null rather than as empty mailboxes.
pub async fn persist_step(
    store: &SharedStore,
    actor_id: ActorId,
    last_step_id: Option<StepId>,
    inbox: &Inbox,
    outbox: &mut Outbox,
    core: &mut Core,
) -> Result<StepId, WitError> {
    let inbox_id = if inbox.is_empty() {
        None
    } else {
        Some(inbox.persist(store).await?)
    };
    let outbox_id = if outbox.is_empty() {
        None
    } else {
        Some(outbox.persist(store).await?)
    };
    let core_id = core.persist(store).await?;

    let step = Step::new(last_step_id, actor_id, inbox_id, outbox_id, core_id);
    Ok(store.store(&Object::Step(step)).await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use loam_grit::{MemoryObjectStore, ObjectId};

    use super::*;
    use crate::outbox::OutboxMessage;

    fn shared_store() -> SharedStore {
        Arc::new(MemoryObjectStore::new())
    }

    #[tokio::test]
    async fn test_genesis_step_load_and_persist() {
        let store = shared_store();
        let sender = ObjectId::digest(b"creator");

        let mut core = Core::from_external_wit_ref("noop", None).await.unwrap();
        let genesis = OutboxMessage::from_genesis(&store, &mut core)
            .await
            .unwrap();
        let actor_id = genesis.recipient_id;
        let genesis_id = genesis.persist(&store).await.unwrap();

        let mut delivered = Mailbox::new();
        delivered.insert(sender, genesis_id);

        let (mut inbox, mut outbox, mut loaded_core) =
            load_step(&store, actor_id, None, Some(delivered))
                .await
                .unwrap();

        let msgs = inbox.read_new(&store).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content_id(), actor_id);

        let step_id = persist_step(
            &store,
            actor_id,
            None,
            &inbox,
            &mut outbox,
            &mut loaded_core,
        )
        .await
        .unwrap();
        let step = load_step_object(&store, step_id).await.unwrap();
        assert_eq!(step.actor, actor_id);
        assert_eq!(step.previous, None);
        assert_eq!(step.core, actor_id);
        assert_eq!(step.outbox, None);

        // the persisted genesis inbox holds exactly the genesis message
        let inbox_mailbox = store
            .load(step.inbox.unwrap())
            .await
            .unwrap()
            .unwrap()
            .into_mailbox()
            .unwrap();
        assert_eq!(inbox_mailbox.len(), 1);
        assert_eq!(inbox_mailbox.get(&sender), Some(&genesis_id));
    }

    #[tokio::test]
    async fn test_genesis_not_ready_without_message() {
        let store = shared_store();
        let actor_id = ObjectId::digest(b"not yet");
        let result = load_step(&store, actor_id, None, Some(Mailbox::new())).await;
        assert!(matches!(result, Err(WitError::GenesisNotReady)));
    }

    #[tokio::test]
    async fn test_load_step_from_last_round_trip() {
        let store = shared_store();
        let sender = ObjectId::digest(b"creator");

        let mut core = Core::from_external_wit_ref("noop", None).await.unwrap();
        let genesis = OutboxMessage::from_genesis(&store, &mut core)
            .await
            .unwrap();
        let actor_id = genesis.recipient_id;
        let genesis_id = genesis.persist(&store).await.unwrap();
        let mut delivered = Mailbox::new();
        delivered.insert(sender, genesis_id);

        let (mut inbox, mut outbox, mut core) = load_step(&store, actor_id, None, Some(delivered))
            .await
            .unwrap();
        inbox.read_new(&store).await.unwrap();
        outbox.add(OutboxMessage::from_new(sender, "hello back", false, None));
        let step_id = persist_step(&store, actor_id, None, &inbox, &mut outbox, &mut core)
            .await
            .unwrap();

        let (inbox2, outbox2, core2) = load_step(&store, actor_id, Some(step_id), None)
            .await
            .unwrap();
        assert!(!inbox2.is_empty());
        assert!(!inbox2.has_unread());
        assert_eq!(outbox2.get_current().len(), 1);
        assert_eq!(core2.object_id(), Some(actor_id));
    }
}
