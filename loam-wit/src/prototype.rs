//! The prototype wit: a factory actor that births other actors from a
//! template core.
//!
//! A prototype core carries:
//! - `wit`: the prototype wit itself
//! - `prototype`: the core of the actors to be created
//! - `created`: one record per child, keyed by the child's hex id
//!
//! On a `create` message the prototype combines the stored template
//! with the message's optional arguments, emits the child's genesis
//! message, and records the child. On an `update` to itself it merges
//! the update and forwards the new template to every recorded child.

// Layer 3: Internal module imports
use loam_grit::ObjectId;

use crate::core::{Core, ARGS_NODE};
use crate::error::WitError;
use crate::inbox::InboxMessage;
use crate::outbox::{OutboxContent, OutboxMessage};
use crate::router::{default_update, StepFrame, Wit};

/// Node of a prototype core holding the template for new actors.
pub const PROTOTYPE_NODE: &str = "prototype";
/// Node of a prototype core recording the actors it created.
pub const CREATED_NODE: &str = "created";

/// `mt` of a message asking a prototype to create an actor.
pub const MT_CREATE: &str = "create";
/// `mt` of the reply carrying the new actor's id.
pub const MT_CREATED: &str = "created";

/// Build the prototype router.
pub fn prototype_wit() -> Wit {
    Wit::new()
        .on_message(MT_CREATE, |mut frame, msg| {
            Box::pin(async move {
                handle_create(&mut frame, msg).await?;
                Ok(frame)
            })
        })
        .on_update(|mut frame, msg| {
            Box::pin(async move {
                handle_update(&mut frame, msg).await?;
                Ok(frame)
            })
        })
}

async fn handle_create(frame: &mut StepFrame, msg: InboxMessage) -> Result<(), WitError> {
    let store = frame.ctx.store.clone();

    let template = frame
        .core
        .get_tree(PROTOTYPE_NODE)
        .await?
        .ok_or_else(|| {
            WitError::InvalidCore(format!("prototype core is missing '{PROTOTYPE_NODE}'"))
        })?
        .clone();
    let mut child_core = Core::from_tree_object(template);

    // optional arguments: the create message's content, linked in as
    // the child's `args` (an empty blob means no arguments)
    let content = msg.get_content(&store).await?;
    let has_args = match &content {
        loam_grit::Object::Blob(blob) => !blob.data.is_empty(),
        _ => true,
    };
    if has_args {
        child_core.insert_id(ARGS_NODE, msg.content_id());
    }

    let genesis = OutboxMessage::from_genesis(&store, &mut child_core).await?;
    let child_id = genesis.recipient_id;
    frame.outbox.add(genesis);

    frame
        .core
        .maket(CREATED_NODE)
        .await?
        .makeb(&child_id.to_hex())
        .await?
        .set_as_str(msg.sender_id.to_hex());

    frame.outbox.add(OutboxMessage::from_reply(
        &msg,
        child_id.to_hex(),
        Some(MT_CREATED),
    ));
    Ok(())
}

async fn handle_update(frame: &mut StepFrame, msg: InboxMessage) -> Result<(), WitError> {
    // the prototype itself updates like any actor
    default_update(frame, msg).await?;

    // then fan the new template out to every child it ever created
    let store = frame.ctx.store.clone();
    let Some(template) = frame.core.get_tree(PROTOTYPE_NODE).await? else {
        return Ok(());
    };
    let template_id = template.persist(&store).await?;

    let child_ids: Vec<ObjectId> = match frame.core.get_tree(CREATED_NODE).await? {
        Some(created) => created
            .keys()
            .filter_map(|key| ObjectId::from_hex(key).ok())
            .collect(),
        None => Vec::new(),
    };
    for child_id in child_ids {
        frame.outbox.add(OutboxMessage::from_update(
            child_id,
            OutboxContent::Id(template_id),
        ));
    }
    Ok(())
}
