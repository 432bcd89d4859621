//! Ergonomic state serialization into the core's `state` sub-tree.
//!
//! A handler's state is any serde record. Each public field is stored
//! under `state/<field>` as a JSON blob, so state survives core merges
//! field-by-field and stays inspectable through the object surface.
//! JSON maps serialize key-sorted, so unchanged state produces
//! unchanged blobs (and therefore unchanged ids).

// Layer 2: Third-party crate imports
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::core::{Core, STATE_NODE};
use crate::error::WitError;

/// Load a state record from `state/<field>` blobs, falling back to
/// the record's defaults for absent fields.
pub async fn load_state<T>(core: &mut Core) -> Result<T, WitError>
where
    T: Serialize + DeserializeOwned + Default,
{
    // the default value names the fields we look for
    let mut value = serde_json::to_value(T::default())?;
    let Value::Object(ref mut fields) = value else {
        return Err(WitError::Handler(
            "state must serialize to a JSON object".to_string(),
        ));
    };

    if core.contains(STATE_NODE) {
        let state = core.maket(STATE_NODE).await?;
        let names: Vec<String> = fields.keys().cloned().collect();
        for name in names {
            if let Some(blob) = state.get_blob(&name).await? {
                fields.insert(name, blob.get_as_json()?);
            }
        }
    }

    Ok(serde_json::from_value(value)?)
}

/// Persist each public field of a state record under `state/<field>`.
pub async fn persist_state<T>(core: &mut Core, state: &T) -> Result<(), WitError>
where
    T: Serialize,
{
    let value = serde_json::to_value(state)?;
    let Value::Object(fields) = value else {
        return Err(WitError::Handler(
            "state must serialize to a JSON object".to_string(),
        ));
    };
    let state_tree = core.maket(STATE_NODE).await?;
    for (name, field_value) in fields {
        state_tree.makeb(&name).await?.set_as_json(&field_value)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use loam_grit::MemoryObjectStore;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::handler::SharedStore;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct CounterState {
        count: u64,
        label: String,
    }

    fn shared_store() -> SharedStore {
        Arc::new(MemoryObjectStore::new())
    }

    #[tokio::test]
    async fn test_state_round_trip_through_core() {
        let store = shared_store();
        let mut core = Core::from_external_wit_ref("counter", None).await.unwrap();

        let state = CounterState {
            count: 7,
            label: "sheep".to_string(),
        };
        persist_state(&mut core, &state).await.unwrap();
        let core_id = core.persist(&store).await.unwrap();

        let mut reloaded = Core::from_core_id(&store, core_id).await.unwrap();
        let loaded: CounterState = load_state(&mut reloaded).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_missing_state_falls_back_to_default() {
        let mut core = Core::from_external_wit_ref("counter", None).await.unwrap();
        let loaded: CounterState = load_state(&mut core).await.unwrap();
        assert_eq!(loaded, CounterState::default());
    }

    #[tokio::test]
    async fn test_partial_state_keeps_defaults_for_missing_fields() {
        let store = shared_store();
        let mut core = Core::from_external_wit_ref("counter", None).await.unwrap();
        core.maket(STATE_NODE)
            .await
            .unwrap()
            .makeb("count")
            .await
            .unwrap()
            .set_as_json(&serde_json::json!(3))
            .unwrap();
        let core_id = core.persist(&store).await.unwrap();

        let mut reloaded = Core::from_core_id(&store, core_id).await.unwrap();
        let loaded: CounterState = load_state(&mut reloaded).await.unwrap();
        assert_eq!(loaded.count, 3);
        assert_eq!(loaded.label, String::new());
    }

    #[tokio::test]
    async fn test_unchanged_state_is_stable() {
        let store = shared_store();
        let mut core = Core::from_external_wit_ref("counter", None).await.unwrap();
        let state = CounterState {
            count: 1,
            label: "x".to_string(),
        };
        persist_state(&mut core, &state).await.unwrap();
        let id1 = core.persist(&store).await.unwrap();
        persist_state(&mut core, &state).await.unwrap();
        let id2 = core.persist(&store).await.unwrap();
        assert_eq!(id1, id2);
    }
}
