//! Typed persistence of structured state with optional TTL.
//!
//! A `StateManager<T>` owns one schema within one service's key prefix:
//! keys are `{prefix}:{env}:{service}:state:{schema}:{key}`, values are the
//! JSON-encoded `T`. State objects are owned by the writing service;
//! cross-service mutation is forbidden by convention. There are no
//! cross-key transactions - callers needing atomic multi-key updates must
//! serialize them through a single writer.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use nooble_actions::{ExecutionContext, NameBuilder};

use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored value does not match the schema.
    #[error("state decode failed for {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    #[error("state encode failed: {0}")]
    Encode(serde_json::Error),
}

/// Typed accessor for one state schema.
#[derive(Debug)]
pub struct StateManager<T, S> {
    store: Arc<S>,
    names: NameBuilder,
    service: String,
    schema: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> StateManager<T, S>
where
    T: Serialize + DeserializeOwned,
    S: Store,
{
    pub fn new(
        store: Arc<S>,
        names: NameBuilder,
        service: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            store,
            names,
            service: service.into(),
            schema: schema.into(),
            _marker: PhantomData,
        }
    }

    fn key_for(&self, key: &str) -> String {
        self.names.state_key(&self.service, &self.schema, key)
    }

    /// Read and decode the value at `key`; `None` if absent.
    pub async fn load(&self, key: &str) -> Result<Option<T>, StateError> {
        let full_key = self.key_for(key);
        match self.store.get_value(&full_key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StateError::Decode {
                    key: full_key,
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Serialize and store `value` at `key`, with an optional TTL.
    pub async fn save(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), StateError> {
        let raw = serde_json::to_string(value).map_err(StateError::Encode)?;
        self.store
            .set_value(&self.key_for(key), &raw, ttl)
            .await
            .map_err(StateError::from)
    }

    /// Remove the value at `key`; true if it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StateError> {
        self.store
            .delete_value(&self.key_for(key))
            .await
            .map_err(StateError::from)
    }
}

impl<S: Store> StateManager<ExecutionContext, S> {
    /// State manager for the execution-context schema of `service`.
    pub fn for_contexts(store: Arc<S>, names: NameBuilder, service: impl Into<String>) -> Self {
        Self::new(store, names, service, ExecutionContext::STATE_SCHEMA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use nooble_actions::ContextType;
    use nooble_core::TenantId;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AgentConfig {
        model: String,
        temperature: f32,
    }

    fn manager(store: Arc<MemoryStore>) -> StateManager<AgentConfig, MemoryStore> {
        StateManager::new(store, NameBuilder::default(), "agent_management", "agent_config")
    }

    #[tokio::test]
    async fn save_load_delete_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let state = manager(store.clone());

        let config = AgentConfig {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
        };

        assert_eq!(state.load("agent-1").await.unwrap(), None);
        state.save("agent-1", &config, None).await.unwrap();
        assert_eq!(state.load("agent-1").await.unwrap(), Some(config));

        assert!(state.delete("agent-1").await.unwrap());
        assert!(!state.delete("agent-1").await.unwrap());
        assert_eq!(state.load("agent-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_follow_the_state_layout() {
        let store = Arc::new(MemoryStore::new());
        let state = manager(store.clone());
        state
            .save(
                "agent-1",
                &AgentConfig {
                    model: "m".to_string(),
                    temperature: 0.0,
                },
                None,
            )
            .await
            .unwrap();

        let raw = store
            .get_value("nooble4:dev:agent_management:state:agent_config:agent-1")
            .await
            .unwrap();
        assert!(raw.is_some());
    }

    #[tokio::test]
    async fn schema_mismatch_is_a_decode_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_value(
                "nooble4:dev:agent_management:state:agent_config:agent-1",
                "{\"model\": 7}",
                None,
            )
            .await
            .unwrap();

        let state = manager(store);
        assert!(matches!(
            state.load("agent-1").await,
            Err(StateError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn ttl_expires_saved_state() {
        let store = Arc::new(MemoryStore::new());
        let state = manager(store);
        state
            .save(
                "ephemeral",
                &AgentConfig {
                    model: "m".to_string(),
                    temperature: 0.0,
                },
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(state.load("ephemeral").await.unwrap(), None);
    }

    #[tokio::test]
    async fn execution_contexts_use_their_schema_segment() {
        let store = Arc::new(MemoryStore::new());
        let contexts =
            StateManager::for_contexts(store.clone(), NameBuilder::default(), "orchestrator");

        let ctx = ExecutionContext::new(ContextType::Agent, TenantId::new("t1"));
        let key = ctx.context_id().as_str().to_string();
        contexts.save(&key, &ctx, None).await.unwrap();

        let stored_key =
            format!("nooble4:dev:orchestrator:state:execution_context:{key}");
        assert!(store.get_value(&stored_key).await.unwrap().is_some());
        assert_eq!(contexts.load(&key).await.unwrap(), Some(ctx));
    }
}
