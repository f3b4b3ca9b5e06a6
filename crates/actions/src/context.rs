//! Execution context: multi-agent state carried across hops.
//!
//! Created on the first request of a session, persisted through the state
//! manager under [`ExecutionContext::STATE_SCHEMA`] keyed by `context_id`,
//! refreshed with [`ExecutionContext::touch`] on each interaction, and
//! destroyed by explicit delete or TTL expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nooble_core::{ContextId, SessionId, TenantId};

use crate::envelope::JsonMap;

/// What an execution context scopes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Agent,
    Workflow,
    Collection,
}

/// Shared state for one multi-agent interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    context_id: ContextId,
    context_type: ContextType,
    tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    primary_agent_id: Option<String>,
    #[serde(default)]
    agents: Vec<String>,
    #[serde(default)]
    collections: Vec<String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    metadata: JsonMap,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Schema segment of the state-manager key.
    pub const STATE_SCHEMA: &'static str = "execution_context";

    pub fn new(context_type: ContextType, tenant_id: TenantId) -> Self {
        let now = Utc::now();
        Self {
            context_id: ContextId::generate(),
            context_type,
            tenant_id,
            session_id: None,
            primary_agent_id: None,
            agents: Vec::new(),
            collections: Vec::new(),
            metadata: JsonMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_primary_agent(mut self, agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        self.add_agent(agent_id.clone());
        self.primary_agent_id = Some(agent_id);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    pub fn context_type(&self) -> ContextType {
        self.context_type
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn primary_agent_id(&self) -> Option<&str> {
        self.primary_agent_id.as_deref()
    }

    /// Agents in join order, no duplicates.
    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    /// Collections in attach order, no duplicates.
    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Add an agent, preserving order and ignoring duplicates.
    pub fn add_agent(&mut self, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        if !self.agents.contains(&agent_id) {
            self.agents.push(agent_id);
        }
        self.touch();
    }

    /// Add a collection, preserving order and ignoring duplicates.
    pub fn add_collection(&mut self, collection_id: impl Into<String>) {
        let collection_id = collection_id.into();
        if !self.collections.contains(&collection_id) {
            self.collections.push(collection_id);
        }
        self.touch();
    }

    /// Refresh the interaction stamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
