//! Action dispatch: a registered `action_type -> handler` map.
//!
//! Resolution order: exact match, then category match (`service.entity.*`
//! patterns), then the `*` wildcard. A miss is
//! [`ActionError::HandlerNotFound`], which the worker treats like a bad
//! envelope.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;

use nooble_core::ActionError;

use crate::envelope::DomainAction;

/// One registered handler.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    async fn handle(&self, action: DomainAction) -> Result<(), ActionError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(DomainAction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    async fn handle(&self, action: DomainAction) -> Result<(), ActionError> {
        (self.0)(action).await
    }
}

/// Maps action types to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an action-type pattern.
    ///
    /// Patterns: an exact action type (`"query.rag.search"`), a category
    /// (`"query.rag.*"` or `"query.*"`), or the wildcard `"*"`.
    pub fn register(&mut self, pattern: impl Into<String>, handler: impl ActionHandler) {
        self.handlers.insert(pattern.into(), Box::new(handler));
    }

    /// Register a plain async function or closure.
    pub fn register_fn<F, Fut>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(DomainAction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        self.handlers.insert(pattern.into(), Box::new(FnHandler(handler)));
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    fn resolve(&self, action_type: &str) -> Option<&dyn ActionHandler> {
        // Exact match first.
        if let Some(h) = self.handlers.get(action_type) {
            return Some(h.as_ref());
        }

        // Category match (e.g. "query.*" matches "query.rag.search").
        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if action_type.starts_with(prefix)
                    && action_type[prefix.len()..].starts_with('.')
                {
                    return Some(handler.as_ref());
                }
            }
        }

        // Wildcard.
        self.handlers.get("*").map(|h| h.as_ref())
    }

    /// Dispatch an envelope to the handler registered for its type.
    pub async fn dispatch(&self, action: DomainAction) -> Result<(), ActionError> {
        let action_type = action.action_type().as_str().to_string();
        match self.resolve(&action_type) {
            Some(handler) => handler.handle(action).await,
            None => Err(ActionError::handler_not_found(action_type)),
        }
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut patterns: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        patterns.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("patterns", &patterns)
            .finish()
    }
}
