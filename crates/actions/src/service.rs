//! Contract a business service implements.

use std::sync::Arc;

use async_trait::async_trait;

use nooble_core::ActionError;

use crate::envelope::DomainAction;

/// A business service plugged into the worker runtime.
///
/// The worker invokes [`ActionService::process_action`] for every envelope
/// it reads and never looks inside `action_type` itself; the service owns
/// the action taxonomy (typically via a
/// [`HandlerRegistry`](crate::dispatch::HandlerRegistry)).
///
/// Inside `process_action` the service is responsible for:
/// - decoding `data` against its per-action payload schema, answering
///   `PayloadValidation` failures with a failure response when the envelope
///   carries a reply queue;
/// - invoking its business logic;
/// - emitting exactly one response (pseudo-sync), exactly one callback
///   envelope (async-with-callback), or nothing (fire-and-forget), per the
///   envelope's reply pattern;
/// - reporting usage to the tier engine when applicable.
///
/// The returned error drives the worker's acknowledgment: transient errors
/// leave the entry pending for redelivery, anything else is acked.
#[async_trait]
pub trait ActionService: Send + Sync + 'static {
    /// Service name, used as the envelope origin and in queue names.
    fn name(&self) -> &str;

    /// Single entry point for every incoming envelope.
    async fn process_action(&self, action: DomainAction) -> Result<(), ActionError>;
}

#[async_trait]
impl<S> ActionService for Arc<S>
where
    S: ActionService + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process_action(&self, action: DomainAction) -> Result<(), ActionError> {
        (**self).process_action(action).await
    }
}
