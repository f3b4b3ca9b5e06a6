//! Transport client: the three send patterns plus the reply helpers
//! services use to honor them.
//!
//! The target stream of a send is derived from the first segment of the
//! envelope's `action_type`; the reply queue (when any) from this client's
//! origin service. The two are validated independently and never derived
//! from one another.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use nooble_actions::{
    codec, ActionType, DomainAction, DomainActionResponse, ErrorDetail, JsonMap, NameBuilder,
};
use nooble_core::ServiceName;

use crate::settings::TransportSettings;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The envelope failed validation before anything was sent.
    #[error("bad action: {0}")]
    BadAction(String),

    /// No response arrived on the reply queue within the timeout. The
    /// server-side work is not cancelled; a late response is reaped with
    /// the queue's TTL.
    #[error("no response within {waited:?} on {queue}")]
    TimedOut { queue: String, waited: Duration },

    /// The reply queue yielded something that is not a valid response.
    #[error("bad response payload: {0}")]
    BadResponse(String),
}

/// Outbound side of the fabric for one service.
#[derive(Debug)]
pub struct TransportClient<S> {
    store: Arc<S>,
    names: NameBuilder,
    origin_service: ServiceName,
    stream_context: Option<String>,
    settings: TransportSettings,
}

impl<S: Store> TransportClient<S> {
    pub fn new(
        store: Arc<S>,
        names: NameBuilder,
        origin_service: ServiceName,
        settings: TransportSettings,
    ) -> Self {
        Self {
            store,
            names,
            origin_service,
            stream_context: None,
            settings,
        }
    }

    /// Route sends through a contextual stream segment (e.g. per-tenant).
    pub fn with_stream_context(mut self, context: impl Into<String>) -> Self {
        self.stream_context = Some(context.into());
        self
    }

    pub fn origin_service(&self) -> &ServiceName {
        &self.origin_service
    }

    pub fn names(&self) -> &NameBuilder {
        &self.names
    }

    fn target_stream(&self, action: &DomainAction) -> String {
        self.names.action_stream(
            action.action_type().target_service(),
            self.stream_context.as_deref(),
        )
    }

    async fn append(&self, action: &DomainAction) -> Result<String, TransportError> {
        let stream = self.target_stream(action);
        let payload = codec::encode(action).map_err(|e| TransportError::BadAction(e.to_string()))?;
        let entry_id = self.store.append_stream(&stream, &payload).await?;
        debug!(
            stream = %stream,
            entry_id = %entry_id,
            action_type = %action.action_type(),
            action_id = %action.action_id(),
            "action appended"
        );
        Ok(entry_id)
    }

    /// Fire-and-forget: append to the target service's action stream.
    ///
    /// Returns the stream-assigned entry id. No reply channel exists;
    /// receiver-side failures are the receiver's to log.
    #[instrument(skip(self, action), fields(action_type = %action.action_type()))]
    pub async fn send_async(&self, mut action: DomainAction) -> Result<String, TransportError> {
        action.ensure_trace();
        self.append(&action).await
    }

    /// Pseudo-synchronous: append, then block on a per-call reply queue.
    ///
    /// A missing correlation id is generated; the reply queue name is
    /// unique to this call, so exactly one caller can consume the
    /// response. On timeout the reply queue is left for TTL reaping; a
    /// duplicate response (receiver double-send) is likewise left behind.
    #[instrument(skip(self, action), fields(action_type = %action.action_type()))]
    pub async fn send_pseudo_sync(
        &self,
        mut action: DomainAction,
        timeout: Option<Duration>,
    ) -> Result<DomainActionResponse, TransportError> {
        let timeout = timeout.unwrap_or(self.settings.default_pseudo_sync_timeout);

        action.ensure_trace();
        let correlation_id = action.ensure_correlation().clone();
        let queue = self.names.response_queue(
            self.origin_service.as_str(),
            self.stream_context.as_deref(),
            action.action_type().as_str(),
            correlation_id.as_str(),
        );
        action.prepare_pseudo_sync(queue.clone());

        self.append(&action).await?;

        match self.store.pop_list(&queue, timeout).await? {
            Some(raw) => {
                codec::decode_response(&raw).map_err(|e| TransportError::BadResponse(e.to_string()))
            }
            None => Err(TransportError::TimedOut {
                queue,
                waited: timeout,
            }),
        }
    }

    /// Async-with-callback: append, return immediately.
    ///
    /// The callback queue is stable per `(origin_service, event)` - the
    /// originating service runs a [`CallbackWorker`](crate::worker::CallbackWorker)
    /// over it to receive the eventual callback envelope.
    #[instrument(skip(self, action), fields(action_type = %action.action_type(), event = %callback_event))]
    pub async fn send_with_callback(
        &self,
        mut action: DomainAction,
        callback_event: &str,
        callback_action_type: ActionType,
    ) -> Result<String, TransportError> {
        action.ensure_trace();
        action.ensure_correlation();
        let queue = self.names.callback_queue(
            self.origin_service.as_str(),
            self.stream_context.as_deref(),
            callback_event,
        );
        action.prepare_callback(queue, callback_action_type);
        self.append(&action).await
    }

    /// Push a success response onto the original envelope's reply queue.
    pub async fn send_success_response(
        &self,
        original: &DomainAction,
        data: Value,
    ) -> Result<(), TransportError> {
        self.push_response(original, DomainActionResponse::ok(original, data))
            .await
    }

    /// Push a failure response onto the original envelope's reply queue.
    pub async fn send_failure_response(
        &self,
        original: &DomainAction,
        error: ErrorDetail,
    ) -> Result<(), TransportError> {
        self.push_response(original, DomainActionResponse::fail(original, error))
            .await
    }

    async fn push_response(
        &self,
        original: &DomainAction,
        response: DomainActionResponse,
    ) -> Result<(), TransportError> {
        let queue = original.callback_queue_name().ok_or_else(|| {
            TransportError::BadAction("envelope carries no reply queue".to_string())
        })?;
        let payload = codec::encode_response(&response)
            .map_err(|e| TransportError::BadAction(e.to_string()))?;
        self.store
            .push_list(queue, &payload, Some(self.settings.response_queue_ttl))
            .await?;
        Ok(())
    }

    /// Build and push the deferred callback envelope for an
    /// async-with-callback original: a fresh `DomainAction` of the stamped
    /// `callback_action_type`, carrying `data`, delivered to the stamped
    /// callback queue. Correlation and trace propagate from the original.
    pub async fn send_callback_action(
        &self,
        original: &DomainAction,
        data: JsonMap,
    ) -> Result<String, TransportError> {
        let (Some(queue), Some(callback_type)) = (
            original.callback_queue_name(),
            original.callback_action_type(),
        ) else {
            return Err(TransportError::BadAction(
                "envelope is not async-with-callback".to_string(),
            ));
        };

        let callback = original
            .child(callback_type.clone(), self.origin_service.clone())
            .with_data(data);
        let payload =
            codec::encode(&callback).map_err(|e| TransportError::BadAction(e.to_string()))?;
        self.store.push_list(queue, &payload, None).await?;
        Ok(callback.action_id().to_string())
    }

    /// Publish a notification on this service's pub/sub channel for
    /// `event`. Best effort: not durable, no delivery guarantee.
    pub async fn publish_notification(
        &self,
        event: &str,
        payload: &Value,
    ) -> Result<(), TransportError> {
        let channel = self.names.notification_channel(
            self.origin_service.as_str(),
            self.stream_context.as_deref(),
            event,
        );
        self.store.publish(&channel, &payload.to_string()).await?;
        Ok(())
    }
}
