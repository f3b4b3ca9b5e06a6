//! Envelope types: the unit of work passed between services.
//!
//! A `DomainAction` wraps a business payload with the routing, tenancy, and
//! correlation metadata the fabric needs to move it between services. This
//! is the **unit of transport** - what gets appended to action streams and
//! pushed onto callback queues.
//!
//! ## Reply patterns
//!
//! The two callback fields encode which of the three request/response
//! patterns an envelope uses:
//!
//! - neither set: fire-and-forget, no feedback loop
//! - `callback_queue_name` only: pseudo-synchronous, the receiver pushes a
//!   [`DomainActionResponse`] to that queue
//! - both set: async-with-callback, the receiver appends a fresh
//!   [`DomainAction`] of type `callback_action_type` to that queue
//!
//! ## Correlation
//!
//! `correlation_id` and `trace_id` are immutable across the chain of
//! envelopes derived from one originating request; [`DomainAction::child`]
//! and the response constructors propagate them.
//!
//! ## Forward compatibility
//!
//! Unknown top-level fields are captured in a flattened catch-all map and
//! re-emitted on encode, so services at different versions can exchange
//! envelopes without dropping each other's fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nooble_core::{
    ActionError, ActionId, CorrelationId, ServiceName, SessionId, TenantId, TraceId, UserId,
};

/// JSON object used for payloads, metadata, and catch-all fields.
pub type JsonMap = serde_json::Map<String, Value>;

/// Dotted action type: `<target_service>.<entity>.<verb>`.
///
/// The first segment routes the envelope to the target service's action
/// stream; the receiver's dispatcher keys on the full string. Validated on
/// construction and on decode: at least two non-empty dot-separated
/// segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionType(String);

impl ActionType {
    pub fn parse(value: impl Into<String>) -> Result<Self, ActionError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ActionError::bad_envelope("action_type is empty"));
        }
        let segments: Vec<&str> = value.split('.').collect();
        if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
            return Err(ActionError::bad_envelope(format!(
                "action_type `{value}` is not of the form <service>.<entity>.<verb>"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment: the service whose action stream receives the envelope.
    pub fn target_service(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }
}

impl core::fmt::Display for ActionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ActionType {
    type Error = ActionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        value.0
    }
}

/// Which reply the receiver of an envelope owes, per its callback fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReplyPattern {
    /// No feedback loop.
    FireAndForget,
    /// A `DomainActionResponse` on the stamped reply queue.
    PseudoSync,
    /// A fresh `DomainAction` of the stamped type on the callback queue.
    Callback,
}

/// Envelope for a unit of work, carrying type, context, payload, and
/// correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAction {
    action_id: ActionId,
    action_type: ActionType,
    timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<TenantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,

    origin_service: ServiceName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<TraceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_queue_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_action_type: Option<ActionType>,

    #[serde(default)]
    data: JsonMap,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    metadata: JsonMap,

    /// Unknown top-level fields, preserved across decode/encode.
    #[serde(flatten)]
    extra: JsonMap,
}

impl DomainAction {
    pub fn new(action_type: ActionType, origin_service: ServiceName) -> Self {
        Self {
            action_id: ActionId::new(),
            action_type,
            timestamp: Utc::now(),
            tenant_id: None,
            user_id: None,
            session_id: None,
            origin_service,
            correlation_id: None,
            trace_id: None,
            callback_queue_name: None,
            callback_action_type: None,
            data: JsonMap::new(),
            metadata: JsonMap::new(),
            extra: JsonMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_trace(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_data(mut self, data: JsonMap) -> Self {
        self.data = data;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    pub fn action_type(&self) -> &ActionType {
        &self.action_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn origin_service(&self) -> &ServiceName {
        &self.origin_service
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn callback_queue_name(&self) -> Option<&str> {
        self.callback_queue_name.as_deref()
    }

    pub fn callback_action_type(&self) -> Option<&ActionType> {
        self.callback_action_type.as_ref()
    }

    pub fn data(&self) -> &JsonMap {
        &self.data
    }

    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    /// The reply the receiver owes for this envelope.
    pub fn reply_pattern(&self) -> ReplyPattern {
        match (&self.callback_queue_name, &self.callback_action_type) {
            (Some(_), None) => ReplyPattern::PseudoSync,
            (Some(_), Some(_)) => ReplyPattern::Callback,
            (None, _) => ReplyPattern::FireAndForget,
        }
    }

    /// Stamp the reply fields for the pseudo-synchronous pattern.
    pub fn prepare_pseudo_sync(&mut self, response_queue: impl Into<String>) {
        self.callback_queue_name = Some(response_queue.into());
        self.callback_action_type = None;
    }

    /// Stamp the reply fields for the async-with-callback pattern.
    pub fn prepare_callback(
        &mut self,
        callback_queue: impl Into<String>,
        callback_action_type: ActionType,
    ) {
        self.callback_queue_name = Some(callback_queue.into());
        self.callback_action_type = Some(callback_action_type);
    }

    /// Correlation id, generating and stamping one if absent.
    pub fn ensure_correlation(&mut self) -> &CorrelationId {
        self.correlation_id.get_or_insert_with(CorrelationId::generate)
    }

    /// Trace id, generating and stamping one if absent.
    pub fn ensure_trace(&mut self) -> &TraceId {
        self.trace_id.get_or_insert_with(TraceId::generate)
    }

    /// Derive a follow-up envelope emitted by `origin_service`.
    ///
    /// Fresh `action_id` and `timestamp`; tenant/user/session context and
    /// `correlation_id`/`trace_id` are carried over unchanged.
    pub fn child(&self, action_type: ActionType, origin_service: ServiceName) -> DomainAction {
        DomainAction {
            action_id: ActionId::new(),
            action_type,
            timestamp: Utc::now(),
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            origin_service,
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            callback_queue_name: None,
            callback_action_type: None,
            data: JsonMap::new(),
            metadata: JsonMap::new(),
            extra: JsonMap::new(),
        }
    }

    /// Structural checks beyond what the field types enforce.
    pub(crate) fn validate(&self) -> Result<(), ActionError> {
        if self.origin_service.as_str().is_empty() {
            return Err(ActionError::bad_envelope("origin_service is empty"));
        }
        if self.callback_action_type.is_some() && self.callback_queue_name.is_none() {
            return Err(ActionError::bad_envelope(
                "callback_action_type set without callback_queue_name",
            ));
        }
        Ok(())
    }
}

/// Structured error carried by a failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    error_type: String,
    error_code: String,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ErrorDetail {
    pub fn new(
        error_type: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            error_code: error_code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }
}

impl From<&ActionError> for ErrorDetail {
    fn from(err: &ActionError) -> Self {
        let detail = ErrorDetail::new(err.error_type(), err.error_code(), err.to_string());
        match err {
            ActionError::LimitExceeded { resource, .. } => {
                detail.with_details(serde_json::json!({ "resource": resource }))
            }
            _ => detail,
        }
    }
}

/// Reply to a pseudo-synchronous envelope.
///
/// Echoes the original's `action_id`, `correlation_id`, and `trace_id`.
/// Exactly one of `data` / `error` is populated: a success carries `data`
/// and no `error`, a failure carries `error` and no `data`. The
/// constructors make the violation unrepresentable and the codec re-checks
/// it on decode, so a malformed peer payload (e.g. `"success": true` with
/// no `data`) is rejected as a bad envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainActionResponse {
    action_id: ActionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<TraceId>,
    success: bool,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,

    /// Unknown top-level fields, preserved across decode/encode.
    #[serde(flatten)]
    extra: JsonMap,
}

impl DomainActionResponse {
    /// Success response for `original`.
    pub fn ok(original: &DomainAction, data: Value) -> Self {
        Self {
            action_id: original.action_id(),
            correlation_id: original.correlation_id().cloned(),
            trace_id: original.trace_id().cloned(),
            success: true,
            timestamp: Utc::now(),
            data: Some(data),
            error: None,
            extra: JsonMap::new(),
        }
    }

    /// Failure response for `original`.
    pub fn fail(original: &DomainAction, error: ErrorDetail) -> Self {
        Self::fail_detached(
            original.action_id(),
            original.correlation_id().cloned(),
            original.trace_id().cloned(),
            error,
        )
    }

    /// Failure response when the original envelope could not be fully
    /// decoded and only its reply coordinates were salvaged.
    pub fn fail_detached(
        action_id: ActionId,
        correlation_id: Option<CorrelationId>,
        trace_id: Option<TraceId>,
        error: ErrorDetail,
    ) -> Self {
        Self {
            action_id,
            correlation_id,
            trace_id,
            success: false,
            timestamp: Utc::now(),
            data: None,
            error: Some(error),
            extra: JsonMap::new(),
        }
    }

    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    /// The exactly-one-of-data/error invariant, re-checked on decode.
    pub(crate) fn validate(&self) -> Result<(), ActionError> {
        if self.success {
            if self.error.is_some() {
                return Err(ActionError::bad_envelope(
                    "success response carries an error",
                ));
            }
            if self.data.is_none() {
                return Err(ActionError::bad_envelope(
                    "success response carries no data",
                ));
            }
        } else {
            if self.error.is_none() {
                return Err(ActionError::bad_envelope(
                    "failure response carries no error",
                ));
            }
            if self.data.is_some() {
                return Err(ActionError::bad_envelope("failure response carries data"));
            }
        }
        Ok(())
    }
}
