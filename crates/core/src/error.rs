//! Processing error taxonomy.
//!
//! `ActionError` classifies everything that can go wrong while an envelope
//! is being processed. The split that matters operationally is
//! [`ActionError::is_transient`]: transient failures leave the stream entry
//! pending for redelivery, terminal ones are acknowledged and dropped.

use thiserror::Error;

/// Kind of tier-limit violation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitKind {
    /// A quantitative quota was exhausted.
    QuotaExceeded,
    /// A requested value is outside the tier's allow-list.
    ValueNotAllowed,
    /// A boolean capability is off for the tier.
    CapabilityDenied,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::QuotaExceeded => "QUOTA_EXCEEDED",
            LimitKind::ValueNotAllowed => "VALUE_NOT_ALLOWED",
            LimitKind::CapabilityDenied => "CAPABILITY_DENIED",
        }
    }
}

impl core::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised while processing an envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Decoding failed or an envelope invariant was violated.
    /// Terminal: acked at the worker boundary, never retried.
    #[error("bad envelope: {0}")]
    BadEnvelope(String),

    /// No handler is registered for the envelope's action type.
    /// Handled like a bad envelope.
    #[error("no handler for action type: {0}")]
    HandlerNotFound(String),

    /// The envelope's `data` did not match the per-action payload schema.
    /// Handled like a bad envelope.
    #[error("payload validation failed: {0}")]
    PayloadValidation(String),

    /// Store/connectivity failure. The entry is left pending and the
    /// consumer group recovers it.
    #[error("transient transport failure: {0}")]
    TransientTransport(String),

    /// A per-tenant tier limit blocked the work.
    #[error("tier limit exceeded for {resource}: {message}")]
    LimitExceeded {
        kind: LimitKind,
        resource: String,
        message: String,
    },

    /// Anything else a service raises. Services are expected to convert
    /// these to failure responses themselves; an uncaught one is logged,
    /// acked, and dropped so a poison pill cannot stall the stream.
    #[error("{code}: {message}")]
    Business { code: String, message: String },
}

impl ActionError {
    pub fn bad_envelope(msg: impl Into<String>) -> Self {
        Self::BadEnvelope(msg.into())
    }

    pub fn handler_not_found(action_type: impl Into<String>) -> Self {
        Self::HandlerNotFound(action_type.into())
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        Self::PayloadValidation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientTransport(msg.into())
    }

    pub fn business(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Business {
            code: code.into(),
            message: msg.into(),
        }
    }

    /// Whether the worker should leave the stream entry pending for
    /// redelivery instead of acknowledging it.
    pub fn is_transient(&self) -> bool {
        matches!(self, ActionError::TransientTransport(_))
    }

    /// Coarse category, stable across services.
    pub fn error_type(&self) -> &'static str {
        match self {
            ActionError::BadEnvelope(_) => "bad_envelope",
            ActionError::HandlerNotFound(_) => "handler_not_found",
            ActionError::PayloadValidation(_) => "payload_validation",
            ActionError::TransientTransport(_) => "transport",
            ActionError::LimitExceeded { .. } => "tier_limit",
            ActionError::Business { .. } => "business",
        }
    }

    /// Service-facing error code.
    pub fn error_code(&self) -> String {
        match self {
            ActionError::BadEnvelope(_) => "BAD_ENVELOPE".to_string(),
            ActionError::HandlerNotFound(_) => "HANDLER_NOT_FOUND".to_string(),
            ActionError::PayloadValidation(_) => "PAYLOAD_VALIDATION".to_string(),
            ActionError::TransientTransport(_) => "TRANSIENT_TRANSPORT".to_string(),
            ActionError::LimitExceeded { kind, .. } => kind.as_str().to_string(),
            ActionError::Business { code, .. } => code.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_transient() {
        assert!(ActionError::transient("pool down").is_transient());
        assert!(!ActionError::bad_envelope("no action_type").is_transient());
        assert!(!ActionError::handler_not_found("x.y.z").is_transient());
        assert!(!ActionError::business("E42", "boom").is_transient());
    }

    #[test]
    fn limit_kind_renders_screaming_snake() {
        assert_eq!(LimitKind::QuotaExceeded.as_str(), "QUOTA_EXCEEDED");
        assert_eq!(
            serde_json::to_string(&LimitKind::ValueNotAllowed).unwrap(),
            "\"VALUE_NOT_ALLOWED\""
        );
    }

    #[test]
    fn error_codes_follow_the_variant() {
        let err = ActionError::LimitExceeded {
            kind: LimitKind::QuotaExceeded,
            resource: "max_agents".to_string(),
            message: "limit 1 reached".to_string(),
        };
        assert_eq!(err.error_code(), "QUOTA_EXCEEDED");
        assert_eq!(err.error_type(), "tier_limit");

        let err = ActionError::business("AGENT_MISSING", "no such agent");
        assert_eq!(err.error_code(), "AGENT_MISSING");
    }
}
