//! JSON codec for envelopes and responses.
//!
//! Wire format: RFC 3339 UTC timestamps, canonical lowercase UUID text,
//! optional fields accepted as either missing or null, unknown fields
//! preserved and re-emitted. Decode failures and invariant violations
//! surface as [`ActionError::BadEnvelope`].

use nooble_core::ActionError;

use crate::envelope::{DomainAction, DomainActionResponse};

/// Serialize an envelope for a stream entry or callback queue element.
pub fn encode(action: &DomainAction) -> Result<String, ActionError> {
    action.validate()?;
    serde_json::to_string(action)
        .map_err(|e| ActionError::bad_envelope(format!("encode failed: {e}")))
}

/// Deserialize and validate an envelope.
pub fn decode(raw: &str) -> Result<DomainAction, ActionError> {
    let action: DomainAction = serde_json::from_str(raw)
        .map_err(|e| ActionError::bad_envelope(format!("decode failed: {e}")))?;
    action.validate()?;
    Ok(action)
}

/// Serialize a response for a reply queue element.
pub fn encode_response(response: &DomainActionResponse) -> Result<String, ActionError> {
    response.validate()?;
    serde_json::to_string(response)
        .map_err(|e| ActionError::bad_envelope(format!("encode failed: {e}")))
}

/// Deserialize and validate a response.
pub fn decode_response(raw: &str) -> Result<DomainActionResponse, ActionError> {
    let response: DomainActionResponse = serde_json::from_str(raw)
        .map_err(|e| ActionError::bad_envelope(format!("decode failed: {e}")))?;
    response.validate()?;
    Ok(response)
}
