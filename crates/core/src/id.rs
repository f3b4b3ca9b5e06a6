//! Strongly-typed identifiers used across the fabric.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an envelope.
///
/// Unique within a stream's retention window; receivers that opt into
/// idempotent processing treat it as the dedup key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ActionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for ActionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

macro_rules! impl_string_newtype {
    ($(#[$doc:meta])* $t:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

impl_string_newtype!(
    /// Identifier of a tenant (multi-tenant boundary).
    ///
    /// Opaque: the platform assigns these, the fabric only carries them.
    TenantId
);

impl_string_newtype!(
    /// Identifier of a user (actor identity).
    UserId
);

impl_string_newtype!(
    /// Identifier of a conversation/session.
    SessionId
);

impl_string_newtype!(
    /// Name of a service (envelope origin, stream routing segment).
    ServiceName
);

impl_string_newtype!(
    /// Identifier of an execution context (multi-agent state across hops).
    ContextId
);

impl_string_newtype!(
    /// Groups a request with every envelope derived from it, including the
    /// response. Immutable across the chain.
    CorrelationId
);

impl_string_newtype!(
    /// Distributed-tracing identity, propagated end-to-end across hops.
    /// Immutable across the chain.
    TraceId
);

impl CorrelationId {
    /// Generate a fresh id (canonical lowercase UUID text).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl TraceId {
    /// Generate a fresh id (canonical lowercase UUID text).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl ContextId {
    /// Generate a fresh id (canonical lowercase UUID text).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_round_trip_as_bare_json_strings() {
        let tenant = TenantId::new("t1");
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"t1\"");

        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tenant);
    }

    #[test]
    fn generated_ids_are_canonical_lowercase_uuids() {
        let id = CorrelationId::generate();
        let parsed = Uuid::from_str(id.as_str()).unwrap();
        assert_eq!(parsed.to_string(), id.as_str());
    }

    #[test]
    fn action_id_serializes_as_uuid_text() {
        let id = ActionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
