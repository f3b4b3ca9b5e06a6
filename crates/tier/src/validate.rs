//! Upstream tier validation.
//!
//! Runs in the entry-point service before any work is dispatched. The
//! decision is a pure function of the static limit table and the current
//! usage reading - two concurrent validates with the same inputs reach
//! the same outcome.

use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use nooble_actions::ErrorDetail;
use nooble_core::{ActionError, LimitKind, TenantId};
use nooble_fabric::{Store, StoreError};

use crate::model::{LimitValue, ResourceKey, Tier, TierLimits};
use crate::usage::UsageLedger;

/// A validation that failed against the tier policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TierLimitExceeded {
    pub kind: LimitKind,
    pub tier: Tier,
    pub resource: ResourceKey,
    pub message: String,
}

impl From<TierLimitExceeded> for ActionError {
    fn from(err: TierLimitExceeded) -> Self {
        ActionError::LimitExceeded {
            kind: err.kind,
            resource: err.resource.key_segment().to_string(),
            message: err.message,
        }
    }
}

impl From<&TierLimitExceeded> for ErrorDetail {
    fn from(err: &TierLimitExceeded) -> Self {
        ErrorDetail::new("tier_limit", err.kind.as_str(), err.message.clone()).with_details(json!({
            "tier": err.tier.as_str(),
            "resource": err.resource.as_str(),
        }))
    }
}

#[derive(Debug, Error)]
pub enum TierError {
    #[error(transparent)]
    Limit(#[from] TierLimitExceeded),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The limit table and the check disagree about the resource's shape.
    #[error("tier configuration error: {0}")]
    Config(String),
}

/// What the caller is asking the policy about.
#[derive(Debug, Copy, Clone)]
pub enum Requested<'a> {
    /// Consume `n` more units of a quota resource; checked against the
    /// usage ledger.
    Amount(u64),
    /// A prospective total the caller computed itself (e.g. collections
    /// already attached to one agent plus the new one); checked against
    /// the quota directly.
    Total(u64),
    /// Membership of a value in the allow-list.
    Value(&'a str),
    /// A boolean capability.
    Capability,
}

/// Upstream validation surface.
#[derive(Debug)]
pub struct TierValidator<S> {
    limits: TierLimits,
    usage: UsageLedger<S>,
}

impl<S: Store> TierValidator<S> {
    pub fn new(limits: TierLimits, usage: UsageLedger<S>) -> Self {
        Self { limits, usage }
    }

    pub fn limits(&self) -> &TierLimits {
        &self.limits
    }

    pub fn usage(&self) -> &UsageLedger<S> {
        &self.usage
    }

    /// Check `requested` for `tenant` against the `(tier, resource)` limit.
    ///
    /// Returns normally when allowed; [`TierError::Limit`] carries the
    /// denial kind (`QUOTA_EXCEEDED`, `VALUE_NOT_ALLOWED`,
    /// `CAPABILITY_DENIED`) otherwise.
    #[instrument(skip(self), fields(tenant = %tenant, tier = %tier, resource = %resource))]
    pub async fn validate(
        &self,
        tenant: &TenantId,
        tier: Tier,
        resource: ResourceKey,
        requested: Requested<'_>,
    ) -> Result<(), TierError> {
        let denial = |kind: LimitKind, message: String| {
            TierError::Limit(TierLimitExceeded {
                kind,
                tier,
                resource,
                message,
            })
        };

        match (self.limits.get(tier, resource), requested) {
            (LimitValue::Unlimited, _) => Ok(()),

            (LimitValue::Quota(limit), Requested::Amount(amount)) => {
                let current = self.usage.current(tenant, resource).await?;
                if current.saturating_add(amount) > limit {
                    Err(denial(
                        LimitKind::QuotaExceeded,
                        format!("{resource} quota {limit} reached (used {current})"),
                    ))
                } else {
                    Ok(())
                }
            }

            (LimitValue::Quota(limit), Requested::Total(total)) => {
                if total > limit {
                    Err(denial(
                        LimitKind::QuotaExceeded,
                        format!("{resource} quota {limit} reached (requested {total})"),
                    ))
                } else {
                    Ok(())
                }
            }

            (LimitValue::AllowList(allowed), Requested::Value(value)) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err(denial(
                        LimitKind::ValueNotAllowed,
                        format!("`{value}` is not allowed for {resource} on tier {tier}"),
                    ))
                }
            }

            (LimitValue::Capability(true), Requested::Capability) => Ok(()),
            (LimitValue::Capability(false), Requested::Capability) => Err(denial(
                LimitKind::CapabilityDenied,
                format!("{resource} is not available on tier {tier}"),
            )),

            (limit, requested) => Err(TierError::Config(format!(
                "{resource} is configured as {limit:?} but was checked with {requested:?}"
            ))),
        }
    }
}
