//! Tier engine: per-tenant quota enforcement for the Nooble platform.
//!
//! Deliberately split between two surfaces: upstream
//! [`TierValidator`](validate::TierValidator) runs in the entry-point
//! service before work is dispatched; downstream
//! [`UsageLedger`](usage::UsageLedger) accounts consumed resources after
//! the fact, in the service that actually did the work.

pub mod model;
pub mod usage;
pub mod validate;

#[cfg(test)]
mod integration_tests;

pub use model::{LimitValue, ResourceKey, Tier, TierLimits, UsageWindow};
pub use usage::UsageLedger;
pub use validate::{Requested, TierError, TierLimitExceeded, TierValidator};
