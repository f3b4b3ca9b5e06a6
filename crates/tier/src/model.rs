//! Tier vocabulary: subscription levels, governed resources, and the
//! limit table.
//!
//! The table is in-process and small (well under a thousand entries). A
//! deployment may load overrides from JSON configuration at startup;
//! lookups fall back to the built-in table, which is total over
//! (tier x resource).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription level of a tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Advance,
    Professional,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Advance => "advance",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "advance" => Ok(Tier::Advance),
            "professional" => Ok(Tier::Professional),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Calendar-aligned accounting window of a rate-type resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageWindow {
    Hourly,
    Daily,
    Monthly,
}

impl UsageWindow {
    /// Key suffix identifying the window containing `at`. A new suffix per
    /// window is what resets counters atomically at the boundary.
    pub fn suffix(&self, at: DateTime<Utc>) -> String {
        let format = match self {
            UsageWindow::Hourly => "%Y%m%d%H",
            UsageWindow::Daily => "%Y%m%d",
            UsageWindow::Monthly => "%Y%m",
        };
        at.format(format).to_string()
    }

    /// TTL for a window's counter key: the window length plus slack, so a
    /// just-closed window stays readable briefly.
    pub fn retention(&self) -> Duration {
        match self {
            UsageWindow::Hourly => Duration::from_secs(2 * 3_600),
            UsageWindow::Daily => Duration::from_secs(2 * 24 * 3_600),
            UsageWindow::Monthly => Duration::from_secs(40 * 24 * 3_600),
        }
    }
}

/// A tier-governed resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKey {
    MaxAgents,
    QueriesPerHour,
    EmbeddingsTokens,
    AllowedLlmModels,
    MaxCollectionsPerAgent,
    CanUseCustomPrompts,
}

impl ResourceKey {
    pub const ALL: [ResourceKey; 6] = [
        ResourceKey::MaxAgents,
        ResourceKey::QueriesPerHour,
        ResourceKey::EmbeddingsTokens,
        ResourceKey::AllowedLlmModels,
        ResourceKey::MaxCollectionsPerAgent,
        ResourceKey::CanUseCustomPrompts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKey::MaxAgents => "MAX_AGENTS",
            ResourceKey::QueriesPerHour => "QUERIES_PER_HOUR",
            ResourceKey::EmbeddingsTokens => "EMBEDDINGS_TOKENS",
            ResourceKey::AllowedLlmModels => "ALLOWED_LLM_MODELS",
            ResourceKey::MaxCollectionsPerAgent => "MAX_COLLECTIONS_PER_AGENT",
            ResourceKey::CanUseCustomPrompts => "CAN_USE_CUSTOM_PROMPTS",
        }
    }

    /// Segment used in usage counter keys.
    pub fn key_segment(&self) -> &'static str {
        match self {
            ResourceKey::MaxAgents => "max_agents",
            ResourceKey::QueriesPerHour => "queries_per_hour",
            ResourceKey::EmbeddingsTokens => "embeddings_tokens",
            ResourceKey::AllowedLlmModels => "allowed_llm_models",
            ResourceKey::MaxCollectionsPerAgent => "max_collections_per_agent",
            ResourceKey::CanUseCustomPrompts => "can_use_custom_prompts",
        }
    }

    /// Accounting window, when the resource is rate-like. Windowless
    /// resources (live object counts, allow-lists, capabilities) have no
    /// suffix and no TTL.
    pub fn window(&self) -> Option<UsageWindow> {
        match self {
            ResourceKey::QueriesPerHour => Some(UsageWindow::Hourly),
            ResourceKey::EmbeddingsTokens => Some(UsageWindow::Monthly),
            _ => None,
        }
    }
}

impl core::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tier allows for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitValue {
    /// Quantitative quota.
    Quota(u64),
    /// Allowed values (e.g. permitted model names).
    AllowList(BTreeSet<String>),
    /// Boolean capability switch.
    Capability(bool),
    /// No restriction.
    Unlimited,
}

/// The limit table: `(tier, resource) -> limit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierLimits {
    overrides: BTreeMap<Tier, BTreeMap<ResourceKey, LimitValue>>,
}

impl TierLimits {
    /// The built-in table with no configuration overrides.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Load configuration overrides from JSON, e.g.
    /// `{"free": {"MAX_AGENTS": {"quota": 2}}}`. Resources not mentioned
    /// keep their built-in limits.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with_limit(mut self, tier: Tier, resource: ResourceKey, limit: LimitValue) -> Self {
        self.overrides.entry(tier).or_default().insert(resource, limit);
        self
    }

    /// Effective limit for `(tier, resource)`.
    pub fn get(&self, tier: Tier, resource: ResourceKey) -> LimitValue {
        self.overrides
            .get(&tier)
            .and_then(|limits| limits.get(&resource))
            .cloned()
            .unwrap_or_else(|| builtin_limit(tier, resource))
    }
}

fn allow_list<const N: usize>(models: [&str; N]) -> LimitValue {
    LimitValue::AllowList(models.iter().map(|m| m.to_string()).collect())
}

fn builtin_limit(tier: Tier, resource: ResourceKey) -> LimitValue {
    use LimitValue::{Capability, Quota, Unlimited};
    use ResourceKey::*;
    use Tier::*;

    match (tier, resource) {
        (Free, MaxAgents) => Quota(1),
        (Free, QueriesPerHour) => Quota(50),
        (Free, EmbeddingsTokens) => Quota(100_000),
        (Free, AllowedLlmModels) => allow_list(["gpt-4o-mini"]),
        (Free, MaxCollectionsPerAgent) => Quota(1),
        (Free, CanUseCustomPrompts) => Capability(false),

        (Advance, MaxAgents) => Quota(5),
        (Advance, QueriesPerHour) => Quota(500),
        (Advance, EmbeddingsTokens) => Quota(1_000_000),
        (Advance, AllowedLlmModels) => allow_list(["gpt-4o-mini", "gpt-4o"]),
        (Advance, MaxCollectionsPerAgent) => Quota(3),
        (Advance, CanUseCustomPrompts) => Capability(true),

        (Professional, MaxAgents) => Quota(20),
        (Professional, QueriesPerHour) => Quota(5_000),
        (Professional, EmbeddingsTokens) => Quota(10_000_000),
        (Professional, AllowedLlmModels) => {
            allow_list(["gpt-4o-mini", "gpt-4o", "claude-3-5-sonnet"])
        }
        (Professional, MaxCollectionsPerAgent) => Quota(10),
        (Professional, CanUseCustomPrompts) => Capability(true),

        (Enterprise, CanUseCustomPrompts) => Capability(true),
        (Enterprise, _) => Unlimited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_suffixes_are_calendar_aligned() {
        let before = Utc.with_ymd_and_hms(2026, 8, 1, 12, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 13, 0, 0).unwrap();

        assert_eq!(UsageWindow::Hourly.suffix(before), "2026080112");
        assert_eq!(UsageWindow::Hourly.suffix(after), "2026080113");
        assert_eq!(UsageWindow::Daily.suffix(before), "20260801");
        assert_eq!(UsageWindow::Monthly.suffix(before), "202608");
    }

    #[test]
    fn builtin_table_is_total() {
        let limits = TierLimits::builtin();
        for tier in [Tier::Free, Tier::Advance, Tier::Professional, Tier::Enterprise] {
            for resource in ResourceKey::ALL {
                // Every lookup resolves; none would panic downstream.
                let _ = limits.get(tier, resource);
            }
        }
    }

    #[test]
    fn overrides_shadow_builtins_per_resource() {
        let limits = TierLimits::from_json(r#"{"free": {"MAX_AGENTS": {"quota": 2}}}"#).unwrap();

        assert_eq!(
            limits.get(Tier::Free, ResourceKey::MaxAgents),
            LimitValue::Quota(2)
        );
        // Untouched resources keep their builtin limits.
        assert_eq!(
            limits.get(Tier::Free, ResourceKey::QueriesPerHour),
            LimitValue::Quota(50)
        );
        assert_eq!(
            limits.get(Tier::Enterprise, ResourceKey::MaxAgents),
            LimitValue::Unlimited
        );
    }

    #[test]
    fn limit_values_round_trip_through_config_json() {
        let limits = TierLimits::builtin()
            .with_limit(
                Tier::Free,
                ResourceKey::AllowedLlmModels,
                LimitValue::AllowList(BTreeSet::from(["local-llm".to_string()])),
            )
            .with_limit(
                Tier::Free,
                ResourceKey::CanUseCustomPrompts,
                LimitValue::Capability(true),
            );

        let json = serde_json::to_string(&limits).unwrap();
        assert_eq!(TierLimits::from_json(&json).unwrap(), limits);
    }

    #[test]
    fn tier_parses_from_its_lowercase_name() {
        assert_eq!("professional".parse::<Tier>().unwrap(), Tier::Professional);
        assert!("platinum".parse::<Tier>().is_err());
        assert_eq!(
            serde_json::to_string(&Tier::Advance).unwrap(),
            "\"advance\""
        );
    }
}
