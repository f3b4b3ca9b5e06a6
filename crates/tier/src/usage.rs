//! Downstream usage accounting.
//!
//! Counters live in the shared store under
//! `{prefix}:{env}:tier:usage:{tenant}:{resource}[:{window}]` - one key
//! per calendar window, written with a single atomic increment. Rolling to
//! a fresh key at the window boundary is what makes the reset atomic. The
//! counters are the one piece of cross-service-written state in the
//! platform, and always go through this ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use nooble_actions::NameBuilder;
use nooble_core::TenantId;

use nooble_fabric::{Store, StoreError};

use crate::model::ResourceKey;

/// Reads and writes per-tenant usage counters.
#[derive(Debug)]
pub struct UsageLedger<S> {
    store: Arc<S>,
    names: NameBuilder,
    enabled: bool,
}

impl<S: Store> UsageLedger<S> {
    /// `enabled` is the `tier.usage_tracking_enabled` master switch; when
    /// off, [`UsageLedger::record`] becomes a no-op.
    pub fn new(store: Arc<S>, names: NameBuilder, enabled: bool) -> Self {
        Self {
            store,
            names,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn key(&self, tenant: &TenantId, resource: ResourceKey, at: DateTime<Utc>) -> String {
        let window = resource.window().map(|w| w.suffix(at));
        self.names
            .usage_key(tenant.as_str(), resource.key_segment(), window.as_deref())
    }

    /// Current usage in the window containing now (0 when unset).
    pub async fn current(
        &self,
        tenant: &TenantId,
        resource: ResourceKey,
    ) -> Result<u64, StoreError> {
        self.current_at(tenant, resource, Utc::now()).await
    }

    /// Current usage in the window containing `at`.
    pub async fn current_at(
        &self,
        tenant: &TenantId,
        resource: ResourceKey,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let raw = self.store.get_value(&self.key(tenant, resource, at)).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Atomically add `amount` to the window counter; returns the new
    /// total. The window TTL is pinned when the increment creates the key.
    pub async fn add(
        &self,
        tenant: &TenantId,
        resource: ResourceKey,
        amount: u64,
    ) -> Result<u64, StoreError> {
        self.add_at(tenant, resource, amount, Utc::now()).await
    }

    /// Like [`UsageLedger::add`] with an explicit clock, for window tests.
    pub async fn add_at(
        &self,
        tenant: &TenantId,
        resource: ResourceKey,
        amount: u64,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let ttl = resource.window().map(|w| w.retention());
        self.store
            .increment(&self.key(tenant, resource, at), amount, ttl)
            .await
    }

    /// Downstream accounting entry point: record consumption after the
    /// work succeeded. Must never fail the user-visible path - store
    /// errors are logged and swallowed.
    pub async fn record(&self, tenant: &TenantId, resource: ResourceKey, amount: u64) {
        if !self.enabled || amount == 0 {
            return;
        }
        match self.add(tenant, resource, amount).await {
            Ok(total) => {
                debug!(
                    tenant = %tenant,
                    resource = %resource,
                    amount,
                    total,
                    "usage recorded"
                );
            }
            Err(err) => {
                warn!(
                    tenant = %tenant,
                    resource = %resource,
                    amount,
                    error = %err,
                    "usage recording failed, dropping sample"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use nooble_fabric::MemoryStore;
    use std::time::Duration;

    fn ledger(store: Arc<MemoryStore>) -> UsageLedger<MemoryStore> {
        UsageLedger::new(store, NameBuilder::default(), true)
    }

    fn tenant() -> TenantId {
        TenantId::new("t1")
    }

    #[tokio::test]
    async fn counters_are_monotonic_within_a_window() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store);
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 15, 0).unwrap();

        let mut last = 0;
        for step in [1u64, 4, 2, 10] {
            let total = ledger
                .add_at(&tenant(), ResourceKey::QueriesPerHour, step, at)
                .await
                .unwrap();
            assert!(total > last);
            last = total;
        }
        assert_eq!(
            ledger
                .current_at(&tenant(), ResourceKey::QueriesPerHour, at)
                .await
                .unwrap(),
            17
        );
    }

    #[tokio::test]
    async fn window_boundary_resets_the_counter() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store);
        let in_window = Utc.with_ymd_and_hms(2026, 8, 1, 12, 59, 0).unwrap();
        let next_window = Utc.with_ymd_and_hms(2026, 8, 1, 13, 0, 1).unwrap();

        ledger
            .add_at(&tenant(), ResourceKey::QueriesPerHour, 49, in_window)
            .await
            .unwrap();

        assert_eq!(
            ledger
                .current_at(&tenant(), ResourceKey::QueriesPerHour, in_window)
                .await
                .unwrap(),
            49
        );
        // A fresh key, so the next window starts at zero.
        assert_eq!(
            ledger
                .current_at(&tenant(), ResourceKey::QueriesPerHour, next_window)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn windowless_resources_accumulate_without_suffix() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());

        ledger
            .record(&tenant(), ResourceKey::MaxAgents, 1)
            .await;
        assert_eq!(
            store
                .get_value("nooble4:dev:tier:usage:t1:max_agents")
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn disabled_ledger_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let ledger = UsageLedger::new(store.clone(), NameBuilder::default(), false);

        ledger.record(&tenant(), ResourceKey::MaxAgents, 1).await;
        assert_eq!(
            ledger
                .current(&tenant(), ResourceKey::MaxAgents)
                .await
                .unwrap(),
            0
        );
    }

    /// A store that is always down, for swallow-and-log behavior.
    struct OfflineStore;

    macro_rules! offline {
        () => {
            Err(StoreError::Connection("store offline".to_string()))
        };
    }

    #[async_trait]
    impl Store for OfflineStore {
        async fn append_stream(&self, _: &str, _: &str) -> Result<String, StoreError> {
            offline!()
        }
        async fn ensure_group(&self, _: &str, _: &str) -> Result<(), StoreError> {
            offline!()
        }
        async fn read_group(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: usize,
            _: Duration,
        ) -> Result<Vec<nooble_fabric::StreamEntry>, StoreError> {
            offline!()
        }
        async fn ack(&self, _: &str, _: &str, _: &[String]) -> Result<u64, StoreError> {
            offline!()
        }
        async fn claim_idle(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Duration,
            _: usize,
        ) -> Result<Vec<nooble_fabric::StreamEntry>, StoreError> {
            offline!()
        }
        async fn pending_count(&self, _: &str, _: &str) -> Result<u64, StoreError> {
            offline!()
        }
        async fn push_list(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            offline!()
        }
        async fn pop_list(&self, _: &str, _: Duration) -> Result<Option<String>, StoreError> {
            offline!()
        }
        async fn publish(&self, _: &str, _: &str) -> Result<(), StoreError> {
            offline!()
        }
        async fn get_value(&self, _: &str) -> Result<Option<String>, StoreError> {
            offline!()
        }
        async fn set_value(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            offline!()
        }
        async fn delete_value(&self, _: &str) -> Result<bool, StoreError> {
            offline!()
        }
        async fn increment(
            &self,
            _: &str,
            _: u64,
            _: Option<Duration>,
        ) -> Result<u64, StoreError> {
            offline!()
        }
    }

    #[tokio::test]
    async fn record_swallows_store_failures() {
        let ledger = UsageLedger::new(Arc::new(OfflineStore), NameBuilder::default(), true);
        // Must not panic or propagate; the caller's response is not at risk.
        ledger.record(&tenant(), ResourceKey::QueriesPerHour, 1).await;
    }
}
