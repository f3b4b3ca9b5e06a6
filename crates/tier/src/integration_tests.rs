//! End-to-end tier denial: an exhausted quota turns into a pseudo-sync
//! failure response before any downstream work happens.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use nooble_actions::{
        ActionService, ActionType, DomainAction, ErrorDetail, NameBuilder,
    };
    use nooble_core::{ActionError, CorrelationId, ServiceName, TenantId};
    use nooble_fabric::{
        ActionWorker, FabricSettings, MemoryStore, TransportClient, TransportSettings,
    };

    use crate::model::{ResourceKey, Tier, TierLimits};
    use crate::usage::UsageLedger;
    use crate::validate::{Requested, TierError, TierValidator};

    /// Entry-point service: validates the tenant's tier before creating an
    /// agent, answering denials with a failure response.
    struct AgentManagementService {
        transport: TransportClient<MemoryStore>,
        validator: TierValidator<MemoryStore>,
        agents_created: AtomicUsize,
    }

    #[async_trait]
    impl ActionService for AgentManagementService {
        fn name(&self) -> &str {
            "management"
        }

        async fn process_action(&self, action: DomainAction) -> Result<(), ActionError> {
            let tenant = action
                .tenant_id()
                .cloned()
                .ok_or_else(|| ActionError::payload("tenant_id is required"))?;

            match self
                .validator
                .validate(&tenant, Tier::Free, ResourceKey::MaxAgents, Requested::Amount(1))
                .await
            {
                Ok(()) => {
                    self.agents_created.fetch_add(1, Ordering::SeqCst);
                    self.validator
                        .usage()
                        .record(&tenant, ResourceKey::MaxAgents, 1)
                        .await;
                    self.transport
                        .send_success_response(&action, json!({"agent_id": "agent-2"}))
                        .await
                        .map_err(|e| ActionError::business("RESPONSE_PUSH", e.to_string()))?;
                    Ok(())
                }
                Err(TierError::Limit(limit)) => {
                    self.transport
                        .send_failure_response(&action, ErrorDetail::from(&limit))
                        .await
                        .map_err(|e| ActionError::business("RESPONSE_PUSH", e.to_string()))?;
                    Ok(())
                }
                Err(other) => Err(ActionError::business("TIER_CHECK", other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn exhausted_quota_denies_upstream_without_downstream_work() {
        let store = Arc::new(MemoryStore::new());
        let tenant = TenantId::new("t1");

        // Free tier allows one agent, and one already exists.
        let ledger = UsageLedger::new(store.clone(), NameBuilder::default(), true);
        ledger.add(&tenant, ResourceKey::MaxAgents, 1).await.unwrap();

        let service = Arc::new(AgentManagementService {
            transport: TransportClient::new(
                store.clone(),
                NameBuilder::default(),
                ServiceName::new("management"),
                TransportSettings::default(),
            ),
            validator: TierValidator::new(
                TierLimits::builtin(),
                UsageLedger::new(store.clone(), NameBuilder::default(), true),
            ),
            agents_created: AtomicUsize::new(0),
        });

        let mut settings = FabricSettings::new("management");
        settings.worker.block_timeout = Duration::from_millis(50);
        settings.worker.consumer_id = Some("test-consumer".to_string());
        let handle = ActionWorker::new(store.clone(), service.clone(), settings)
            .spawn()
            .await
            .unwrap();

        let client = TransportClient::new(
            store.clone(),
            NameBuilder::default(),
            ServiceName::new("orchestrator"),
            TransportSettings::default(),
        );
        let request = DomainAction::new(
            ActionType::parse("management.agent.create").unwrap(),
            ServiceName::new("orchestrator"),
        )
        .with_tenant(tenant.clone())
        .with_correlation(CorrelationId::new("c5"));

        let response = client
            .send_pseudo_sync(request, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(!response.is_success());
        let error = response.error().unwrap();
        assert_eq!(error.error_code(), "QUOTA_EXCEEDED");
        assert_eq!(
            error.details().unwrap()["resource"],
            json!("MAX_AGENTS")
        );

        // No downstream work happened and the counter did not move.
        assert_eq!(service.agents_created.load(Ordering::SeqCst), 0);
        assert_eq!(
            ledger.current(&tenant, ResourceKey::MaxAgents).await.unwrap(),
            1
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn allowed_quota_creates_the_agent_and_records_usage() {
        let store = Arc::new(MemoryStore::new());
        let tenant = TenantId::new("t2");

        let service = Arc::new(AgentManagementService {
            transport: TransportClient::new(
                store.clone(),
                NameBuilder::default(),
                ServiceName::new("management"),
                TransportSettings::default(),
            ),
            validator: TierValidator::new(
                TierLimits::builtin(),
                UsageLedger::new(store.clone(), NameBuilder::default(), true),
            ),
            agents_created: AtomicUsize::new(0),
        });

        let mut settings = FabricSettings::new("management");
        settings.worker.block_timeout = Duration::from_millis(50);
        settings.worker.consumer_id = Some("test-consumer".to_string());
        let handle = ActionWorker::new(store.clone(), service.clone(), settings)
            .spawn()
            .await
            .unwrap();

        let client = TransportClient::new(
            store.clone(),
            NameBuilder::default(),
            ServiceName::new("orchestrator"),
            TransportSettings::default(),
        );
        let request = DomainAction::new(
            ActionType::parse("management.agent.create").unwrap(),
            ServiceName::new("orchestrator"),
        )
        .with_tenant(tenant.clone());

        let response = client
            .send_pseudo_sync(request, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(service.agents_created.load(Ordering::SeqCst), 1);

        let ledger = UsageLedger::new(store.clone(), NameBuilder::default(), true);
        assert_eq!(
            ledger.current(&tenant, ResourceKey::MaxAgents).await.unwrap(),
            1
        );

        handle.shutdown().await;
    }
}
