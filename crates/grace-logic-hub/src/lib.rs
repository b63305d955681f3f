//! Unified Logic Hub: the single path by which any schema, code module,
//! playbook, config, or metric definition enters the system.

pub mod error;
pub mod genetic_memory;
pub mod hub;
pub mod registry;
pub mod types;
pub mod validation;

pub use error::{HubError, HubResult};
pub use genetic_memory::{DeadEndRecord, GeneticMemory};
pub use hub::{RollbackRequest, StabilizeRequest, StageTimeouts, UnifiedLogicHub};
pub use registry::UpdateRegistry;
pub use types::{
    HubStats, LogicUpdate, Package, RiskLevel, RollbackInstructions, StageTimestamps,
    SubmitRequest, UpdateStatus, UpdateType, ValidationDiagnostics,
};

#[cfg(test)]
mod tests {
    use super::*;
    use grace_core::{AuditLog, CryptoEngine, EventMesh, GovernanceEngine, Policy, PolicyDecision};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_hub() -> Arc<UnifiedLogicHub> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let crypto = CryptoEngine::generate();
        let audit = AuditLog::open(&db, crypto.clone()).unwrap();
        let mesh = EventMesh::new(100);
        let governance = Arc::new(GovernanceEngine::new(vec![Policy {
            name: "allow_all_updates".into(),
            resource_pattern: "logic_hub".into(),
            action_pattern: "apply_update".into(),
            decision: PolicyDecision::Allow,
            conditions: vec![],
            priority: 1,
            description: "allow all logic updates".into(),
        }]));
        let (hub, rollback_rx, stabilize_rx) = UnifiedLogicHub::new(governance, crypto, audit, mesh);
        hub.clone().spawn_rollback_drain(rollback_rx);
        hub.clone().spawn_stabilize_drain(stabilize_rx);
        hub
    }

    #[tokio::test]
    async fn low_risk_config_update_reaches_distributed() {
        let hub = test_hub();
        let update_id = hub
            .submit(SubmitRequest {
                update_type: UpdateType::Config,
                component_targets: vec!["metrics_collector".into()],
                content: json!({ "aggregation_interval": 60 }),
                created_by: "test".into(),
                risk_level: RiskLevel::Low,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let update = hub.get(&update_id).unwrap();
        assert_eq!(update.status, UpdateStatus::Observing);
        assert!(update.checksum.is_some());
        assert!(update.audit_refs.len() >= 2);
    }

    #[tokio::test]
    async fn oversized_content_rejected_at_ingestion() {
        let hub = test_hub();
        let huge = "x".repeat(types::MAX_CONTENT_BYTES + 10);
        let result = hub
            .submit(SubmitRequest {
                update_type: UpdateType::Config,
                component_targets: vec!["x".into()],
                content: json!({ "blob": huge }),
                created_by: "test".into(),
                risk_level: RiskLevel::Low,
            })
            .await;
        assert!(matches!(result, Err(HubError::IngestionRejected)));
    }

    #[tokio::test]
    async fn breaking_schema_change_fails_validation() {
        let hub = test_hub();
        // First submit establishes the "previous" version for this target key.
        let first = hub
            .submit(SubmitRequest {
                update_type: UpdateType::Schema,
                component_targets: vec!["memory_schema".into()],
                content: json!({ "id": "string", "name": "string" }),
                created_by: "test".into(),
                risk_level: RiskLevel::Medium,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hub.get(&first).unwrap().status, UpdateStatus::Observing);

        let second = hub
            .submit(SubmitRequest {
                update_type: UpdateType::Schema,
                component_targets: vec!["memory_schema".into()],
                content: json!({ "id": "string" }),
                created_by: "test".into(),
                risk_level: RiskLevel::Medium,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let update = hub.get(&second).unwrap();
        assert_eq!(update.status, UpdateStatus::Failed);
        assert!(update.validation.unwrap().breaking_change);
    }
}
