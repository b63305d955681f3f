//! Component Handshake Protocol: quorum-acknowledged onboarding of a new or
//! upgraded component. Not a networked bridge — see `coordinator` module docs and DESIGN.md
//! for why this in-process design was chosen over a gRPC/mTLS federation layer.

pub mod coordinator;
pub mod error;

pub use coordinator::HandshakeCoordinator;
pub use error::{HandshakeError, HandshakeResult};

#[cfg(test)]
mod tests {
    use super::*;
    use grace_core::{
        AuditLog, ComponentStatus, CryptoEngine, EventMesh, GovernanceEngine, HandshakeRequest,
        Manifest, Policy, PolicyDecision, TrustLevel,
    };
    use grace_logic_hub::UnifiedLogicHub;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_setup() -> (Arc<UnifiedLogicHub>, Arc<Manifest>, Arc<AuditLog>, Arc<EventMesh>) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let crypto = CryptoEngine::generate();
        let audit = AuditLog::open(&db, crypto.clone()).unwrap();
        let mesh = EventMesh::new(100);
        let governance = Arc::new(GovernanceEngine::new(vec![Policy {
            name: "allow_all".into(),
            resource_pattern: "logic_hub".into(),
            action_pattern: "apply_update".into(),
            decision: PolicyDecision::Allow,
            conditions: vec![],
            priority: 1,
            description: "allow everything".into(),
        }]));
        let (hub, rollback_rx, stabilize_rx) =
            UnifiedLogicHub::new(governance, crypto, audit.clone(), mesh.clone());
        hub.clone().spawn_rollback_drain(rollback_rx);
        hub.clone().spawn_stabilize_drain(stabilize_rx);
        let manifest = Manifest::new(mesh.clone(), Duration::from_secs(60));
        (hub, manifest, audit, mesh)
    }

    fn sample_request() -> HandshakeRequest {
        HandshakeRequest {
            component_id: "new_ml_model_v2".into(),
            component_type: "ml_model".into(),
            capabilities: vec!["inference".into()],
            expected_metrics: vec!["latency_ms".into()],
            version: "2.0.0".into(),
            signature: None,
            required_acks: Some(vec!["governance".into(), "memory".into()]),
            trust_level: Some(TrustLevel::Low),
        }
    }

    #[tokio::test]
    async fn quorum_reached_registers_component() {
        let (hub, manifest, audit, mesh) = test_setup();
        let coordinator = HandshakeCoordinator::new(
            hub,
            manifest.clone(),
            audit,
            mesh.clone(),
            vec!["governance".into(), "memory".into()],
            Duration::from_millis(500),
        );
        coordinator.spawn_ack_listener();

        let update_id = coordinator.initiate(sample_request()).await.unwrap();

        mesh.publish(grace_core::Event::new(
            "handshake_ack",
            "governance",
            serde_json::json!({ "update_id": update_id, "acker": "governance" }),
        ))
        .await;
        mesh.publish(grace_core::Event::new(
            "handshake_ack",
            "memory",
            serde_json::json!({ "update_id": update_id, "acker": "memory" }),
        ))
        .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = manifest.get("new_ml_model_v2").unwrap();
        assert_eq!(record.status, ComponentStatus::Created);
        assert_eq!(record.trust_level, TrustLevel::Low);
    }

    #[tokio::test]
    async fn quorum_timeout_leaves_manifest_unchanged() {
        let (hub, manifest, audit, mesh) = test_setup();
        let coordinator = HandshakeCoordinator::new(
            hub.clone(),
            manifest.clone(),
            audit,
            mesh.clone(),
            vec!["governance".into(), "memory".into(), "crypto".into()],
            Duration::from_millis(100),
        );
        coordinator.spawn_ack_listener();

        let mut request = sample_request();
        request.component_id = "partial_acker".into();
        request.required_acks = Some(vec!["governance".into(), "memory".into(), "crypto".into()]);
        let update_id = coordinator.initiate(request).await.unwrap();

        mesh.publish(grace_core::Event::new(
            "handshake_ack",
            "governance",
            serde_json::json!({ "update_id": update_id, "acker": "governance" }),
        ))
        .await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(manifest.get("partial_acker").is_none());
        let update = hub.get(&update_id).unwrap();
        assert_eq!(update.status, grace_logic_hub::UpdateStatus::Failed);
    }
}
