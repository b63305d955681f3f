//! Memory Fusion Gateway: the governed, signed, audited path for every memory
//! fetch and store, across pluggable backends the Gateway itself never implements.

pub mod backend;
pub mod error;
pub mod gateway;

pub use backend::{BackendFetchResult, InMemoryBackend, MemoryBackend, MemoryItem, SledBackend};
pub use error::{MemoryError, MemoryResult};
pub use gateway::{
    FetchRequest, FetchResponse, FetchedItem, MemoryFusionGateway, StoreRequest, StoreResponse,
    VerifyFetchResponse,
};

#[cfg(test)]
mod tests {
    use super::*;
    use grace_core::{AuditLog, CryptoEngine, EventMesh, GovernanceEngine};
    use serde_json::json;
    use std::sync::Arc;

    fn test_gateway() -> MemoryFusionGateway {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let crypto = CryptoEngine::generate();
        let audit = AuditLog::open(&db, crypto.clone()).unwrap();
        let mesh = EventMesh::new(100);
        let governance = Arc::new(GovernanceEngine::new(vec![]));
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::new("fast"));
        MemoryFusionGateway::new(
            vec![("fast".to_string(), backend)],
            governance,
            crypto,
            audit,
            mesh,
        )
    }

    #[tokio::test]
    async fn store_then_fetch_round_trips() {
        let gw = test_gateway();
        gw.store(StoreRequest {
            user: "alice".into(),
            domain: "knowledge".into(),
            backend: None,
            content: json!({"text": "meeting notes from standup"}),
            metadata: json!({}),
        })
        .await
        .unwrap();

        let resp = gw
            .fetch(FetchRequest {
                user: "alice".into(),
                domain: "knowledge".into(),
                query: "meeting".into(),
                limit: 5,
            })
            .await
            .unwrap();

        assert_eq!(resp.total_results, 1);
        assert!(resp.data[0].signature_valid);
        assert_eq!(resp.data[0].fetch_crypto_id, resp.crypto_id);
    }

    #[tokio::test]
    async fn fetch_flags_tampered_item_but_still_returns_it() {
        let crypto = CryptoEngine::generate();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let audit = AuditLog::open(&db, crypto.clone()).unwrap();
        let mesh = EventMesh::new(100);
        let governance = Arc::new(GovernanceEngine::new(vec![]));
        let backend = Arc::new(InMemoryBackend::new("fast"));
        // Persist an item under a signature that doesn't cover its actual content, simulating
        // a record tampered with after it was signed.
        let bogus_signature = crypto.sign(b"not the item content");
        backend
            .store(
                "item1",
                "knowledge",
                json!({"text": "tampered notes"}),
                json!({}),
                bogus_signature,
            )
            .await
            .unwrap();

        let gw = MemoryFusionGateway::new(
            vec![("fast".to_string(), backend as Arc<dyn MemoryBackend>)],
            governance,
            crypto,
            audit,
            mesh,
        );
        let resp = gw
            .fetch(FetchRequest {
                user: "alice".into(),
                domain: "knowledge".into(),
                query: "tampered".into(),
                limit: 5,
            })
            .await
            .unwrap();

        assert_eq!(resp.total_results, 1);
        assert!(!resp.data[0].signature_valid);
    }

    #[tokio::test]
    async fn governance_deny_blocks_fetch() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let crypto = CryptoEngine::generate();
        let audit = AuditLog::open(&db, crypto.clone()).unwrap();
        let mesh = EventMesh::new(100);
        let governance = Arc::new(GovernanceEngine::new(vec![grace_core::Policy {
            name: "deny_all".into(),
            resource_pattern: "*".into(),
            action_pattern: "*".into(),
            decision: grace_core::PolicyDecision::Deny,
            conditions: vec![],
            priority: 100,
            description: "deny everything".into(),
        }]));
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::new("fast"));
        let gw = MemoryFusionGateway::new(
            vec![("fast".to_string(), backend)],
            governance,
            crypto,
            audit,
            mesh,
        );

        let result = gw
            .fetch(FetchRequest {
                user: "bob".into(),
                domain: "knowledge".into(),
                query: "".into(),
                limit: 5,
            })
            .await;
        assert!(matches!(result, Err(MemoryError::MemoryAccessDenied { .. })));
    }
}
