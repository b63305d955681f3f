//! Memory Fusion Gateway: the single gated path for memory reads and writes.
//! Never a backend itself — ranking and relevance scoring stay with each backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use grace_core::{AppendRequest, AuditLog, CryptoEngine, Event, EventMesh, GovernanceEngine, Priority, SignedPayload};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::backend::{signable_bytes, MemoryBackend};
use crate::error::{MemoryError, MemoryResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedItem {
    pub id: String,
    pub content: Value,
    pub metadata: Value,
    pub score: f32,
    pub fetch_crypto_id: String,
    pub logic_update_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub fetch_session_id: String,
    pub signature_valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    pub data: Vec<FetchedItem>,
    pub crypto_id: String,
    pub logic_update_id: Option<String>,
    pub signature: SignedPayload,
    pub audit_ref: u64,
    pub fetch_session_id: String,
    pub governance_approved: bool,
    pub total_results: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreResponse {
    pub crypto_id: String,
    pub signature: SignedPayload,
    pub audit_ref: u64,
    pub item_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchRequest {
    pub user: String,
    pub domain: String,
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreRequest {
    pub user: String,
    pub domain: String,
    pub backend: Option<String>,
    pub content: Value,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyFetchResponse {
    pub valid: bool,
    pub audit_trail_found: bool,
}

pub struct MemoryFusionGateway {
    backends: Vec<(String, Arc<dyn MemoryBackend>)>,
    governance: Arc<GovernanceEngine>,
    crypto: CryptoEngine,
    audit: Arc<AuditLog>,
    mesh: Arc<EventMesh>,
}

impl MemoryFusionGateway {
    pub fn new(
        backends: Vec<(String, Arc<dyn MemoryBackend>)>,
        governance: Arc<GovernanceEngine>,
        crypto: CryptoEngine,
        audit: Arc<AuditLog>,
        mesh: Arc<EventMesh>,
    ) -> Self {
        Self {
            backends,
            governance,
            crypto,
            audit,
            mesh,
        }
    }

    /// The 7 mandatory fetch stages: authenticate, governance check, crypto sign, route,
    /// enrich, audit, return.
    pub async fn fetch(&self, req: FetchRequest) -> MemoryResult<FetchResponse> {
        // 1. Authenticate — generate fetch_session_id.
        let fetch_session_id = Uuid::new_v4().to_string();

        // 2. Governance check.
        let context = json!({ "user": req.user, "domain": req.domain, "query": req.query });
        let decision = self
            .governance
            .check("fetch_memory", &req.domain, &context);
        if decision.decision == grace_core::PolicyDecision::Deny {
            self.audit
                .append(AppendRequest {
                    actor: &req.user,
                    action: "memory_fetch_gateway",
                    subsystem: "grace-memory",
                    resource: &req.domain,
                    payload: json!({ "fetch_session_id": fetch_session_id, "query": req.query }),
                    result: "denied",
                })
                .await?;
            return Err(MemoryError::MemoryAccessDenied {
                reason: decision.reason,
            });
        }
        let governance_approved = decision.decision == grace_core::PolicyDecision::Allow;

        // 3. Crypto sign — bind crypto_id + signature to the request.
        let crypto_id = Uuid::new_v4().to_string();
        let signable = format!("{fetch_session_id}:{crypto_id}:{}:{}", req.domain, req.query);
        let signature = self.crypto.sign(signable.as_bytes());

        // 4. Route — try backends in declared preference order.
        let mut items = Vec::new();
        let mut logic_update_id = None;
        let mut any_backend_responded = false;
        for (_, backend) in &self.backends {
            match backend.fetch(&req.domain, &req.query, req.limit).await {
                Ok(result) => {
                    any_backend_responded = true;
                    if logic_update_id.is_none() {
                        logic_update_id = result.logic_update_id;
                    }
                    items.extend(result.items);
                    if items.len() >= req.limit {
                        break;
                    }
                }
                Err(err) => {
                    warn!(target: "grace::memory", backend = backend.name(), %err, "backend fetch failed, trying next");
                }
            }
        }
        if !any_backend_responded {
            return Err(MemoryError::MemoryBackendUnavailable);
        }
        items.truncate(req.limit);

        // 5. Enrich — annotate each result.
        let fetched_at = Utc::now();
        let data: Vec<FetchedItem> = items
            .into_iter()
            .map(|item| {
                let item_signable = signable_bytes(&req.domain, &item.id, &item.content);
                let signature_valid = grace_core::crypto::verify_detached(
                    &item_signable,
                    &item.signature,
                )
                .unwrap_or(false);
                if !signature_valid {
                    warn!(target: "grace::memory", item_id = %item.id, "returned item failed signature verification");
                }
                FetchedItem {
                    id: item.id,
                    content: item.content,
                    metadata: item.metadata,
                    score: item.score,
                    fetch_crypto_id: crypto_id.clone(),
                    logic_update_id: logic_update_id.clone(),
                    fetched_at,
                    fetch_session_id: fetch_session_id.clone(),
                    signature_valid,
                }
            })
            .collect();

        // 6. Audit + publish.
        let audit_ref = self
            .audit
            .append(AppendRequest {
                actor: &req.user,
                action: "memory_fetch_gateway",
                subsystem: "grace-memory",
                resource: &req.domain,
                payload: json!({
                    "fetch_session_id": fetch_session_id,
                    "crypto_id": crypto_id,
                    "query": req.query,
                    "result_count": data.len(),
                }),
                result: "allowed",
            })
            .await?;
        self.mesh
            .publish(Event::new(
                "memory.fetched",
                "grace-memory",
                json!({ "fetch_session_id": fetch_session_id, "domain": req.domain }),
            ))
            .await;

        // 7. Return.
        let total_results = data.len();
        Ok(FetchResponse {
            data,
            crypto_id,
            logic_update_id,
            signature,
            audit_ref,
            fetch_session_id,
            governance_approved,
            total_results,
        })
    }

    pub async fn store(&self, req: StoreRequest) -> MemoryResult<StoreResponse> {
        let context = json!({ "user": req.user, "domain": req.domain });
        let decision = self.governance.check("store_memory", &req.domain, &context);
        if decision.decision == grace_core::PolicyDecision::Deny {
            return Err(MemoryError::MemoryAccessDenied {
                reason: decision.reason,
            });
        }

        let backend = match &req.backend {
            Some(name) => self.backends.iter().find(|(n, _)| n == name),
            None => self.backends.first(),
        }
        .map(|(_, b)| b.clone())
        .ok_or(MemoryError::MemoryBackendUnavailable)?;

        let item_id = Uuid::new_v4().to_string();
        let item_signature = self
            .crypto
            .sign(&signable_bytes(&req.domain, &item_id, &req.content));
        backend
            .store(
                &item_id,
                &req.domain,
                req.content.clone(),
                req.metadata.clone(),
                item_signature,
            )
            .await?;

        let crypto_id = Uuid::new_v4().to_string();
        let signable = format!("{crypto_id}:{}:{item_id}", req.domain);
        let signature = self.crypto.sign(signable.as_bytes());

        let audit_ref = self
            .audit
            .append(AppendRequest {
                actor: &req.user,
                action: "memory_store",
                subsystem: "grace-memory",
                resource: &req.domain,
                payload: json!({ "item_id": item_id, "crypto_id": crypto_id }),
                result: "allowed",
            })
            .await?;
        self.mesh
            .publish(Event::new(
                "memory.stored",
                "grace-memory",
                json!({ "item_id": item_id, "domain": req.domain }),
            ))
            .await;

        Ok(StoreResponse {
            crypto_id,
            signature,
            audit_ref,
            item_id,
        })
    }

    /// `POST /memory/verify-fetch`: proves a previously returned fetch was legitimate by
    /// recomputing the fetch-time signable bytes from the matching audit entry and checking
    /// the caller's signature against them, rather than trusting the caller's say-so.
    pub async fn verify_fetch(&self, session_id: &str, signature: &SignedPayload) -> VerifyFetchResponse {
        let entries = self.audit.get(0, None).await;
        let entry = entries.iter().find(|e| {
            e.action == "memory_fetch_gateway"
                && e.payload.get("fetch_session_id").and_then(Value::as_str) == Some(session_id)
        });
        let Some(entry) = entry else {
            return VerifyFetchResponse {
                valid: false,
                audit_trail_found: false,
            };
        };
        let valid = match (
            entry.payload.get("crypto_id").and_then(Value::as_str),
            entry.payload.get("query").and_then(Value::as_str),
        ) {
            (Some(crypto_id), Some(query)) => {
                let signable = format!("{session_id}:{crypto_id}:{}:{query}", entry.resource);
                grace_core::crypto::verify_detached(signable.as_bytes(), signature).unwrap_or(false)
            }
            _ => false,
        };
        VerifyFetchResponse {
            valid,
            audit_trail_found: true,
        }
    }

    pub async fn audit_trail(&self, session_id: &str) -> Vec<grace_core::AuditEntry> {
        self.audit
            .get(0, None)
            .await
            .into_iter()
            .filter(|e| {
                e.payload.get("fetch_session_id").and_then(Value::as_str) == Some(session_id)
            })
            .collect()
    }
}
