//! Append-only, hash-chained audit log. Every governance decision, crypto operation, and
//! state mutation in the control plane flows through `AuditLog::append`; nothing is ever
//! dropped silently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::crypto::{CryptoEngine, SignedPayload};
use crate::error::{GraceError, GraceResult};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub prev_hash: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub subsystem: String,
    pub resource: String,
    pub payload: Value,
    pub result: String,
    pub signature: SignedPayload,
    pub schema_version: u16,
}

/// Fields that are hashed to produce an entry's `hash`. Keeping this separate from
/// `AuditEntry` means the hash never accidentally covers itself.
#[derive(Serialize)]
struct HashableEntry<'a> {
    sequence: u64,
    prev_hash: &'a str,
    timestamp: DateTime<Utc>,
    actor: &'a str,
    action: &'a str,
    subsystem: &'a str,
    resource: &'a str,
    payload: &'a Value,
    result: &'a str,
}

fn compute_hash(entry: &HashableEntry<'_>) -> GraceResult<String> {
    let canonical = serde_json::to_vec(entry)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

/// A break detected while walking the chain: the sequence number at which `hash` did not
/// match the recomputed value, plus the two hashes for operator diagnosis.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityBreak {
    pub sequence: u64,
    pub expected_hash: String,
    pub recorded_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub entries_checked: u64,
    pub break_at: Option<IntegrityBreak>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.break_at.is_none()
    }
}

struct AuditState {
    entries: Vec<AuditEntry>,
    tree: sled::Tree,
}

pub struct AuditLog {
    crypto: CryptoEngine,
    state: Mutex<AuditState>,
}

pub struct AppendRequest<'a> {
    pub actor: &'a str,
    pub action: &'a str,
    pub subsystem: &'a str,
    pub resource: &'a str,
    pub payload: Value,
    pub result: &'a str,
}

impl AuditLog {
    pub fn open(db: &sled::Db, crypto: CryptoEngine) -> GraceResult<Arc<Self>> {
        let tree = db.open_tree("audit_log")?;
        let mut entries = Vec::new();
        for kv in tree.iter() {
            let (_, value) = kv?;
            if let Ok(entry) = serde_json::from_slice::<AuditEntry>(&value) {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.sequence);

        Ok(Arc::new(Self {
            crypto,
            state: Mutex::new(AuditState { entries, tree }),
        }))
    }

    /// Appends a new entry behind the single writer lock. Returns the assigned `sequence`.
    /// A persistence failure here is fatal to the originating operation — we
    /// never swallow it.
    pub async fn append(&self, req: AppendRequest<'_>) -> GraceResult<u64> {
        let mut state = self.state.lock().await;
        let sequence = state.entries.last().map(|e| e.sequence + 1).unwrap_or(0);
        let prev_hash = state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let timestamp = Utc::now();

        let hashable = HashableEntry {
            sequence,
            prev_hash: &prev_hash,
            timestamp,
            actor: req.actor,
            action: req.action,
            subsystem: req.subsystem,
            resource: req.resource,
            payload: &req.payload,
            result: req.result,
        };
        let hash = compute_hash(&hashable)?;
        let signature = self.crypto.sign(hash.as_bytes());

        let entry = AuditEntry {
            sequence,
            prev_hash,
            hash,
            timestamp,
            actor: req.actor.to_string(),
            action: req.action.to_string(),
            subsystem: req.subsystem.to_string(),
            resource: req.resource.to_string(),
            payload: req.payload,
            result: req.result.to_string(),
            signature,
            schema_version: 1,
        };

        let encoded = serde_json::to_vec(&entry)?;
        state
            .tree
            .insert(sequence.to_be_bytes(), encoded)
            .map_err(|e| GraceError::AuditWriteError {
                reason: e.to_string(),
            })?;
        state.tree.flush_async().await.map_err(|e| GraceError::AuditWriteError {
            reason: e.to_string(),
        })?;

        state.entries.push(entry);
        Ok(sequence)
    }

    pub async fn get(&self, start: u64, end: Option<u64>) -> Vec<AuditEntry> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter(|e| e.sequence >= start && end.map_or(true, |end| e.sequence <= end))
            .cloned()
            .collect()
    }

    pub async fn by_resource(&self, resource: &str) -> Vec<AuditEntry> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter(|e| e.resource == resource)
            .cloned()
            .collect()
    }

    /// Walks the chain from genesis (or `from_sequence` if given) and returns the first
    /// break, if any.
    pub async fn verify_integrity(&self, from_sequence: Option<u64>) -> GraceResult<IntegrityReport> {
        let state = self.state.lock().await;
        let mut prev_hash = match from_sequence {
            Some(seq) if seq > 0 => state
                .entries
                .iter()
                .find(|e| e.sequence == seq - 1)
                .map(|e| e.hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
            _ => GENESIS_HASH.to_string(),
        };

        let start_seq = from_sequence.unwrap_or(0);
        let mut checked = 0u64;
        for entry in state.entries.iter().filter(|e| e.sequence >= start_seq) {
            let hashable = HashableEntry {
                sequence: entry.sequence,
                prev_hash: &prev_hash,
                timestamp: entry.timestamp,
                actor: &entry.actor,
                action: &entry.action,
                subsystem: &entry.subsystem,
                resource: &entry.resource,
                payload: &entry.payload,
                result: &entry.result,
            };
            let expected = compute_hash(&hashable)?;
            checked += 1;
            if expected != entry.hash || entry.prev_hash != prev_hash {
                return Ok(IntegrityReport {
                    entries_checked: checked,
                    break_at: Some(IntegrityBreak {
                        sequence: entry.sequence,
                        expected_hash: expected,
                        recorded_hash: entry.hash.clone(),
                    }),
                });
            }
            prev_hash = entry.hash.clone();
        }

        Ok(IntegrityReport {
            entries_checked: checked,
            break_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_log() -> Arc<AuditLog> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        AuditLog::open(&db, CryptoEngine::generate()).unwrap()
    }

    #[tokio::test]
    async fn chain_verifies_after_several_appends() {
        let log = test_log().await;
        for i in 0..5 {
            log.append(AppendRequest {
                actor: "test",
                action: "unit_test",
                subsystem: "test",
                resource: &format!("res_{i}"),
                payload: json!({"i": i}),
                result: "ok",
            })
            .await
            .unwrap();
        }
        let report = log.verify_integrity(None).await.unwrap();
        assert!(report.is_intact());
        assert_eq!(report.entries_checked, 5);
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let log = test_log().await;
        for i in 0..3 {
            log.append(AppendRequest {
                actor: "test",
                action: "unit_test",
                subsystem: "test",
                resource: &format!("res_{i}"),
                payload: json!({"i": i}),
                result: "ok",
            })
            .await
            .unwrap();
        }
        {
            let mut state = log.state.lock().await;
            state.entries[1].payload = json!({"tampered": true});
        }
        let report = log.verify_integrity(None).await.unwrap();
        assert!(!report.is_intact());
        assert_eq!(report.break_at.unwrap().sequence, 1);
    }
}
