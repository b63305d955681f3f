//! CAPA & Learning Sink. `CapaRegistry` owns the corrective/preventive action
//! lifecycle with audited transitions; `LearningSink` is an append-only, read-only-queried
//! store of training examples — it never calls a downstream consumer synchronously.

use std::sync::Arc;

use grace_core::{AppendRequest, AuditLog};
use uuid::Uuid;

use crate::error::{MissionError, MissionResult};
use crate::types::{
    CapaClassification, CapaRecord, CapaStatus, LearningRecord, Mission, Verdict,
};

pub struct CapaRegistry {
    records: dashmap::DashMap<String, CapaRecord>,
    audit: Arc<AuditLog>,
}

impl CapaRegistry {
    pub fn new(audit: Arc<AuditLog>) -> Arc<Self> {
        Arc::new(Self {
            records: dashmap::DashMap::new(),
            audit,
        })
    }

    /// Auto-creates a CAPA record for an `unstable` or `rolled_back` mission verdict.
    /// Callers should skip this for `stable`/`acceptable` verdicts.
    pub async fn auto_create(&self, mission: &Mission, root_cause_tags: Vec<String>) -> CapaRecord {
        let record = CapaRecord {
            id: format!("capa_{}", Uuid::new_v4()),
            mission_id: mission.mission_id.clone(),
            update_id: mission.update_id.clone(),
            classification: CapaClassification::Corrective,
            root_cause_tags,
            planned_actions: Vec::new(),
            verification: None,
            status: CapaStatus::Open,
            created_at: chrono::Utc::now(),
            closed_at: None,
        };
        self.records.insert(record.id.clone(), record.clone());

        let _ = self
            .audit
            .append(AppendRequest {
                actor: "observation_loop",
                action: "capa_opened",
                subsystem: "grace-missions",
                resource: &record.id,
                payload: serde_json::json!({
                    "mission_id": mission.mission_id,
                    "update_id": mission.update_id,
                }),
                result: "opened",
            })
            .await;

        record
    }

    /// Manually opens a CAPA record outside the automatic unstable-verdict path
    /// (`POST /capa/create`), for operator-initiated corrective/preventive actions not tied
    /// to a concluded mission's verdict.
    pub async fn create(
        &self,
        mission_id: String,
        update_id: String,
        classification: CapaClassification,
        root_cause_tags: Vec<String>,
        planned_actions: Vec<String>,
    ) -> CapaRecord {
        let record = CapaRecord {
            id: format!("capa_{}", Uuid::new_v4()),
            mission_id,
            update_id,
            classification,
            root_cause_tags,
            planned_actions,
            verification: None,
            status: CapaStatus::Open,
            created_at: chrono::Utc::now(),
            closed_at: None,
        };
        self.records.insert(record.id.clone(), record.clone());

        let _ = self
            .audit
            .append(AppendRequest {
                actor: "capa_registry",
                action: "capa_opened_manual",
                subsystem: "grace-missions",
                resource: &record.id,
                payload: serde_json::json!({
                    "mission_id": record.mission_id,
                    "update_id": record.update_id,
                }),
                result: "opened",
            })
            .await;

        record
    }

    pub async fn transition(&self, id: &str, next: CapaStatus) -> MissionResult<CapaRecord> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| MissionError::NotFound(id.to_string()))?;
        if !entry.status.can_transition_to(next) {
            return Err(MissionError::CapaStateError {
                capa_id: id.to_string(),
                from: format!("{:?}", entry.status),
                to: format!("{next:?}"),
            });
        }
        entry.status = next;
        if next == CapaStatus::Closed {
            entry.closed_at = Some(chrono::Utc::now());
        }
        let record = entry.clone();
        drop(entry);

        self.audit
            .append(AppendRequest {
                actor: "capa_registry",
                action: "capa_transitioned",
                subsystem: "grace-missions",
                resource: id,
                payload: serde_json::json!({ "status": next }),
                result: "ok",
            })
            .await
            .map_err(MissionError::Core)?;

        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<CapaRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn recent(&self, limit: usize) -> Vec<CapaRecord> {
        let mut all: Vec<CapaRecord> = self.records.iter().map(|r| r.clone()).collect();
        all.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        all.truncate(limit);
        all
    }
}

/// Append-only learning record store, backed by a `sled::Tree` the same way the Audit Log
/// persists entries. Downstream ML consumers only ever read through `recent`/`by_update`;
/// nothing here calls out to a consumer.
pub struct LearningSink {
    tree: sled::Tree,
}

impl LearningSink {
    pub fn open(db: &sled::Db) -> MissionResult<Arc<Self>> {
        let tree = db.open_tree("learning_records")?;
        Ok(Arc::new(Self { tree }))
    }

    pub fn record(&self, record: &LearningRecord) -> MissionResult<()> {
        let key = format!("{}_{}", record.update_id, record.mission_id);
        let encoded = serde_json::to_vec(record)?;
        self.tree.insert(key, encoded)?;
        Ok(())
    }

    pub fn recent(&self, n: usize) -> Vec<LearningRecord> {
        let mut all: Vec<LearningRecord> = self
            .tree
            .iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect();
        all.sort_by_key(|r: &LearningRecord| std::cmp::Reverse(r.recorded_at));
        all.truncate(n);
        all
    }

    pub fn by_update(&self, update_id: &str) -> Vec<LearningRecord> {
        self.tree
            .scan_prefix(format!("{update_id}_"))
            .filter_map(|kv| kv.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect()
    }
}

pub fn root_cause_tags_for(verdict: Verdict, mission: &Mission) -> Vec<String> {
    if verdict != Verdict::Unstable {
        return Vec::new();
    }
    mission
        .anomalies
        .iter()
        .map(|a| format!("{:?}:{}", a.severity, a.metric))
        .collect()
}
