//! Unified Logic Hub: single entry point for any change to system logic. Every
//! update traverses an 8-stage pipeline; each stage either advances the update or halts it
//! with a typed reason, and nothing is dropped silently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use grace_core::{AppendRequest, AuditLog, CryptoEngine, Event, EventMesh, GovernanceEngine, Priority};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::HubError;
use crate::genetic_memory::GeneticMemory;
use crate::registry::UpdateRegistry;
use crate::types::{
    HubStats, LogicUpdate, Package, RiskLevel, RollbackInstructions, StageTimestamps,
    SubmitRequest, UpdateStatus, UpdateType, ValidationDiagnostics, MAX_CONTENT_BYTES,
};
use crate::validation;

/// Sent by the Observation Loop when a mission verdict requires rollback. The Hub drains
/// this mailbox rather than being called back into synchronously, which would leave
/// `grace-logic-hub` and `grace-missions` depending on each other.
#[derive(Debug, Clone)]
pub struct RollbackRequest {
    pub update_id: String,
    pub reason: String,
}

/// Sent by the Observation Loop when a mission concludes `stable`/`acceptable`. Drained the
/// same way as `RollbackRequest`: the Hub marks the underlying update `Stable` and releases
/// its per-component serialization lock, never via a synchronous call back into Missions.
#[derive(Debug, Clone)]
pub struct StabilizeRequest {
    pub update_id: String,
}

struct AppliedVersion {
    checksum: String,
    content: serde_json::Value,
    applied_at: chrono::DateTime<Utc>,
}

pub struct UnifiedLogicHub {
    registry: Arc<UpdateRegistry>,
    governance: Arc<GovernanceEngine>,
    crypto: CryptoEngine,
    audit: Arc<AuditLog>,
    mesh: Arc<EventMesh>,
    genetic_memory: Mutex<GeneticMemory>,
    applied_versions: DashMap<String, Vec<AppliedVersion>>,
    rollback_tx: mpsc::Sender<RollbackRequest>,
    stabilize_tx: mpsc::Sender<StabilizeRequest>,
    /// Per-component serialization guards held for the lifetime of an in-flight update,
    /// keyed by `update_id`. Released only when `transition` lands the update on `stable`,
    /// `unstable`, or `failed` (spec §4.G / ordering guarantee (c)) — never at the end of
    /// `run_pipeline`, which returns as soon as the update reaches `observing`.
    held_locks: DashMap<String, Vec<tokio::sync::OwnedMutexGuard<()>>>,
    stage_timeouts: StageTimeouts,
}

#[derive(Clone, Copy)]
pub struct StageTimeouts {
    pub ingestion: Duration,
    pub governance: Duration,
    pub validation: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            ingestion: Duration::from_secs(1),
            governance: Duration::from_secs(5),
            validation: Duration::from_secs(60),
        }
    }
}

impl UnifiedLogicHub {
    pub fn new(
        governance: Arc<GovernanceEngine>,
        crypto: CryptoEngine,
        audit: Arc<AuditLog>,
        mesh: Arc<EventMesh>,
    ) -> (Arc<Self>, mpsc::Receiver<RollbackRequest>, mpsc::Receiver<StabilizeRequest>) {
        let (rollback_tx, rollback_rx) = mpsc::channel(64);
        let (stabilize_tx, stabilize_rx) = mpsc::channel(64);
        let hub = Arc::new(Self {
            registry: UpdateRegistry::new(),
            governance,
            crypto,
            audit,
            mesh,
            genetic_memory: Mutex::new(GeneticMemory::new()),
            applied_versions: DashMap::new(),
            rollback_tx,
            stabilize_tx,
            held_locks: DashMap::new(),
            stage_timeouts: StageTimeouts::default(),
        });
        (hub, rollback_rx, stabilize_rx)
    }

    pub fn rollback_sender(&self) -> mpsc::Sender<RollbackRequest> {
        self.rollback_tx.clone()
    }

    pub fn stabilize_sender(&self) -> mpsc::Sender<StabilizeRequest> {
        self.stabilize_tx.clone()
    }

    /// Spawns the task that drains rollback requests from the Observation Loop and invokes
    /// rollback on this Hub.
    pub fn spawn_rollback_drain(self: Arc<Self>, mut rx: mpsc::Receiver<RollbackRequest>) {
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                info!(target: "grace::hub", update_id = %req.update_id, reason = %req.reason, "processing rollback request");
                if let Err(err) = self.rollback(&req.update_id, &req.reason).await {
                    warn!(target: "grace::hub", update_id = %req.update_id, %err, "rollback failed");
                }
            }
        });
    }

    /// Spawns the task that drains stable-conclusion requests from the Observation Loop,
    /// marking the underlying update `Stable` (which releases its per-component lock).
    pub fn spawn_stabilize_drain(self: Arc<Self>, mut rx: mpsc::Receiver<StabilizeRequest>) {
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                if let Err(err) = self.transition(&req.update_id, UpdateStatus::Stable).await {
                    warn!(target: "grace::hub", update_id = %req.update_id, %err, "could not mark update stable");
                }
            }
        });
    }

    pub fn get(&self, update_id: &str) -> Option<LogicUpdate> {
        self.registry.get(update_id)
    }

    pub fn recent(&self, limit: usize) -> Vec<LogicUpdate> {
        self.registry.recent(limit)
    }

    pub fn stats(&self) -> HubStats {
        let all = self.registry.all();
        let mut stats = HubStats::default();
        stats.total = all.len();
        for u in &all {
            match u.status {
                UpdateStatus::Stable => stats.stable += 1,
                UpdateStatus::RolledBack => stats.rolled_back += 1,
                UpdateStatus::Failed => stats.failed += 1,
                UpdateStatus::Observing | UpdateStatus::Distributed | UpdateStatus::Packaged => {
                    stats.active += 1
                }
                _ => {}
            }
        }
        stats
    }

    /// Submits a new update: stage 1 runs synchronously (fast, bounded); stages 2-8 are
    /// spawned so independent updates flow through the pipeline concurrently.
    pub async fn submit(
        self: &Arc<Self>,
        req: SubmitRequest,
    ) -> Result<String, HubError> {
        let content_bytes = serde_json::to_vec(&req.content).unwrap_or_default();
        if content_bytes.len() > MAX_CONTENT_BYTES {
            return Err(HubError::IngestionRejected);
        }

        let update_id = format!("u_{}", Uuid::new_v4());
        let update = LogicUpdate {
            update_id: update_id.clone(),
            update_type: req.update_type,
            component_targets: req.component_targets,
            content: req.content,
            created_by: req.created_by,
            risk_level: req.risk_level,
            status: UpdateStatus::Proposed,
            governance_decision: None,
            crypto_signature: None,
            checksum: None,
            rollback_instructions: RollbackInstructions {
                previous_version_ref: None,
                reverse_steps: vec![],
            },
            audit_refs: vec![],
            validation: None,
            created_at: Utc::now(),
            stage_timestamps: StageTimestamps {
                proposed_at: Some(Utc::now()),
                ..Default::default()
            },
            rolled_back_from: None,
            superseded_by: None,
        };
        self.registry.insert(update);

        let hub = self.clone();
        let id = update_id.clone();
        tokio::spawn(async move {
            if let Err(err) = hub.run_pipeline(&id).await {
                warn!(target: "grace::hub", update_id = %id, %err, "pipeline halted");
            }
        });

        Ok(update_id)
    }

    async fn transition(&self, update_id: &str, next: UpdateStatus) -> Result<(), HubError> {
        let current = self
            .registry
            .get(update_id)
            .ok_or_else(|| HubError::NotFound(update_id.to_string()))?
            .status;
        if !current.can_transition_to(next) {
            return Err(HubError::StateError {
                update_id: update_id.to_string(),
                from: format!("{current:?}"),
                to: format!("{next:?}"),
            });
        }
        self.registry.update_with(update_id, |u| {
            u.status = next;
            match next {
                UpdateStatus::Governed => u.stage_timestamps.governed_at = Some(Utc::now()),
                UpdateStatus::Signed => u.stage_timestamps.signed_at = Some(Utc::now()),
                UpdateStatus::Validated => u.stage_timestamps.validated_at = Some(Utc::now()),
                UpdateStatus::Packaged => u.stage_timestamps.packaged_at = Some(Utc::now()),
                UpdateStatus::Distributed => u.stage_timestamps.distributed_at = Some(Utc::now()),
                UpdateStatus::Observing => u.stage_timestamps.observing_at = Some(Utc::now()),
                UpdateStatus::Stable
                | UpdateStatus::Unstable
                | UpdateStatus::RolledBack
                | UpdateStatus::Failed => u.stage_timestamps.terminal_at = Some(Utc::now()),
                _ => {}
            }
        });
        // Release this update's per-component serialization locks as soon as it lands on
        // `stable`, `unstable`, or `failed` — the three statuses the spec's ordering
        // guarantee names as the point a second update targeting the same component may
        // proceed. `unstable` releases here (rather than waiting for `rolled_back`) so the
        // rollback sibling `rollback()` spawns for the same targets can acquire the lock
        // without deadlocking against the original's still-held guard.
        if matches!(
            next,
            UpdateStatus::Stable | UpdateStatus::Unstable | UpdateStatus::Failed
        ) {
            self.held_locks.remove(update_id);
        }
        Ok(())
    }

    async fn fail(&self, update_id: &str, reason: &str) {
        let _ = self.transition(update_id, UpdateStatus::Failed).await;
        let audit_ref = self
            .audit
            .append(AppendRequest {
                actor: "unified_logic_hub",
                action: "logic_update_failed",
                subsystem: "grace-logic-hub",
                resource: update_id,
                payload: json!({ "reason": reason }),
                result: "failed",
            })
            .await;
        if let Ok(seq) = audit_ref {
            self.registry.update_with(update_id, |u| u.audit_refs.push(seq));
        }
        self.mesh
            .publish(Event::new(
                "unified_logic.rejected",
                "grace-logic-hub",
                json!({ "update_id": update_id, "reason": reason }),
            ))
            .await;
    }

    /// Runs stages 2-8. Stage 1 (ingestion) already happened in `submit`. Acquires the
    /// per-target-component serialization locks and hands them to `held_locks`, which
    /// `transition` releases once this update reaches `stable`, `unstable`, or `failed` — a
    /// second update targeting the same component waits here the entire time, including
    /// through a `review` park, not just through packaging.
    async fn run_pipeline(self: &Arc<Self>, update_id: &str) -> Result<(), HubError> {
        let targets = self
            .registry
            .get(update_id)
            .map(|u| u.component_targets.clone())
            .unwrap_or_default();
        let mut guards = Vec::new();
        for target in &targets {
            guards.push(self.registry.lock_for(target).lock_owned().await);
        }
        self.held_locks.insert(update_id.to_string(), guards);

        let result = self.run_pipeline_inner(update_id).await;
        if let Err(err) = &result {
            // A stage can halt the pipeline (e.g. a stage timeout) without itself reaching a
            // terminal status; without this, the update would sit forever in a non-terminal
            // status with its lock never released. `fail` is a no-op-safe re-entry if the
            // halting stage already called it (`transition` rejects the illegal
            // already-terminal -> failed move and `fail` tolerates that).
            if let Some(update) = self.registry.get(update_id) {
                if !matches!(
                    update.status,
                    UpdateStatus::Stable
                        | UpdateStatus::Unstable
                        | UpdateStatus::RolledBack
                        | UpdateStatus::Failed
                ) {
                    self.fail(update_id, &err.to_string()).await;
                }
            }
        }
        result
    }

    async fn run_pipeline_inner(self: &Arc<Self>, update_id: &str) -> Result<(), HubError> {
        let update = self
            .registry
            .get(update_id)
            .ok_or_else(|| HubError::NotFound(update_id.to_string()))?;

        // Stage 2: governance check.
        let context = json!({
            "update_type": update.update_type,
            "risk_level": update.risk_level,
            "created_by": update.created_by,
            "component_targets": update.component_targets,
        });
        let decision = tokio::time::timeout(
            self.stage_timeouts.governance,
            async { self.governance.check("apply_update", "logic_hub", &context) },
        )
        .await
        .map_err(|_| HubError::Timeout {
            stage: "governance".into(),
            millis: self.stage_timeouts.governance.as_millis() as u64,
        })?;

        self.registry
            .update_with(update_id, |u| u.governance_decision = Some(decision.clone()));

        match decision.decision {
            grace_core::PolicyDecision::Deny => {
                self.fail(update_id, &decision.reason).await;
                return Err(HubError::GovernanceDenied {
                    policy_id: decision.policy_id,
                    reason: decision.reason,
                });
            }
            grace_core::PolicyDecision::Review => {
                // Parks indefinitely; no observation starts until /approve or /deny.
                info!(target: "grace::hub", update_id, "update parked for review");
                return Ok(());
            }
            grace_core::PolicyDecision::Allow => {}
        }
        self.transition(update_id, UpdateStatus::Governed).await?;

        self.continue_after_governance(update_id).await
    }

    /// Continues from stage 3 onward; also the re-entry point for an approved review-parked
    /// update, and for rollback updates (which re-enter at stage 2's sibling here at the
    /// signing stage since governance already ran for the original).
    pub async fn continue_after_governance(self: &Arc<Self>, update_id: &str) -> Result<(), HubError> {
        let update = self
            .registry
            .get(update_id)
            .ok_or_else(|| HubError::NotFound(update_id.to_string()))?;

        // Stage 3: crypto sign.
        let content_bytes = serde_json::to_vec(&update.content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&content_bytes);
        let checksum = hex::encode(hasher.finalize());

        if let Some(dead_end) = self.genetic_memory.lock().await.is_dead_end(&checksum) {
            self.fail(
                update_id,
                &format!(
                    "content checksum matches a known dead-end from {} (seen {} times): {}",
                    dead_end.update_id, dead_end.occurrence_count, dead_end.reason
                ),
            )
            .await;
            return Err(HubError::ValidationFailed(Default::default()));
        }

        let signature = self.crypto.sign(checksum.as_bytes());
        self.registry.update_with(update_id, |u| {
            u.checksum = Some(checksum.clone());
            u.crypto_signature = Some(signature.clone());
        });
        self.transition(update_id, UpdateStatus::Signed).await?;

        // Stage 4: audit proposal.
        let audit_ref = self
            .audit
            .append(AppendRequest {
                actor: &update.created_by,
                action: "logic_update_proposed",
                subsystem: "grace-logic-hub",
                resource: update_id,
                payload: json!({
                    "update_type": update.update_type,
                    "risk_level": update.risk_level,
                    "checksum": checksum,
                    "component_targets": update.component_targets,
                }),
                result: "governed+signed+logged",
            })
            .await
            .map_err(HubError::Grace)?;
        self.registry.update_with(update_id, |u| u.audit_refs.push(audit_ref));

        // Stage 5: validation, dispatched by update_type.
        let previous_content = self
            .applied_versions
            .get(&update.update_type_target_key())
            .and_then(|versions| versions.last().map(|v| v.content.clone()));

        let update_type = update.update_type;
        let content = update.content.clone();
        let validation_result = tokio::time::timeout(
            self.stage_timeouts.validation,
            tokio::task::spawn_blocking(move || {
                validation::validate(update_type, &content, previous_content.as_ref())
            }),
        )
        .await
        .map_err(|_| HubError::Timeout {
            stage: "validation".into(),
            millis: self.stage_timeouts.validation.as_millis() as u64,
        })?
        .map_err(|e| HubError::ValidationFailed(ValidationDiagnostics {
            breaking_change: false,
            messages: vec![format!("validation task panicked: {e}")],
        }))?;

        let diagnostics = match validation_result {
            Ok(diag) => diag,
            Err(HubError::ValidationFailed(diag)) => {
                self.genetic_memory
                    .lock()
                    .await
                    .mark_dead_end(&checksum, update_id, "validation failed");
                self.registry.update_with(update_id, |u| u.validation = Some(diag.clone()));
                self.fail(update_id, "validation failed").await;
                self.mesh
                    .publish(Event::new(
                        "unified_logic.validation_failed",
                        "grace-logic-hub",
                        json!({ "update_id": update_id, "diagnostics": diag }),
                    ))
                    .await;
                return Err(HubError::ValidationFailed(diag));
            }
            Err(other) => return Err(other),
        };
        self.registry.update_with(update_id, |u| u.validation = Some(diagnostics));
        self.transition(update_id, UpdateStatus::Validated).await?;

        // Stage 6: package build.
        let previous_version_ref = self
            .applied_versions
            .get(&update.update_type_target_key())
            .and_then(|versions| versions.last().map(|v| v.checksum.clone()));
        let rollback_instructions =
            validation::build_rollback_instructions(update.update_type, previous_version_ref);
        self.registry
            .update_with(update_id, |u| u.rollback_instructions = rollback_instructions.clone());
        let package = Package {
            update_id: update_id.to_string(),
            checksum: checksum.clone(),
            signature,
            rollback_instructions,
        };
        self.transition(update_id, UpdateStatus::Packaged).await?;

        // Stage 7: distribution.
        self.mesh
            .publish(
                Event::new(
                    "unified_logic.update",
                    "grace-logic-hub",
                    json!({ "package": package }),
                )
                .with_audit(true)
                .with_priority(if update.risk_level == RiskLevel::Critical {
                    Priority::Critical
                } else {
                    Priority::Normal
                }),
            )
            .await;
        self.transition(update_id, UpdateStatus::Distributed).await?;

        self.applied_versions
            .entry(update.update_type_target_key())
            .or_default()
            .push(AppliedVersion {
                checksum,
                content: update.content.clone(),
                applied_at: Utc::now(),
            });

        // Stage 8: observation handoff — transition only; Missions owns the actual
        // observation task and is wired up by the gateway's boot sequence subscribing to
        // `unified_logic.update` events.
        self.transition(update_id, UpdateStatus::Observing).await?;

        Ok(())
    }

    /// Marks a `review`-parked update as approved and resumes the pipeline from stage 3.
    pub async fn approve(self: &Arc<Self>, update_id: &str) -> Result<(), HubError> {
        let update = self
            .registry
            .get(update_id)
            .ok_or_else(|| HubError::NotFound(update_id.to_string()))?;
        if update.status != UpdateStatus::Proposed {
            return Err(HubError::StateError {
                update_id: update_id.to_string(),
                from: format!("{:?}", update.status),
                to: "Governed".into(),
            });
        }
        self.transition(update_id, UpdateStatus::Governed).await?;
        let hub = self.clone();
        let id = update_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = hub.continue_after_governance(&id).await {
                warn!(target: "grace::hub", update_id = %id, %err, "pipeline halted after approval");
            }
        });
        Ok(())
    }

    pub async fn deny(&self, update_id: &str, reason: &str) -> Result<(), HubError> {
        self.fail(update_id, reason).await;
        Ok(())
    }

    /// Explicit or observation-triggered rollback: builds a sibling update from the
    /// original's `rollback_instructions`, re-enters the pipeline at elevated priority, then
    /// marks the original `rolled_back` once the sibling completes.
    pub async fn rollback(self: &Arc<Self>, update_id: &str, reason: &str) -> Result<String, HubError> {
        let original = self
            .registry
            .get(update_id)
            .ok_or_else(|| HubError::NotFound(update_id.to_string()))?;

        if original.rollback_instructions.is_empty() {
            warn!(target: "grace::hub", update_id, "rollback requested but rollback_instructions are empty");
        }

        self.genetic_memory.lock().await.mark_dead_end(
            original.checksum.as_deref().unwrap_or(""),
            update_id,
            reason,
        );

        let rollback_id = format!("u_{}_rb", Uuid::new_v4());
        let rollback_update = LogicUpdate {
            update_id: rollback_id.clone(),
            update_type: original.update_type,
            component_targets: original.component_targets.clone(),
            content: json!({
                "rollback_of": update_id,
                "instructions": original.rollback_instructions,
            }),
            created_by: "observation_loop".into(),
            risk_level: RiskLevel::Critical,
            status: UpdateStatus::Proposed,
            governance_decision: None,
            crypto_signature: None,
            checksum: None,
            rollback_instructions: RollbackInstructions {
                previous_version_ref: None,
                reverse_steps: vec![],
            },
            audit_refs: vec![],
            validation: None,
            created_at: Utc::now(),
            stage_timestamps: StageTimestamps {
                proposed_at: Some(Utc::now()),
                ..Default::default()
            },
            rolled_back_from: Some(update_id.to_string()),
            superseded_by: None,
        };
        self.registry.insert(rollback_update);

        self.audit
            .append(AppendRequest {
                actor: "observation_loop",
                action: "logic_update_rollback_initiated",
                subsystem: "grace-logic-hub",
                resource: update_id,
                payload: json!({ "rollback_id": rollback_id, "reason": reason }),
                result: "initiated",
            })
            .await
            .map_err(HubError::Grace)?;

        // Mark the original `unstable` now — releasing its per-component lock — before the
        // rollback sibling's own pipeline run below tries to acquire that same lock for the
        // same targets. Doing this after the sibling's pipeline completes (as the prior
        // version of this code did) would deadlock: the sibling's `lock_for` would wait on a
        // guard the original never releases until this very step runs.
        self.transition(update_id, UpdateStatus::Unstable).await?;

        let hub = self.clone();
        let rollback_id_clone = rollback_id.clone();
        let original_id = update_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = hub.run_pipeline(&rollback_id_clone).await {
                warn!(target: "grace::hub", update_id = %rollback_id_clone, %err, "rollback pipeline halted");
                return;
            }
            if let Err(err) = hub.transition(&original_id, UpdateStatus::RolledBack).await {
                warn!(target: "grace::hub", update_id = %original_id, %err, "could not mark original rolled_back");
                return;
            }
            hub.mesh
                .publish(Event::new(
                    "unified_logic.rollback",
                    "grace-logic-hub",
                    json!({ "original_update_id": original_id, "rollback_update_id": rollback_id_clone }),
                ))
                .await;
        });

        Ok(rollback_id)
    }
}

impl LogicUpdate {
    /// Key used to look up the prior applied version of a given update's targets — schema
    /// diffs and rollback pointers are scoped per update type + target set.
    fn update_type_target_key(&self) -> String {
        format!("{:?}:{}", self.update_type, self.component_targets.join(","))
    }
}
