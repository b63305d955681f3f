//! Wire types for the Unified Logic Hub: `LogicUpdate` and everything the 8-stage pipeline
//! attaches to it as it advances.

use chrono::{DateTime, Utc};
use grace_core::{Decision, SignedPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Schema,
    CodeModule,
    Playbook,
    Config,
    MetricDefinition,
    ComponentHandshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Default observation window per risk tier (majority-document values). Hardcoded here
    /// rather than config-loaded; see DESIGN.md for why that's good enough for now.
    pub fn default_observation_window(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            RiskLevel::Low => Duration::from_secs(3600),
            RiskLevel::Medium => Duration::from_secs(6 * 3600),
            RiskLevel::High => Duration::from_secs(24 * 3600),
            RiskLevel::Critical => Duration::from_secs(72 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Proposed,
    Governed,
    Signed,
    Validated,
    Packaged,
    Distributed,
    Observing,
    Stable,
    Unstable,
    RolledBack,
    Failed,
}

impl UpdateStatus {
    /// Monotonic except for the two explicitly allowed backward moves.
    pub fn can_transition_to(self, next: UpdateStatus) -> bool {
        use UpdateStatus::*;
        if next == Failed {
            return !matches!(self, Stable | RolledBack | Failed);
        }
        matches!(
            (self, next),
            (Proposed, Governed)
                | (Governed, Signed)
                | (Signed, Validated)
                | (Validated, Packaged)
                | (Packaged, Distributed)
                | (Distributed, Observing)
                | (Observing, Stable)
                | (Observing, Unstable)
                | (Unstable, RolledBack)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackInstructions {
    pub previous_version_ref: Option<String>,
    pub reverse_steps: Vec<String>,
}

impl RollbackInstructions {
    pub fn is_empty(&self) -> bool {
        self.previous_version_ref.is_none() && self.reverse_steps.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDiagnostics {
    pub breaking_change: bool,
    pub messages: Vec<String>,
}

impl Default for ValidationDiagnostics {
    fn default() -> Self {
        Self {
            breaking_change: false,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimestamps {
    pub proposed_at: Option<DateTime<Utc>>,
    pub governed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub packaged_at: Option<DateTime<Utc>>,
    pub distributed_at: Option<DateTime<Utc>>,
    pub observing_at: Option<DateTime<Utc>>,
    pub terminal_at: Option<DateTime<Utc>>,
}

impl Default for StageTimestamps {
    fn default() -> Self {
        Self {
            proposed_at: None,
            governed_at: None,
            signed_at: None,
            validated_at: None,
            packaged_at: None,
            distributed_at: None,
            observing_at: None,
            terminal_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicUpdate {
    pub update_id: String,
    pub update_type: UpdateType,
    pub component_targets: Vec<String>,
    pub content: Value,
    pub created_by: String,
    pub risk_level: RiskLevel,
    pub status: UpdateStatus,
    pub governance_decision: Option<Decision>,
    pub crypto_signature: Option<SignedPayload>,
    pub checksum: Option<String>,
    pub rollback_instructions: RollbackInstructions,
    pub audit_refs: Vec<u64>,
    pub validation: Option<ValidationDiagnostics>,
    pub created_at: DateTime<Utc>,
    pub stage_timestamps: StageTimestamps,
    pub rolled_back_from: Option<String>,
    pub superseded_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    pub update_type: UpdateType,
    pub component_targets: Vec<String>,
    pub content: Value,
    pub created_by: String,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub update_id: String,
    pub checksum: String,
    pub signature: SignedPayload,
    pub rollback_instructions: RollbackInstructions,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct HubStats {
    pub total: usize,
    pub stable: usize,
    pub rolled_back: usize,
    pub active: usize,
    pub failed: usize,
}

pub const MAX_CONTENT_BYTES: usize = 1_000_000;
