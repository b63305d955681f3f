//! Shared record types for the Mission/Observation Loop and CAPA & Learning
//! Sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Proposed,
    Deployed,
    Observing,
    Stable,
    Unstable,
    Learned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: String,
    pub severity: AnomalySeverity,
    pub detected_at: DateTime<Utc>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub passed: bool,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Stable,
    Acceptable,
    Unstable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub update_id: String,
    pub component_targets: Vec<String>,
    pub expected_metrics: Vec<String>,
    pub phases: Vec<Phase>,
    pub observation_window_secs: u64,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub health_checks: Vec<HealthCheckResult>,
    pub anomalies: Vec<Anomaly>,
    pub stability_score: f64,
    pub verdict: Option<Verdict>,
    pub retrospective: Option<String>,
}

impl Mission {
    pub fn current_phase(&self) -> Phase {
        *self.phases.last().unwrap_or(&Phase::Proposed)
    }

    /// Applies the score-reduction rule for one health-check tick's worth of anomalies and
    /// failed checks. `stability_score` only ever decreases during observation.
    pub fn apply_tick(&mut self, checks: Vec<HealthCheckResult>, anomalies: Vec<Anomaly>) {
        for anomaly in &anomalies {
            let factor = match anomaly.severity {
                AnomalySeverity::Critical => 0.5,
                AnomalySeverity::High => 0.8,
                AnomalySeverity::Medium => 0.9,
            };
            self.stability_score *= factor;
        }
        if !checks.is_empty() {
            let failed = checks.iter().filter(|c| !c.passed).count() as f64;
            self.stability_score *= 1.0 - (failed / checks.len() as f64);
        }
        self.stability_score = self.stability_score.clamp(0.0, 1.0);
        self.health_checks.extend(checks);
        self.anomalies.extend(anomalies);
    }

    pub fn has_critical_anomaly(&self) -> bool {
        self.anomalies
            .iter()
            .any(|a| a.severity == AnomalySeverity::Critical)
    }

    pub fn compute_verdict(&self) -> Verdict {
        if self.stability_score >= 0.95 {
            Verdict::Stable
        } else if self.stability_score >= 0.80 {
            Verdict::Acceptable
        } else {
            Verdict::Unstable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapaStatus {
    Open,
    Analyzing,
    Planned,
    Implementing,
    Verifying,
    Closed,
}

impl CapaStatus {
    pub fn can_transition_to(self, next: CapaStatus) -> bool {
        use CapaStatus::*;
        matches!(
            (self, next),
            (Open, Analyzing)
                | (Analyzing, Planned)
                | (Planned, Implementing)
                | (Implementing, Verifying)
                | (Verifying, Closed)
                | (Verifying, Analyzing)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapaClassification {
    Corrective,
    Preventive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapaRecord {
    pub id: String,
    pub mission_id: String,
    pub update_id: String,
    pub classification: CapaClassification,
    pub root_cause_tags: Vec<String>,
    pub planned_actions: Vec<String>,
    pub verification: Option<String>,
    pub status: CapaStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub mission_id: String,
    pub update_id: String,
    pub features: serde_json::Value,
    pub verdict: Verdict,
    pub stability_score: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionReport {
    pub components: Vec<String>,
    pub metrics: Vec<String>,
    pub detected_at: DateTime<Utc>,
}
