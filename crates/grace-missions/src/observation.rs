//! Mission & Observation Loop. One mission per distributed update (or per
//! completed handshake); a periodic health-check tick feeds the stability score until the
//! observation window ends or a critical anomaly forces an early verdict. An `unstable`
//! verdict reaches the Hub only through the rollback mailbox — never a synchronous call
//! back into `grace-logic-hub`, which would make the two crates depend on each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use grace_core::{AppendRequest, AuditLog, Event, EventMesh, Priority};
use grace_logic_hub::{RiskLevel, RollbackRequest};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::capa::{root_cause_tags_for, CapaRegistry, LearningSink};
use crate::error::{MissionError, MissionResult};
use crate::health::HealthProbe;
use crate::types::{LearningRecord, Mission, Phase, RegressionReport, Verdict};

pub struct ObservationLoop {
    missions: dashmap::DashMap<String, Mutex<Mission>>,
    audit: Arc<AuditLog>,
    mesh: Arc<EventMesh>,
    capa: Arc<CapaRegistry>,
    learning: Arc<LearningSink>,
    rollback_tx: mpsc::Sender<RollbackRequest>,
    stabilize_tx: mpsc::Sender<grace_logic_hub::StabilizeRequest>,
    probe: Arc<dyn HealthProbe>,
    tick_interval: Duration,
}

impl ObservationLoop {
    pub fn new(
        audit: Arc<AuditLog>,
        mesh: Arc<EventMesh>,
        capa: Arc<CapaRegistry>,
        learning: Arc<LearningSink>,
        rollback_tx: mpsc::Sender<RollbackRequest>,
        stabilize_tx: mpsc::Sender<grace_logic_hub::StabilizeRequest>,
        probe: Arc<dyn HealthProbe>,
        tick_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            missions: dashmap::DashMap::new(),
            audit,
            mesh,
            capa,
            learning,
            rollback_tx,
            stabilize_tx,
            probe,
            tick_interval,
        })
    }

    pub async fn get(&self, mission_id: &str) -> Option<Mission> {
        let entry = self.missions.get(mission_id)?;
        Some(entry.lock().await.clone())
    }

    pub async fn recent(&self, limit: usize) -> Vec<Mission> {
        let mut all = Vec::new();
        for entry in self.missions.iter() {
            all.push(entry.lock().await.clone());
        }
        all.sort_by_key(|m: &Mission| std::cmp::Reverse(m.started_at));
        all.truncate(limit);
        all
    }

    /// Starts a mission for a distributed update. Called by the gateway's boot wiring, which
    /// subscribes to `unified_logic.update` (and `unified_logic.handshake_complete`) and
    /// calls this for every distributed update/handshake. Uses `risk_level`'s default
    /// observation window; see `start_mission_with_window` to override it (e.g. in tests).
    pub fn start_mission(
        self: &Arc<Self>,
        update_id: String,
        component_targets: Vec<String>,
        expected_metrics: Vec<String>,
        risk_level: RiskLevel,
    ) -> String {
        self.start_mission_with_window(update_id, component_targets, expected_metrics, risk_level, None)
    }

    /// Same as `start_mission`, but `window_override` replaces `risk_level`'s default
    /// observation window when present. Exists so tests (and an operator override, if ever
    /// needed) aren't bound to a 72-hour critical-risk window to exercise a conclusion.
    pub fn start_mission_with_window(
        self: &Arc<Self>,
        update_id: String,
        component_targets: Vec<String>,
        expected_metrics: Vec<String>,
        risk_level: RiskLevel,
        window_override: Option<Duration>,
    ) -> String {
        let mission_id = format!("mission_update_{update_id}");
        let window = window_override.unwrap_or_else(|| risk_level.default_observation_window());
        let now = Utc::now();
        let mission = Mission {
            mission_id: mission_id.clone(),
            update_id: update_id.clone(),
            component_targets,
            expected_metrics,
            phases: vec![Phase::Proposed, Phase::Deployed, Phase::Observing],
            observation_window_secs: window.as_secs(),
            started_at: now,
            ends_at: now + chrono::Duration::seconds(window.as_secs() as i64),
            health_checks: Vec::new(),
            anomalies: Vec::new(),
            stability_score: 1.0,
            verdict: None,
            retrospective: None,
        };
        self.missions.insert(mission_id.clone(), Mutex::new(mission));

        let loop_ref = self.clone();
        let id = mission_id.clone();
        tokio::spawn(async move { loop_ref.run(id, window).await });

        mission_id
    }

    async fn run(self: Arc<Self>, mission_id: String, window: Duration) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        let deadline = tokio::time::Instant::now() + window;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.conclude(&mission_id).await;
                    return;
                }
            }

            let (update_id, targets, metrics) = {
                let Some(entry) = self.missions.get(&mission_id) else { return };
                let mission = entry.lock().await;
                (
                    mission.update_id.clone(),
                    mission.component_targets.clone(),
                    mission.expected_metrics.clone(),
                )
            };

            let (checks, anomalies) = self.probe.sample(&update_id, &targets, &metrics).await;
            let critical = anomalies.iter().any(|a| {
                matches!(a.severity, crate::types::AnomalySeverity::Critical)
            });

            if let Some(entry) = self.missions.get(&mission_id) {
                let mut mission = entry.lock().await;
                mission.apply_tick(checks, anomalies);
                info!(
                    target: "grace::missions",
                    mission_id = %mission_id,
                    stability_score = mission.stability_score,
                    "observation tick"
                );
            }

            if critical {
                self.conclude(&mission_id).await;
                return;
            }
        }
    }

    /// Computes the final verdict, publishes the retrospective, writes the learning record,
    /// opens a CAPA for unstable outcomes, and — for `unstable` — sends a rollback request
    /// over the mailbox rather than calling the Hub directly.
    async fn conclude(&self, mission_id: &str) {
        let Some(entry) = self.missions.get(mission_id) else { return };
        let mut mission = entry.lock().await;
        if mission.verdict.is_some() {
            return;
        }
        let verdict = mission.compute_verdict();
        mission.verdict = Some(verdict);
        mission.phases.push(match verdict {
            Verdict::Stable | Verdict::Acceptable => Phase::Stable,
            Verdict::Unstable => Phase::Unstable,
        });
        mission.phases.push(Phase::Learned);
        mission.retrospective = Some(format!(
            "verdict={:?} stability_score={:.3} anomalies={} health_checks={}",
            verdict,
            mission.stability_score,
            mission.anomalies.len(),
            mission.health_checks.len()
        ));
        let snapshot = mission.clone();
        drop(mission);

        self.mesh
            .publish(
                Event::new(
                    "mission.phase_transition",
                    "observation_loop",
                    serde_json::json!({
                        "mission_id": mission_id,
                        "update_id": snapshot.update_id,
                        "verdict": verdict,
                        "stability_score": snapshot.stability_score,
                    }),
                )
                .with_audit(true),
            )
            .await;

        let _ = self
            .audit
            .append(AppendRequest {
                actor: "observation_loop",
                action: "mission_concluded",
                subsystem: "grace-missions",
                resource: &snapshot.update_id,
                payload: serde_json::json!({
                    "mission_id": mission_id,
                    "verdict": verdict,
                    "stability_score": snapshot.stability_score,
                }),
                result: "concluded",
            })
            .await;

        self.learning
            .record(&LearningRecord {
                mission_id: mission_id.to_string(),
                update_id: snapshot.update_id.clone(),
                features: serde_json::json!({
                    "component_targets": snapshot.component_targets,
                    "expected_metrics": snapshot.expected_metrics,
                    "anomalies": snapshot.anomalies,
                    "health_checks": snapshot.health_checks,
                }),
                verdict,
                stability_score: snapshot.stability_score,
                recorded_at: Utc::now(),
            })
            .ok();

        if verdict == Verdict::Unstable {
            let tags = root_cause_tags_for(verdict, &snapshot);
            self.capa.auto_create(&snapshot, tags).await;

            let req = RollbackRequest {
                update_id: snapshot.update_id.clone(),
                reason: format!(
                    "mission {} verdict unstable (stability_score={:.3})",
                    mission_id, snapshot.stability_score
                ),
            };
            if let Err(err) = self.rollback_tx.send(req).await {
                warn!(target: "grace::missions", mission_id, %err, "rollback mailbox closed, could not request rollback");
            }
        } else {
            let req = grace_logic_hub::StabilizeRequest {
                update_id: snapshot.update_id.clone(),
            };
            if let Err(err) = self.stabilize_tx.send(req).await {
                warn!(target: "grace::missions", mission_id, %err, "stabilize mailbox closed, could not mark update stable");
            }
        }
    }

    /// Correlates an externally reported regression against recent missions.
    /// Returns the best-matching mission id and score when it clears the 0.5 threshold.
    pub async fn correlate_regression(&self, report: &RegressionReport) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for entry in self.missions.iter() {
            let mission = entry.lock().await;
            let component_overlap = overlap_score(&report.components, &mission.component_targets) * 0.5;
            let metric_overlap = overlap_score(&report.metrics, &mission.expected_metrics) * 0.3;
            let elapsed = (report.detected_at - mission.started_at).num_seconds().unsigned_abs();
            let window = mission.observation_window_secs.max(1);
            let temporal = (1.0 - (elapsed as f64 / window as f64).min(1.0)) * 0.2;
            let score = component_overlap + metric_overlap + temporal;
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((mission.mission_id.clone(), score));
            }
        }
        best.filter(|(_, score)| *score >= 0.5)
    }

    /// Triggers rollback for a mission attributed a regression via `correlate_regression`,
    /// independent of the normal observation-window conclusion path.
    pub async fn trigger_rollback(&self, mission_id: &str, reason: &str) -> MissionResult<()> {
        let update_id = {
            let entry = self
                .missions
                .get(mission_id)
                .ok_or_else(|| MissionError::NotFound(mission_id.to_string()))?;
            entry.lock().await.update_id.clone()
        };
        self.rollback_tx
            .send(RollbackRequest {
                update_id,
                reason: reason.to_string(),
            })
            .await
            .map_err(|_| MissionError::NotFound(mission_id.to_string()))
    }
}

fn overlap_score(reported: &[String], mission: &[String]) -> f64 {
    if reported.is_empty() || mission.is_empty() {
        return 0.0;
    }
    let matches = reported.iter().filter(|r| mission.contains(r)).count();
    matches as f64 / reported.len() as f64
}
