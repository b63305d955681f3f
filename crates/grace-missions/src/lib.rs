//! Mission & Observation Loop and CAPA & Learning Sink. Watches every
//! distributed update and completed handshake for its observation window, scores stability,
//! and escalates `unstable` verdicts into an auto-opened CAPA plus a rollback request sent
//! to `grace-logic-hub` over the mailbox (never a direct call back into the Hub).

pub mod capa;
pub mod error;
pub mod health;
pub mod observation;
pub mod types;

pub use capa::{root_cause_tags_for, CapaRegistry, LearningSink};
pub use error::{MissionError, MissionResult};
pub use health::{HealthProbe, NullHealthProbe, ScriptedAnomalyProbe};
pub use observation::ObservationLoop;
pub use types::{
    Anomaly, AnomalySeverity, CapaClassification, CapaRecord, CapaStatus, HealthCheckResult,
    LearningRecord, Mission, Phase, RegressionReport, Verdict,
};

#[cfg(test)]
mod tests {
    use super::*;
    use grace_core::{AuditLog, CryptoEngine, Event, EventMesh};
    use grace_logic_hub::{RiskLevel, RollbackRequest};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_setup() -> (Arc<AuditLog>, Arc<EventMesh>, mpsc::Receiver<RollbackRequest>) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let crypto = CryptoEngine::generate();
        let audit = AuditLog::open(&db, crypto).unwrap();
        let mesh = EventMesh::new(100);
        let (_tx, rx) = mpsc::channel(16);
        (audit, mesh, rx)
    }

    fn observation_loop(
        audit: Arc<AuditLog>,
        mesh: Arc<EventMesh>,
        probe: Arc<dyn HealthProbe>,
        tick: Duration,
    ) -> (
        Arc<ObservationLoop>,
        Arc<CapaRegistry>,
        mpsc::Receiver<RollbackRequest>,
        mpsc::Receiver<grace_logic_hub::StabilizeRequest>,
    ) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let capa = CapaRegistry::new(audit.clone());
        let learning = LearningSink::open(&db).unwrap();
        let (rollback_tx, rollback_rx) = mpsc::channel(16);
        let (stabilize_tx, stabilize_rx) = mpsc::channel(16);
        let obs = ObservationLoop::new(
            audit,
            mesh,
            capa.clone(),
            learning,
            rollback_tx,
            stabilize_tx,
            probe,
            tick,
        );
        (obs, capa, rollback_rx, stabilize_rx)
    }

    #[tokio::test]
    async fn healthy_mission_reaches_stable_verdict() {
        let (audit, mesh, _rx) = test_setup();
        let (obs, _capa, mut rollback_rx, mut stabilize_rx) = observation_loop(
            audit,
            mesh,
            Arc::new(NullHealthProbe),
            Duration::from_millis(20),
        );

        // `RiskLevel::Low`'s default observation window is 1h; a real conclusion within the
        // test's time budget needs the window itself overridden, not just a fast tick.
        let mission_id = obs.start_mission_with_window(
            "update_ok".into(),
            vec!["inference_engine".into()],
            vec!["latency_ms".into()],
            RiskLevel::Low,
            Some(Duration::from_millis(100)),
        );

        let req = tokio::time::timeout(Duration::from_secs(2), stabilize_rx.recv())
            .await
            .expect("stabilize request expected")
            .unwrap();
        assert_eq!(req.update_id, "update_ok");

        let mission = obs.get(&mission_id).await.unwrap();
        assert_eq!(mission.verdict, Some(Verdict::Stable));
        assert!(rollback_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn critical_anomaly_triggers_rollback_and_capa() {
        let (audit, mesh, _rx) = test_setup();
        let probe = Arc::new(ScriptedAnomalyProbe {
            severity: AnomalySeverity::Critical,
            metric: "error_rate".into(),
            detail: "spike".into(),
        });
        let (obs, capa, mut rollback_rx, _stabilize_rx) =
            observation_loop(audit, mesh, probe, Duration::from_millis(20));

        let mission_id = obs.start_mission(
            "update_bad".into(),
            vec!["inference_engine".into()],
            vec!["error_rate".into()],
            RiskLevel::High,
        );

        let req = tokio::time::timeout(Duration::from_secs(2), rollback_rx.recv())
            .await
            .expect("rollback request expected")
            .unwrap();
        assert_eq!(req.update_id, "update_bad");

        let mission = obs.get(&mission_id).await.unwrap();
        assert_eq!(mission.verdict, Some(Verdict::Unstable));
        assert_eq!(capa.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn capa_rejects_illegal_transition() {
        let (audit, _mesh, _rx) = test_setup();
        let capa = CapaRegistry::new(audit);
        let mission = Mission {
            mission_id: "mission_x".into(),
            update_id: "update_x".into(),
            component_targets: vec!["svc".into()],
            expected_metrics: vec!["latency_ms".into()],
            phases: vec![Phase::Unstable, Phase::Learned],
            observation_window_secs: 60,
            started_at: chrono::Utc::now(),
            ends_at: chrono::Utc::now(),
            health_checks: Vec::new(),
            anomalies: Vec::new(),
            stability_score: 0.5,
            verdict: Some(Verdict::Unstable),
            retrospective: None,
        };
        let record = capa.auto_create(&mission, vec!["Critical:error_rate".into()]).await;
        assert_eq!(record.status, CapaStatus::Open);

        let result = capa.transition(&record.id, CapaStatus::Closed).await;
        assert!(result.is_err());

        capa.transition(&record.id, CapaStatus::Analyzing).await.unwrap();
        let record = capa.transition(&record.id, CapaStatus::Planned).await.unwrap();
        assert_eq!(record.status, CapaStatus::Planned);
    }
}
