//! Pluggable health sampling for the Observation Loop. Concrete metrics backends are out of
//! scope — this crate only defines the hook a real metrics integration would implement.

use async_trait::async_trait;
use chrono::Utc;

use crate::types::{Anomaly, AnomalySeverity, HealthCheckResult};

/// Samples the health of one mission's targets for a single observation tick. A real
/// deployment would implement this against its metrics store; tests and the default
/// gateway wiring use `NullHealthProbe`, which always reports healthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn sample(
        &self,
        update_id: &str,
        component_targets: &[String],
        expected_metrics: &[String],
    ) -> (Vec<HealthCheckResult>, Vec<Anomaly>);
}

pub struct NullHealthProbe;

#[async_trait]
impl HealthProbe for NullHealthProbe {
    async fn sample(
        &self,
        _update_id: &str,
        _component_targets: &[String],
        expected_metrics: &[String],
    ) -> (Vec<HealthCheckResult>, Vec<Anomaly>) {
        let now = Utc::now();
        let checks = expected_metrics
            .iter()
            .map(|m| HealthCheckResult {
                name: m.clone(),
                passed: true,
                sampled_at: now,
            })
            .collect();
        (checks, Vec::new())
    }
}

/// A fixed-anomaly probe useful for deterministic tests and for replaying an externally
/// detected regression (`ObservationLoop::force_anomaly`).
pub struct ScriptedAnomalyProbe {
    pub severity: AnomalySeverity,
    pub metric: String,
    pub detail: String,
}

#[async_trait]
impl HealthProbe for ScriptedAnomalyProbe {
    async fn sample(
        &self,
        _update_id: &str,
        _component_targets: &[String],
        expected_metrics: &[String],
    ) -> (Vec<HealthCheckResult>, Vec<Anomaly>) {
        let now = Utc::now();
        let checks = expected_metrics
            .iter()
            .map(|m| HealthCheckResult {
                name: m.clone(),
                passed: false,
                sampled_at: now,
            })
            .collect();
        let anomaly = Anomaly {
            metric: self.metric.clone(),
            severity: self.severity,
            detected_at: now,
            detail: self.detail.clone(),
        };
        (checks, vec![anomaly])
    }
}
