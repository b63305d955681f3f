//! Uniform component lifecycle, trust registry, and heartbeat supervision.
//!
//! `Component` is a trait rather than a duck-typed bag of attributes — component-type-
//! specific data lives in `ComponentKind`, a tagged enum, deliberately chosen over dynamic
//! dispatch for components.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{GraceError, GraceResult};
use crate::mesh::{Event, EventMesh, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Created,
    Activating,
    Active,
    Paused,
    Deactivating,
    Stopped,
    Error,
}

impl ComponentStatus {
    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: ComponentStatus) -> bool {
        use ComponentStatus::*;
        if next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Created, Activating)
                | (Activating, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Deactivating)
                | (Paused, Deactivating)
                | (Deactivating, Stopped)
                | (Error, Activating)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Untrusted = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Verified = 4,
}

/// Component-type-specific fields, tagged rather than duck-typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentKind {
    MemoryBackend { backend_name: String },
    CodingAgent { runtime: String },
    PlaybookExecutor { executor_schema_version: u16 },
    MlModel { model_family: String },
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub component_id: String,
    pub status: ComponentStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub component_id: String,
    pub component_type: String,
    pub version: String,
    pub status: ComponentStatus,
    pub trust_level: TrustLevel,
    pub role_tags: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub capabilities: Vec<String>,
    pub expected_metrics: Vec<String>,
    pub kind: ComponentKind,
}

/// Behavior every component implements; the framework calls these, components never call
/// each other directly.
#[async_trait]
pub trait Component: Send + Sync {
    fn component_id(&self) -> &str;
    async fn activate(&self) -> bool;
    async fn deactivate(&self) -> bool;
    async fn status(&self) -> StatusReport;
    async fn heartbeat(&self);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ManifestQuery {
    pub trust_at_least: Option<TrustLevel>,
    pub tag: Option<String>,
    pub component_type: Option<String>,
    pub status: Option<ComponentStatus>,
}

#[derive(Debug, Serialize)]
pub struct ManifestStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_trust: HashMap<String, usize>,
}

/// The process-wide component registry. Exclusively owns `ComponentRecord`s (
/// ownership rule); the Hub and Missions reach it only through method calls passed in at
/// boot, never a hidden global lookup.
pub struct Manifest {
    records: DashMap<String, ComponentRecord>,
    mesh: Arc<EventMesh>,
    heartbeat_interval: Duration,
}

impl Manifest {
    pub fn new(mesh: Arc<EventMesh>, heartbeat_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            records: DashMap::new(),
            mesh,
            heartbeat_interval,
        })
    }

    pub fn register(
        &self,
        component_id: impl Into<String>,
        component_type: impl Into<String>,
        version: impl Into<String>,
        trust_level: TrustLevel,
        role_tags: Vec<String>,
        capabilities: Vec<String>,
        expected_metrics: Vec<String>,
        kind: ComponentKind,
    ) -> ComponentRecord {
        let component_id = component_id.into();
        let record = ComponentRecord {
            component_id: component_id.clone(),
            component_type: component_type.into(),
            version: version.into(),
            status: ComponentStatus::Created,
            trust_level,
            role_tags,
            last_heartbeat: Utc::now(),
            capabilities,
            expected_metrics,
            kind,
        };
        self.records.insert(component_id, record.clone());
        record
    }

    pub fn unregister(&self, component_id: &str) -> Option<ComponentRecord> {
        self.records.remove(component_id).map(|(_, r)| r)
    }

    pub fn get(&self, component_id: &str) -> Option<ComponentRecord> {
        self.records.get(component_id).map(|r| r.clone())
    }

    pub async fn transition(
        &self,
        component_id: &str,
        next: ComponentStatus,
    ) -> GraceResult<ComponentRecord> {
        let mut entry = self
            .records
            .get_mut(component_id)
            .ok_or_else(|| GraceError::ComponentNotFound(component_id.to_string()))?;

        if !entry.status.can_transition_to(next) {
            return Err(GraceError::StateError {
                component_id: component_id.to_string(),
                from: format!("{:?}", entry.status),
                to: format!("{:?}", next),
            });
        }
        entry.status = next;
        let record = entry.clone();
        drop(entry);

        let event_type = match next {
            ComponentStatus::Active => "component.activated",
            ComponentStatus::Stopped | ComponentStatus::Deactivating => "component.deactivated",
            ComponentStatus::Error => "component.error",
            _ => "component.status_changed",
        };
        self.mesh
            .publish(
                Event::new(
                    event_type,
                    component_id,
                    serde_json::json!({ "component_id": component_id, "status": next }),
                )
                .with_priority(if next == ComponentStatus::Error {
                    Priority::High
                } else {
                    Priority::Normal
                }),
            )
            .await;

        Ok(record)
    }

    pub fn record_heartbeat(&self, component_id: &str) -> GraceResult<()> {
        let mut entry = self
            .records
            .get_mut(component_id)
            .ok_or_else(|| GraceError::ComponentNotFound(component_id.to_string()))?;
        entry.last_heartbeat = Utc::now();
        Ok(())
    }

    pub fn set_trust(&self, component_id: &str, trust: TrustLevel) -> GraceResult<()> {
        let mut entry = self
            .records
            .get_mut(component_id)
            .ok_or_else(|| GraceError::ComponentNotFound(component_id.to_string()))?;
        entry.trust_level = trust;
        Ok(())
    }

    pub fn query(&self, q: &ManifestQuery) -> Vec<ComponentRecord> {
        self.records
            .iter()
            .filter(|r| {
                q.trust_at_least.map_or(true, |t| r.trust_level >= t)
                    && q.tag.as_ref().map_or(true, |tag| r.role_tags.contains(tag))
                    && q.component_type
                        .as_ref()
                        .map_or(true, |t| &r.component_type == t)
                    && q.status.map_or(true, |s| r.status == s)
            })
            .map(|r| r.clone())
            .collect()
    }

    pub fn stats(&self) -> ManifestStats {
        let mut by_status = HashMap::new();
        let mut by_trust = HashMap::new();
        for r in self.records.iter() {
            *by_status.entry(format!("{:?}", r.status)).or_insert(0) += 1;
            *by_trust.entry(format!("{:?}", r.trust_level)).or_insert(0) += 1;
        }
        ManifestStats {
            total: self.records.len(),
            by_status,
            by_trust,
        }
    }

    pub fn snapshot(&self) -> Vec<ComponentRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    /// Background sweep for missed heartbeats, spawned once at boot as a periodic
    /// `tokio::time::interval` loop.
    pub fn spawn_heartbeat_sweep(self: Arc<Self>) {
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval / 3);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let stale: Vec<String> = self
                    .records
                    .iter()
                    .filter(|r| {
                        r.status == ComponentStatus::Active
                            && now.signed_duration_since(r.last_heartbeat).num_seconds()
                                > interval.as_secs() as i64 * 3
                    })
                    .map(|r| r.component_id.clone())
                    .collect();

                for component_id in stale {
                    if let Err(err) = self.transition(&component_id, ComponentStatus::Error).await
                    {
                        warn!(target: "grace::component", %component_id, %err, "failed to mark component ERROR after missed heartbeats");
                    } else {
                        info!(target: "grace::component", %component_id, "component marked ERROR: missed heartbeats");
                    }
                }
            }
        });
    }
}

/// A `Component` driven entirely by transitions through the `Manifest` it's registered in.
/// Concrete subsystems (a memory backend, a coding agent runtime) wrap this via composition
/// instead of re-implementing the lifecycle state machine themselves. `activate`/`deactivate`
/// are idempotent: calling either while already in the target state is a no-op success.
pub struct ManagedComponent {
    component_id: String,
    manifest: Arc<Manifest>,
}

impl ManagedComponent {
    pub fn new(component_id: impl Into<String>, manifest: Arc<Manifest>) -> Self {
        Self {
            component_id: component_id.into(),
            manifest,
        }
    }
}

#[async_trait]
impl Component for ManagedComponent {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn activate(&self) -> bool {
        match self.manifest.get(&self.component_id).map(|r| r.status) {
            Some(ComponentStatus::Active) => true,
            Some(ComponentStatus::Created) | Some(ComponentStatus::Error) => {
                self.manifest
                    .transition(&self.component_id, ComponentStatus::Activating)
                    .await
                    .is_ok()
                    && self
                        .manifest
                        .transition(&self.component_id, ComponentStatus::Active)
                        .await
                        .is_ok()
            }
            Some(ComponentStatus::Activating) | Some(ComponentStatus::Paused) => self
                .manifest
                .transition(&self.component_id, ComponentStatus::Active)
                .await
                .is_ok(),
            _ => false,
        }
    }

    async fn deactivate(&self) -> bool {
        match self.manifest.get(&self.component_id).map(|r| r.status) {
            Some(ComponentStatus::Stopped) => true,
            Some(ComponentStatus::Active) | Some(ComponentStatus::Paused) => {
                self.manifest
                    .transition(&self.component_id, ComponentStatus::Deactivating)
                    .await
                    .is_ok()
                    && self
                        .manifest
                        .transition(&self.component_id, ComponentStatus::Stopped)
                        .await
                        .is_ok()
            }
            _ => false,
        }
    }

    async fn status(&self) -> StatusReport {
        let status = self
            .manifest
            .get(&self.component_id)
            .map(|r| r.status)
            .unwrap_or(ComponentStatus::Error);
        StatusReport {
            component_id: self.component_id.clone(),
            status,
            detail: None,
        }
    }

    async fn heartbeat(&self) {
        let _ = self.manifest.record_heartbeat(&self.component_id);
    }
}

/// Validation payload for `component_handshake` updates, reused by the Hub and
/// the Handshake coordinator without a circular crate dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub component_id: String,
    pub component_type: String,
    pub capabilities: Vec<String>,
    pub expected_metrics: Vec<String>,
    pub version: String,
    pub signature: Option<String>,
    pub required_acks: Option<Vec<String>>,
    pub trust_level: Option<TrustLevel>,
}

pub fn payload_to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::EventMesh;

    fn test_manifest() -> Arc<Manifest> {
        let mesh = EventMesh::new(100);
        Manifest::new(mesh, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn lifecycle_follows_declared_order() {
        let manifest = test_manifest();
        manifest.register(
            "svc1",
            "coding_agent",
            "1.0.0",
            TrustLevel::Medium,
            vec!["worker".into()],
            vec!["activate".into()],
            vec!["latency_ms".into()],
            ComponentKind::CodingAgent {
                runtime: "wasm".into(),
            },
        );

        manifest.transition("svc1", ComponentStatus::Activating).await.unwrap();
        manifest.transition("svc1", ComponentStatus::Active).await.unwrap();
        assert_eq!(manifest.get("svc1").unwrap().status, ComponentStatus::Active);

        // Illegal: can't jump straight from Active to Stopped.
        let err = manifest.transition("svc1", ComponentStatus::Stopped).await;
        assert!(matches!(err, Err(GraceError::StateError { .. })));

        manifest.transition("svc1", ComponentStatus::Paused).await.unwrap();
        manifest.transition("svc1", ComponentStatus::Active).await.unwrap();
        manifest.transition("svc1", ComponentStatus::Deactivating).await.unwrap();
        manifest.transition("svc1", ComponentStatus::Stopped).await.unwrap();
        assert_eq!(manifest.get("svc1").unwrap().status, ComponentStatus::Stopped);
    }

    #[tokio::test]
    async fn any_state_can_error_and_reactivate() {
        let manifest = test_manifest();
        manifest.register(
            "svc2",
            "ml_model",
            "1.0.0",
            TrustLevel::Low,
            vec![],
            vec![],
            vec![],
            ComponentKind::MlModel {
                model_family: "classifier".into(),
            },
        );
        manifest.transition("svc2", ComponentStatus::Activating).await.unwrap();
        manifest.transition("svc2", ComponentStatus::Active).await.unwrap();

        manifest.transition("svc2", ComponentStatus::Error).await.unwrap();
        assert_eq!(manifest.get("svc2").unwrap().status, ComponentStatus::Error);

        manifest.transition("svc2", ComponentStatus::Activating).await.unwrap();
        assert_eq!(manifest.get("svc2").unwrap().status, ComponentStatus::Activating);
    }

    #[test]
    fn trust_levels_order_by_earned_rank() {
        assert!(TrustLevel::Verified > TrustLevel::High);
        assert!(TrustLevel::High > TrustLevel::Medium);
        assert!(TrustLevel::Untrusted < TrustLevel::Low);
    }

    #[test]
    fn query_filters_by_trust_tag_and_status() {
        let manifest = test_manifest();
        manifest.register(
            "a",
            "memory_backend",
            "1.0.0",
            TrustLevel::High,
            vec!["storage".into()],
            vec![],
            vec![],
            ComponentKind::MemoryBackend {
                backend_name: "sled".into(),
            },
        );
        manifest.register(
            "b",
            "memory_backend",
            "1.0.0",
            TrustLevel::Low,
            vec!["storage".into()],
            vec![],
            vec![],
            ComponentKind::MemoryBackend {
                backend_name: "scratch".into(),
            },
        );

        let high_trust = manifest.query(&ManifestQuery {
            trust_at_least: Some(TrustLevel::High),
            ..Default::default()
        });
        assert_eq!(high_trust.len(), 1);
        assert_eq!(high_trust[0].component_id, "a");

        let by_tag = manifest.query(&ManifestQuery {
            tag: Some("storage".into()),
            ..Default::default()
        });
        assert_eq!(by_tag.len(), 2);
    }

    #[test]
    fn heartbeat_on_unknown_component_errors() {
        let manifest = test_manifest();
        let err = manifest.record_heartbeat("ghost");
        assert!(matches!(err, Err(GraceError::ComponentNotFound(_))));
    }

    #[tokio::test]
    async fn repeated_activate_on_active_component_is_a_no_op() {
        let manifest = test_manifest();
        manifest.register(
            "svc3",
            "generic",
            "1.0.0",
            TrustLevel::Low,
            vec![],
            vec![],
            vec![],
            ComponentKind::Generic,
        );
        let component = ManagedComponent::new("svc3", manifest.clone());

        assert!(component.activate().await);
        assert_eq!(manifest.get("svc3").unwrap().status, ComponentStatus::Active);

        // Double-activate is a no-op that still reports success.
        assert!(component.activate().await);
        assert_eq!(manifest.get("svc3").unwrap().status, ComponentStatus::Active);
        assert_eq!(component.status().await.status, ComponentStatus::Active);
    }

    #[tokio::test]
    async fn deactivate_then_reactivate_round_trips() {
        let manifest = test_manifest();
        manifest.register(
            "svc4",
            "generic",
            "1.0.0",
            TrustLevel::Low,
            vec![],
            vec![],
            vec![],
            ComponentKind::Generic,
        );
        let component = ManagedComponent::new("svc4", manifest.clone());

        assert!(component.activate().await);
        assert!(component.deactivate().await);
        assert_eq!(manifest.get("svc4").unwrap().status, ComponentStatus::Stopped);

        // Stopped isn't a re-activatable state without going through Error first; a fresh
        // Created component is, which `activate` already covers above.
        assert!(component.deactivate().await, "deactivate on Stopped is also idempotent");
    }
}
