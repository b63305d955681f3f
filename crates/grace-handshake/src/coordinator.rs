//! Component Handshake Protocol: a new or upgraded component enters the system
//! through a specialized `component_handshake` Logic Update, then an all-member acknowledgement
//! round that gates Manifest registration. Deliberately in-process pub/sub rather than a
//! networked gRPC/mTLS bridge — see DESIGN.md.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use grace_core::{
    payload_to_value, AppendRequest, AuditLog, ComponentKind, Event, EventMesh, HandshakeRequest,
    Manifest, TrustLevel,
};
use grace_logic_hub::{RiskLevel, SubmitRequest, UnifiedLogicHub, UpdateType};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::error::{HandshakeError, HandshakeResult};

struct HandshakeState {
    request: HandshakeRequest,
    quorum: Vec<String>,
    acked: HashSet<String>,
    done: Option<oneshot::Sender<()>>,
}

/// Owns the set of outstanding handshakes and the `handshake_ack` subscription that resolves
/// them. Construct with `new`, then call `spawn_ack_listener` once at boot — mirroring the
/// `new` / `spawn_*` split already used by `grace_core::component::Manifest` and
/// `grace_core::ports::PortManager`.
pub struct HandshakeCoordinator {
    hub: Arc<UnifiedLogicHub>,
    manifest: Arc<Manifest>,
    audit: Arc<AuditLog>,
    mesh: Arc<EventMesh>,
    default_quorum: Vec<String>,
    window: Duration,
    outstanding: dashmap::DashMap<String, Mutex<HandshakeState>>,
}

impl HandshakeCoordinator {
    pub fn new(
        hub: Arc<UnifiedLogicHub>,
        manifest: Arc<Manifest>,
        audit: Arc<AuditLog>,
        mesh: Arc<EventMesh>,
        default_quorum: Vec<String>,
        window: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub,
            manifest,
            audit,
            mesh,
            default_quorum,
            window,
            outstanding: dashmap::DashMap::new(),
        })
    }

    /// Subscribes to `handshake_ack` events on the mesh. Each ack tallies against its
    /// handshake's quorum set; once every required member has acked, `complete` runs.
    pub fn spawn_ack_listener(self: &Arc<Self>) {
        let coordinator = self.clone();
        self.mesh.subscribe("handshake_ack", move |event| {
            let coordinator = coordinator.clone();
            async move {
                let update_id = event
                    .payload
                    .get("update_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let acker = event
                    .payload
                    .get("acker")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                if let (Some(update_id), Some(acker)) = (update_id, acker) {
                    coordinator.on_ack(&update_id, &acker).await;
                }
            }
        });
    }

    /// Submits the onboarding `component_handshake` update, registers the quorum tally, and
    /// returns the update id immediately — the quorum wait and Manifest registration happen
    /// in a background task, matching the Hub's own fire-and-forget pipeline submission.
    pub async fn initiate(self: &Arc<Self>, request: HandshakeRequest) -> HandshakeResult<String> {
        let quorum = request
            .required_acks
            .clone()
            .unwrap_or_else(|| self.default_quorum.clone());

        let update_id = self
            .hub
            .submit(SubmitRequest {
                update_type: UpdateType::ComponentHandshake,
                component_targets: vec![request.component_id.clone()],
                content: payload_to_value(&request),
                created_by: "handshake_coordinator".into(),
                risk_level: RiskLevel::Medium,
            })
            .await
            .map_err(HandshakeError::Hub)?;

        let (done_tx, done_rx) = oneshot::channel();
        self.outstanding.insert(
            update_id.clone(),
            Mutex::new(HandshakeState {
                request: request.clone(),
                quorum: quorum.clone(),
                acked: HashSet::new(),
                done: Some(done_tx),
            }),
        );

        let _ = self
            .audit
            .append(AppendRequest {
                actor: "handshake_coordinator",
                action: "handshake_initiated",
                subsystem: "grace-handshake",
                resource: &request.component_id,
                payload: serde_json::json!({ "update_id": update_id, "quorum": quorum }),
                result: "announced",
            })
            .await;

        self.mesh
            .publish(
                Event::new(
                    "unified_logic.handshake_announce",
                    "grace-handshake",
                    serde_json::json!({
                        "update_id": update_id,
                        "component_id": request.component_id,
                        "quorum": quorum,
                    }),
                )
                .with_audit(true),
            )
            .await;

        let coordinator = self.clone();
        let id = update_id.clone();
        let window = self.window;
        tokio::spawn(async move {
            match tokio::time::timeout(window, done_rx).await {
                Ok(Ok(())) => coordinator.complete(&id).await,
                _ => coordinator.fail_timeout(&id).await,
            }
        });

        Ok(update_id)
    }

    async fn on_ack(&self, update_id: &str, acker: &str) {
        let Some(entry) = self.outstanding.get(update_id) else {
            return;
        };
        let mut state = entry.lock().await;
        if !state.quorum.iter().any(|m| m == acker) {
            warn!(target: "grace::handshake", update_id, acker, "ack from non-quorum member ignored");
            return;
        }
        state.acked.insert(acker.to_string());
        info!(
            target: "grace::handshake",
            update_id,
            acked = state.acked.len(),
            required = state.quorum.len(),
            "handshake ack recorded"
        );
        if state.acked.len() >= state.quorum.len() {
            if let Some(done) = state.done.take() {
                let _ = done.send(());
            }
        }
    }

    /// Registers the component in the Manifest and publishes `handshake_complete`. Starting
    /// the 1-hour validation Mission is Missions' job: it subscribes to `handshake_complete`
    /// the same way it subscribes to `unified_logic.update`, so this crate never depends on
    /// `grace-missions`.
    async fn complete(&self, update_id: &str) {
        let Some((_, state)) = self.outstanding.remove(update_id) else {
            return;
        };
        let request = state.into_inner().request;

        let record = self.manifest.register(
            request.component_id.clone(),
            request.component_type.clone(),
            request.version.clone(),
            request.trust_level.unwrap_or(TrustLevel::Low),
            vec![],
            request.capabilities.clone(),
            request.expected_metrics.clone(),
            ComponentKind::Generic,
        );

        let _ = self
            .audit
            .append(AppendRequest {
                actor: "handshake_coordinator",
                action: "handshake_quorum_reached",
                subsystem: "grace-handshake",
                resource: &request.component_id,
                payload: serde_json::json!({ "update_id": update_id }),
                result: "quorum_reached",
            })
            .await;

        self.mesh
            .publish(
                Event::new(
                    "unified_logic.handshake_complete",
                    "grace-handshake",
                    serde_json::json!({
                        "update_id": update_id,
                        "component_id": record.component_id,
                        "trust_level": record.trust_level,
                    }),
                )
                .with_audit(true),
            )
            .await;
    }

    async fn fail_timeout(&self, update_id: &str) {
        let component_id = match self.outstanding.remove(update_id) {
            Some((_, state)) => state.into_inner().request.component_id,
            None => update_id.to_string(),
        };

        let _ = self
            .audit
            .append(AppendRequest {
                actor: "handshake_coordinator",
                action: "handshake_quorum_timeout",
                subsystem: "grace-handshake",
                resource: &component_id,
                payload: serde_json::json!({ "update_id": update_id }),
                result: "quorum_timeout",
            })
            .await;

        if let Err(err) = self.hub.deny(update_id, "quorum_timeout").await {
            warn!(target: "grace::handshake", update_id, %err, "failed to mark handshake update failed after quorum timeout");
        }
        warn!(target: "grace::handshake", update_id, "handshake quorum timed out, manifest left unchanged");
    }
}
