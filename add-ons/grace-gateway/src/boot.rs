//! Singleton construction and wiring, in dependency order: storage, then crypto/audit, then
//! the mesh, then everything that reads events off the mesh.

use std::sync::Arc;
use std::time::Duration;

use grace_core::{
    AuditLog, CryptoEngine, EventMesh, GovernanceEngine, Manifest, Policy, PortManager, RouteRule,
};
use grace_handshake::HandshakeCoordinator;
use grace_logic_hub::{RiskLevel, UnifiedLogicHub, UpdateType};
use grace_memory::{InMemoryBackend, MemoryBackend, MemoryFusionGateway, SledBackend};
use grace_missions::{CapaRegistry, LearningSink, NullHealthProbe, ObservationLoop};
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::state::AppState;

#[derive(serde::Deserialize)]
struct RouteRuleFile {
    #[serde(default)]
    routes: Vec<RouteRule>,
}

#[derive(serde::Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: Vec<Policy>,
}

fn load_routes(path: &str) -> Vec<RouteRule> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match toml::from_str::<RouteRuleFile>(&raw) {
        Ok(file) => file.routes,
        Err(err) => {
            warn!(target: "grace::gateway", %path, %err, "failed to parse config file");
            Vec::new()
        }
    }
}

fn load_policies(path: &str) -> Vec<Policy> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match toml::from_str::<PolicyFile>(&raw) {
        Ok(file) => file.policies,
        Err(err) => {
            warn!(target: "grace::gateway", %path, %err, "failed to parse config file");
            Vec::new()
        }
    }
}

/// Constructs every subsystem and wires the cross-crate event subscriptions that keep
/// Missions and the Hub decoupled from each other: Missions only ever learns about
/// a new distributed update or completed handshake by listening on the mesh, never by being
/// handed an `Arc<UnifiedLogicHub>` to call into directly.
pub async fn boot(core: &grace_core::CoreConfig, gateway: &GatewayConfig) -> Arc<AppState> {
    std::fs::create_dir_all(&core.data_dir).expect("data directory is creatable");
    let db = sled::open(&core.data_dir).expect("sled db opens");

    let crypto = CryptoEngine::generate();
    info!(target: "grace::gateway", public_key = %crypto.public_key_hex(), "crypto engine ready");

    let audit = AuditLog::open(&db, crypto.clone()).expect("audit log opens");

    let mesh = EventMesh::new(core.mesh_history_capacity);
    for route in load_routes("config/mesh_routes.toml") {
        mesh.load_route(route);
    }

    let policies = load_policies("config/governance_policies.toml");
    let governance = Arc::new(GovernanceEngine::new(policies));

    let manifest = Manifest::new(mesh.clone(), Duration::from_secs(core.heartbeat_interval_secs));
    manifest.clone().spawn_heartbeat_sweep();

    let ports = PortManager::open(&db, mesh.clone(), core.port_range_start, core.port_range_end)
        .expect("port manager opens");
    ports
        .clone()
        .spawn_watchdog(Duration::from_secs(core.watchdog_interval_secs));

    let (hub, rollback_rx, stabilize_rx) =
        UnifiedLogicHub::new(governance.clone(), crypto.clone(), audit.clone(), mesh.clone());
    hub.clone().spawn_rollback_drain(rollback_rx);
    hub.clone().spawn_stabilize_drain(stabilize_rx);

    let backends: Vec<(String, Arc<dyn MemoryBackend>)> = vec![
        (
            "knowledge".to_string(),
            Arc::new(SledBackend::open("knowledge", db.clone(), "seed")) as Arc<dyn MemoryBackend>,
        ),
        (
            "scratch".to_string(),
            Arc::new(InMemoryBackend::new("scratch")) as Arc<dyn MemoryBackend>,
        ),
    ];
    let memory = Arc::new(MemoryFusionGateway::new(
        backends,
        governance.clone(),
        crypto.clone(),
        audit.clone(),
        mesh.clone(),
    ));

    let capa = CapaRegistry::new(audit.clone());
    let learning = LearningSink::open(&db).expect("learning sink opens");
    let probe = Arc::new(NullHealthProbe);
    let observation = ObservationLoop::new(
        audit.clone(),
        mesh.clone(),
        capa.clone(),
        learning,
        hub.rollback_sender(),
        hub.stabilize_sender(),
        probe,
        Duration::from_secs(gateway.observation_tick_secs),
    );

    // `unified_logic.update` fires once an update reaches `distributed` (stage 7); its
    // payload only carries the signed package, so the full `LogicUpdate` (update_type,
    // component_targets, risk_level, content) is looked up back through the Hub rather than
    // duplicated onto the event. `component_handshake` updates skip this generic Mission —
    // their own 1-hour validation Mission starts from `handshake_complete` below instead, to
    // avoid two Missions racing to claim the same `mission_update_{id}` key.
    {
        let observation = observation.clone();
        let hub = hub.clone();
        let governance = governance.clone();
        mesh.subscribe("unified_logic.update", move |event| {
            let observation = observation.clone();
            let hub = hub.clone();
            let governance = governance.clone();
            async move {
                let Some(update_id) = event
                    .payload
                    .get("package")
                    .and_then(|p| p.get("update_id"))
                    .and_then(|v| v.as_str())
                else {
                    return;
                };
                let Some(update) = hub.get(update_id) else {
                    return;
                };

                // Governance policies are themselves subject to the Hub: a
                // `config`-type update targeting `governance` reloads the live policy set.
                if update.update_type == UpdateType::Config
                    && update.component_targets.iter().any(|t| t == "governance")
                {
                    if let Some(policies) = update
                        .content
                        .get("policies")
                        .and_then(|v| serde_json::from_value::<Vec<Policy>>(v.clone()).ok())
                    {
                        governance.reload(policies);
                        info!(target: "grace::gateway", update_id, "governance policies reloaded via distributed config update");
                    }
                    return;
                }

                if update.update_type == UpdateType::ComponentHandshake {
                    return;
                }
                observation.start_mission(
                    update.update_id,
                    update.component_targets,
                    Vec::new(),
                    update.risk_level,
                );
            }
        });
    }
    {
        let observation = observation.clone();
        mesh.subscribe("unified_logic.handshake_complete", move |event| {
            let observation = observation.clone();
            async move {
                let update_id = event
                    .payload
                    .get("update_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                if let Some(update_id) = update_id {
                    observation.start_mission(update_id, Vec::new(), Vec::new(), RiskLevel::Low);
                }
            }
        });
    }

    let handshake = HandshakeCoordinator::new(
        hub.clone(),
        manifest.clone(),
        audit.clone(),
        mesh.clone(),
        gateway.handshake_quorum.clone(),
        Duration::from_secs(gateway.handshake_window_secs),
    );
    handshake.spawn_ack_listener();

    Arc::new(AppState {
        manifest,
        mesh,
        audit,
        governance,
        ports,
        hub,
        memory,
        observation,
        capa,
        handshake,
        crypto,
    })
}

pub fn update_type_from_path_segment(segment: &str) -> Option<UpdateType> {
    match segment {
        "schema" => Some(UpdateType::Schema),
        "code-module" => Some(UpdateType::CodeModule),
        "playbook" => Some(UpdateType::Playbook),
        "config" => Some(UpdateType::Config),
        "metric-definition" => Some(UpdateType::MetricDefinition),
        "component-handshake" => Some(UpdateType::ComponentHandshake),
        _ => None,
    }
}
