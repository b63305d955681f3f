//! Shared process state, constructed once at boot and handed to every route handler through
//! `axum::extract::State` — no hidden globals.

use std::sync::Arc;

use grace_core::{AuditLog, CryptoEngine, EventMesh, GovernanceEngine, Manifest, PortManager};
use grace_handshake::HandshakeCoordinator;
use grace_logic_hub::UnifiedLogicHub;
use grace_memory::MemoryFusionGateway;
use grace_missions::{CapaRegistry, ObservationLoop};

pub struct AppState {
    pub manifest: Arc<Manifest>,
    pub mesh: Arc<EventMesh>,
    pub audit: Arc<AuditLog>,
    pub governance: Arc<GovernanceEngine>,
    pub ports: Arc<PortManager>,
    pub hub: Arc<UnifiedLogicHub>,
    pub memory: Arc<MemoryFusionGateway>,
    pub observation: Arc<ObservationLoop>,
    pub capa: Arc<CapaRegistry>,
    pub handshake: Arc<HandshakeCoordinator>,
    pub crypto: CryptoEngine,
}
