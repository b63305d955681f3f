//! Grace control plane core: crypto & audit (A), event mesh (B), component framework (C),
//! governance engine (D), and port manager & watchdog (E). Everything else in the
//! workspace (`grace-memory`, `grace-logic-hub`, `grace-missions`, `grace-handshake`)
//! depends only on these modules — never the reverse.

pub mod audit;
pub mod component;
pub mod config;
pub mod crypto;
pub mod error;
pub mod governance;
pub mod mesh;
pub mod ports;

pub use audit::{AppendRequest, AuditEntry, AuditLog, IntegrityReport};
pub use component::{
    payload_to_value, Component, ComponentKind, ComponentRecord, ComponentStatus,
    HandshakeRequest, ManagedComponent, Manifest, ManifestQuery, ManifestStats, StatusReport,
    TrustLevel,
};
pub use config::CoreConfig;
pub use crypto::{CryptoEngine, SignedPayload};
pub use error::{GraceError, GraceResult};
pub use governance::{Condition, Decision, GovernanceEngine, Policy, PolicyDecision};
pub use mesh::{Event, EventMesh, Priority, RouteRule};
pub use ports::{HealthStatus, PortAllocation, PortManager};
