//! Crate-wide error kinds for the crypto/audit, mesh, component, governance, and port
//! subsystems. Each variant maps to one of the error kinds spec'd in the control plane's
//! error-handling design (§7): a stable machine-readable `kind`, a human reason, and
//! (where relevant) the resource id needed for cross-reference.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraceError {
    #[error("signature invalid")]
    SignatureInvalid,

    #[error("audit append failed: {reason}")]
    AuditWriteError { reason: String },

    #[error("audit chain integrity broken at sequence {sequence}")]
    ChainIntegrityBroken { sequence: u64 },

    #[error("illegal state transition: {component_id} {from:?} -> {to:?}")]
    StateError {
        component_id: String,
        from: String,
        to: String,
    },

    #[error("governance denied: {policy_id} — {reason}")]
    GovernanceDenied { policy_id: String, reason: String },

    #[error("no port available in configured range")]
    NoPortAvailable,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("component not found: {0}")]
    ComponentNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type GraceResult<T> = Result<T, GraceError>;
