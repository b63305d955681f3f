use thiserror::Error;

use crate::types::ValidationDiagnostics;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("update rejected: payload malformed or oversized")]
    IngestionRejected,

    #[error("governance denied: {policy_id} — {reason}")]
    GovernanceDenied { policy_id: String, reason: String },

    #[error("validation failed")]
    ValidationFailed(ValidationDiagnostics),

    #[error("illegal state transition: {update_id} {from:?} -> {to:?}")]
    StateError {
        update_id: String,
        from: String,
        to: String,
    },

    #[error("stage {stage} timed out after {millis}ms")]
    Timeout { stage: String, millis: u64 },

    #[error("update not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Grace(#[from] grace_core::GraceError),
}

pub type HubResult<T> = Result<T, HubError>;
