use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory access denied: {reason}")]
    MemoryAccessDenied { reason: String },

    #[error("no memory backend available")]
    MemoryBackendUnavailable,

    #[error(transparent)]
    Grace(#[from] grace_core::GraceError),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
