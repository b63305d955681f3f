use thiserror::Error;

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("no mission found for {0}")]
    NotFound(String),
    #[error("illegal CAPA transition for {capa_id}: {from} -> {to}")]
    CapaStateError {
        capa_id: String,
        from: String,
        to: String,
    },
    #[error(transparent)]
    Hub(#[from] grace_logic_hub::HubError),
    #[error(transparent)]
    Core(#[from] grace_core::GraceError),
    #[error(transparent)]
    Storage(#[from] sled::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type MissionResult<T> = Result<T, MissionError>;
