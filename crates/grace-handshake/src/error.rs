use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Hub(#[from] grace_logic_hub::HubError),
}

pub type HandshakeResult<T> = Result<T, HandshakeError>;
