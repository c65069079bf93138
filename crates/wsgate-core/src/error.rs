use thiserror::Error;

/// Errors produced by the gateway protocol layer.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("duplicate client id: {0}")]
    DuplicateClient(String),

    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("user already bound on connection {0}")]
    UserAlreadyBound(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("verifier error: {0}")]
    Verifier(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::Codec(e.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;
