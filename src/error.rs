use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid property path: {0}")]
    InvalidPath(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Handler panicked: {0}")]
    HandlerFault(String),

    #[error("Call failed: {0}")]
    Call(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("No factory for {factory} in group {group}")]
    FactoryNotFound { group: String, factory: String },

    #[error("Network is not started")]
    NotStarted,

    #[error("Network is already ready")]
    AlreadyReady,

    #[error("Network is not ready")]
    NotReady,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

impl LinkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LinkError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
