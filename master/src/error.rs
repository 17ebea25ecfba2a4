use shared::{ProtocolError, UNKNOWN_REGISTRY_ID};
use std::io;

/// Everything the master server can refuse or fail at.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unknown registry id {0}")]
    UnknownRegistryId(String),
    #[error("registration token missing or wrong")]
    Unauthorized,
    #[error("too many requests")]
    RateLimited,
    #[error("registry is full ({0} entries)")]
    RegistryFull(usize),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration: {0}")]
    Config(String),
}

impl MasterError {
    /// Machine-readable reason sent back in an ERROR response.
    pub fn reason(&self) -> &'static str {
        match self {
            MasterError::InvalidPayload(_) => "invalid_payload",
            MasterError::UnknownRegistryId(_) => UNKNOWN_REGISTRY_ID,
            MasterError::Unauthorized => "unauthorised",
            MasterError::RateLimited => "rate_limited",
            MasterError::RegistryFull(_) => "registry_full",
            MasterError::Protocol(_) => "malformed",
            MasterError::Io(_) | MasterError::Config(_) => "internal",
        }
    }
}
