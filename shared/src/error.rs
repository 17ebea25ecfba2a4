use std::io;

/// Failure to read, write or decode a framed message. On a live connection
/// any of these drops the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },
    #[error("unexpected {0} message")]
    Unexpected(&'static str),
}

impl ProtocolError {
    /// True when the error came from the transport rather than the peer's
    /// message contents.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}
