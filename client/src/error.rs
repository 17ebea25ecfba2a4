use shared::{ProtocolError, ReasonCode};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("server refused: {0}")]
    Rejected(ReasonCode),
    #[error("master refused: {0}")]
    Master(String),
    #[error("connection closed by server")]
    Closed,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("not seated in a session")]
    NotJoined,
}
