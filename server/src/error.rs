//! Server-side error taxonomy.
//!
//! | Variant            | Effect on the connection / session            |
//! |--------------------|-----------------------------------------------|
//! | `Protocol`         | connection dropped                            |
//! | `Validation`       | REJECT sent, session continues, not an anomaly |
//! | `Capacity`         | join refused                                  |
//! | `Auth`             | join/rejoin refused, logged for moderation    |
//! | `TransientNetwork` | that connection enters grace handling         |

use shared::{ProtocolError, ReasonCode};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("action rejected: {0}")]
    Validation(ReasonCode),
    #[error("capacity: {0}")]
    Capacity(ReasonCode),
    #[error("auth: {0}")]
    Auth(ReasonCode),
    #[error("network failure on connection {conn}: {source}")]
    TransientNetwork {
        conn: u64,
        #[source]
        source: io::Error,
    },
    #[error("configuration: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Reason code sent to the client for errors that produce a REJECT.
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            ServerError::Validation(code)
            | ServerError::Capacity(code)
            | ServerError::Auth(code) => Some(*code),
            ServerError::Protocol(_) => Some(ReasonCode::Malformed),
            ServerError::TransientNetwork { .. } | ServerError::Config(_) | ServerError::Io(_) => {
                None
            }
        }
    }

    /// Classifies a rejection reason into the taxonomy.
    pub fn from_reason(code: ReasonCode) -> Self {
        match code {
            ReasonCode::SessionFull | ReasonCode::SpectatorsFull | ReasonCode::SlotTaken => {
                ServerError::Capacity(code)
            }
            ReasonCode::Banned | ReasonCode::InvalidToken => ServerError::Auth(code),
            _ => ServerError::Validation(code),
        }
    }
}
