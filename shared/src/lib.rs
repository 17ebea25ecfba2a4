//! Types shared by the session server, the master server and clients.

pub mod error;
pub mod framing;
pub mod master;
pub mod protocol;
pub mod rng;
pub mod state;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use error::ProtocolError;
pub use master::{
    ListFilter, MasterRequest, MasterResponse, ServerListing, ServerMetadata, UNKNOWN_REGISTRY_ID,
};
pub use protocol::{ClientMessage, ReasonCode, ServerMessage};
pub use rng::{RngState, SessionRng};
pub use state::{
    DiffError, Document, MatchResult, Phase, Role, SlotInfo, SlotStatus, Snapshot, StateDiff,
    StateUpdate,
};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_SERVER_PORT: u16 = 7777;
pub const DEFAULT_MASTER_PORT: u16 = 7700;
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_CHAT_LEN: usize = 256;

/// Current wall-clock time in milliseconds, used for PING/PONG timestamps.
pub fn timestamp_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}
