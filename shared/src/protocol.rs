//! Gameplay wire messages.
//!
//! Every message is a JSON object whose `t` field names its kind
//! (`"HELLO"`, `"ACTION"`, `"STATE"`, ...). Dispatch is an exhaustive match
//! over these enums; an unknown kind fails to decode and is a protocol error.

use crate::state::{MatchResult, Phase, Role, SlotInfo, Snapshot, StateUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_version() -> u32 {
    crate::PROTOCOL_VERSION
}

/// Messages sent from a client to a session server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Hello {
        name: String,
        desired_role: Role,
        #[serde(default)]
        desired_slot: Option<u8>,
        #[serde(default)]
        session: Option<String>,
        #[serde(default = "default_version")]
        client_version: u32,
    },
    Rejoin {
        rejoin_token: String,
    },
    Action {
        slot: u8,
        /// STATE sequence number the client acted upon.
        sequence: u64,
        action_type: String,
        #[serde(default)]
        action_payload: Value,
    },
    Ready {
        ready: bool,
    },
    PauseVote {
        vote: bool,
    },
    Chat {
        text: String,
    },
    /// Ask for a full snapshot after a sequence gap.
    Resync,
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Leave,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "HELLO",
            ClientMessage::Rejoin { .. } => "REJOIN",
            ClientMessage::Action { .. } => "ACTION",
            ClientMessage::Ready { .. } => "READY",
            ClientMessage::PauseVote { .. } => "PAUSE_VOTE",
            ClientMessage::Chat { .. } => "CHAT",
            ClientMessage::Resync => "RESYNC",
            ClientMessage::Ping { .. } => "PING",
            ClientMessage::Pong { .. } => "PONG",
            ClientMessage::Leave => "LEAVE",
        }
    }
}

/// Messages sent from a session server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Welcome {
        session: String,
        slot: u8,
        role: Role,
        rejoin_token: String,
        snapshot: Snapshot,
        slots: Vec<SlotInfo>,
    },
    State {
        sequence: u64,
        update: StateUpdate,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        effects: Vec<String>,
    },
    Reject {
        reason_code: ReasonCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Slots {
        slots: Vec<SlotInfo>,
    },
    Phase {
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<MatchResult>,
    },
    PauseTally {
        votes: u32,
        needed: u32,
        paused: bool,
    },
    Chat {
        slot: u8,
        name: String,
        text: String,
    },
    Kicked {
        reason: String,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
}

impl ServerMessage {
    pub fn reject(reason_code: ReasonCode) -> Self {
        ServerMessage::Reject {
            reason_code,
            detail: None,
        }
    }

    pub fn reject_with(reason_code: ReasonCode, detail: impl Into<String>) -> Self {
        ServerMessage::Reject {
            reason_code,
            detail: Some(detail.into()),
        }
    }
}

/// Machine-readable rejection reasons, rendered by clients as localised text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NotYourTurn,
    OutOfRange,
    InsufficientResources,
    Malformed,
    UnknownAction,
    RuleViolation,
    Stale,
    Paused,
    NotRunning,
    NotParticipant,
    MatchInProgress,
    MatchEnded,
    SessionFull,
    SpectatorsFull,
    SlotTaken,
    NoSuchSession,
    Banned,
    InvalidToken,
    VersionMismatch,
    RateLimited,
    AlreadyJoined,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::NotYourTurn => "not_your_turn",
            ReasonCode::OutOfRange => "out_of_range",
            ReasonCode::InsufficientResources => "insufficient_resources",
            ReasonCode::Malformed => "malformed",
            ReasonCode::UnknownAction => "unknown_action",
            ReasonCode::RuleViolation => "rule_violation",
            ReasonCode::Stale => "stale",
            ReasonCode::Paused => "paused",
            ReasonCode::NotRunning => "not_running",
            ReasonCode::NotParticipant => "not_participant",
            ReasonCode::MatchInProgress => "match_in_progress",
            ReasonCode::MatchEnded => "match_ended",
            ReasonCode::SessionFull => "session_full",
            ReasonCode::SpectatorsFull => "spectators_full",
            ReasonCode::SlotTaken => "slot_taken",
            ReasonCode::NoSuchSession => "no_such_session",
            ReasonCode::Banned => "banned",
            ReasonCode::InvalidToken => "invalid_token",
            ReasonCode::VersionMismatch => "version_mismatch",
            ReasonCode::RateLimited => "rate_limited",
            ReasonCode::AlreadyJoined => "already_joined",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
