//! Client-side copy of a session's state.
//!
//! The mirror folds server messages into the last known snapshot. A diff
//! whose base does not match the held sequence means updates were missed;
//! the mirror then drops further diffs and asks for a RESYNC until a full
//! snapshot arrives.

use log::{debug, info, warn};
use shared::{
    ClientMessage, MatchResult, Phase, ReasonCode, Role, ServerMessage, SlotInfo, Snapshot,
    StateUpdate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseTally {
    pub votes: u32,
    pub needed: u32,
    pub paused: bool,
}

#[derive(Debug, Default)]
pub struct StateMirror {
    pub session: Option<String>,
    pub slot: Option<u8>,
    pub role: Option<Role>,
    pub rejoin_token: Option<String>,
    pub snapshot: Option<Snapshot>,
    pub slots: Vec<SlotInfo>,
    pub result: Option<MatchResult>,
    pub tally: Option<PauseTally>,
    pub last_reject: Option<ReasonCode>,
    /// Effects of accepted actions, oldest first.
    pub effects: Vec<String>,
    awaiting_resync: bool,
    gaps: u64,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one server message into the mirror. Returns a message the
    /// client must send in response (PONG or RESYNC), if any.
    pub fn observe(&mut self, message: &ServerMessage) -> Option<ClientMessage> {
        match message {
            ServerMessage::Welcome {
                session,
                slot,
                role,
                rejoin_token,
                snapshot,
                slots,
            } => {
                info!("Seated in {} at slot {} as {:?}", session, slot, role);
                self.session = Some(session.clone());
                self.slot = Some(*slot);
                self.role = Some(*role);
                self.rejoin_token = Some(rejoin_token.clone());
                self.snapshot = Some(snapshot.clone());
                self.slots = slots.clone();
                self.awaiting_resync = false;
                None
            }
            ServerMessage::State {
                update, effects, ..
            } => self.apply_update(update, effects),
            ServerMessage::Reject { reason_code, detail } => {
                debug!("Rejected: {} {:?}", reason_code, detail);
                self.last_reject = Some(*reason_code);
                None
            }
            ServerMessage::Slots { slots } => {
                self.slots = slots.clone();
                None
            }
            ServerMessage::Phase { phase, result } => {
                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.phase = *phase;
                }
                if result.is_some() {
                    self.result = result.clone();
                }
                None
            }
            ServerMessage::PauseTally {
                votes,
                needed,
                paused,
            } => {
                self.tally = Some(PauseTally {
                    votes: *votes,
                    needed: *needed,
                    paused: *paused,
                });
                None
            }
            ServerMessage::Chat { name, text, .. } => {
                info!("<{}> {}", name, text);
                None
            }
            ServerMessage::Kicked { reason } => {
                warn!("Kicked: {}", reason);
                self.slot = None;
                None
            }
            ServerMessage::Ping { timestamp } => Some(ClientMessage::Pong {
                timestamp: *timestamp,
            }),
            ServerMessage::Pong { .. } => None,
        }
    }

    fn apply_update(&mut self, update: &StateUpdate, effects: &[String]) -> Option<ClientMessage> {
        let held_sequence = self.sequence();
        if update.sequence() <= held_sequence && self.snapshot.is_some() {
            debug!("Ignoring old update {}", update.sequence());
            return None;
        }
        if self.awaiting_resync && !update.is_full() {
            return None;
        }

        match update.apply(self.snapshot.as_ref()) {
            Ok(next) => {
                self.snapshot = Some(next);
                self.awaiting_resync = false;
                self.effects.extend(effects.iter().cloned());
                None
            }
            Err(e) => {
                warn!("State gap ({}), requesting resync", e);
                self.gaps += 1;
                self.awaiting_resync = true;
                Some(ClientMessage::Resync)
            }
        }
    }

    /// Sequence number of the held snapshot, 0 before WELCOME.
    pub fn sequence(&self) -> u64 {
        self.snapshot.as_ref().map_or(0, |s| s.sequence)
    }

    pub fn phase(&self) -> Option<Phase> {
        self.snapshot.as_ref().map(|s| s.phase)
    }

    pub fn is_my_turn(&self) -> bool {
        match (&self.snapshot, self.slot) {
            (Some(snapshot), Some(slot)) => {
                snapshot.phase == Phase::Running && snapshot.active_slot == Some(slot)
            }
            _ => false,
        }
    }

    pub fn awaiting_resync(&self) -> bool {
        self.awaiting_resync
    }

    /// Number of sequence gaps detected so far.
    pub fn gaps(&self) -> u64 {
        self.gaps
    }
}
