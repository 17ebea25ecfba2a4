//! One hosted match: lobby, turn loop, pause votes and reconnection.
//!
//! A [`Session`] owns everything about its match and is driven from a single
//! task. Connection tasks feed it [`SessionEvent`]s over an unbounded
//! channel; a timer drives [`Session::tick`] for liveness, grace expiry and
//! vote expiry. Because only that task touches the session, every accepted
//! action is applied atomically and broadcasts go out in sequence order.
//!
//! Every state change goes through `transition`, which bumps the sequence
//! number exactly once, settles whose turn it is (auto-passing slots whose
//! connection is in its grace period) and broadcasts either a diff or a full
//! snapshot.

use crate::config::SessionConfig;
use crate::registry::{ConnId, ConnectionRegistry, Occupant, Outbound, Released};
use crate::rejoin::RejoinManager;
use crate::replay::{ReplayHeader, ReplayRecorder, Transition, FORMAT_VERSION};
use crate::rules::{Action, NextTurn, RuleEngine};
use crate::validator::{validate, validate_meta, ActionRequest, Meta, Verdict};
use log::{debug, info, warn};
use serde_json::Value;
use shared::{
    ClientMessage, MatchResult, Phase, ReasonCode, Role, ServerMessage, SessionRng, Snapshot,
    StateUpdate, MAX_NAME_LEN, PROTOCOL_VERSION,
};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Input to a session's event loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A new connection routed here by its first message (HELLO or REJOIN).
    Attach {
        conn: ConnId,
        addr: SocketAddr,
        outbound: Outbound,
        first: ClientMessage,
    },
    Message {
        conn: ConnId,
        message: ClientMessage,
    },
    Closed {
        conn: ConnId,
        reason: CloseReason,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the stream.
    Eof,
    /// Undecodable or oversized frame.
    Protocol(String),
    /// Writing to the socket failed.
    WriteFailed(String),
    /// Nothing received within the liveness timeout.
    Timeout,
}

/// Summary published to the directory and the master heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub name: String,
    pub phase: Phase,
    pub players: u32,
    pub capacity: u32,
    pub spectators: u32,
    pub scenario: String,
    pub mode: String,
}

/// Slots voting to flip between Running and Paused.
#[derive(Debug, Default)]
struct PauseVotes {
    votes: BTreeSet<u8>,
    opened: Option<Instant>,
}

impl PauseVotes {
    fn cast(&mut self, slot: u8, now: Instant) {
        if self.votes.is_empty() {
            self.opened = Some(now);
        }
        self.votes.insert(slot);
    }

    fn retract(&mut self, slot: u8) -> bool {
        let removed = self.votes.remove(&slot);
        if self.votes.is_empty() {
            self.opened = None;
        }
        removed
    }

    fn clear(&mut self) {
        self.votes.clear();
        self.opened = None;
    }

    fn count(&self) -> u32 {
        self.votes.len() as u32
    }

    fn expired(&self, now: Instant, window: tokio::time::Duration) -> bool {
        self.opened
            .map_or(false, |opened| now.duration_since(opened) >= window)
    }
}

pub struct Session {
    config: SessionConfig,
    engine: Arc<dyn RuleEngine>,
    registry: ConnectionRegistry,
    rejoin: RejoinManager,
    snapshot: Snapshot,
    last_full_sequence: u64,
    votes: PauseVotes,
    recorder: Box<dyn ReplayRecorder>,
    status: watch::Sender<SessionStatus>,
    last_ping: Instant,
    result: Option<MatchResult>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn RuleEngine>,
        recorder: Box<dyn ReplayRecorder>,
        now: Instant,
    ) -> (Self, watch::Receiver<SessionStatus>) {
        let registry = ConnectionRegistry::new(
            config.capacity,
            config.max_spectators,
            config.actions_per_second,
        );
        let rejoin = RejoinManager::new(config.name.clone());
        let snapshot = Snapshot::new(config.seed);
        let (status, status_rx) = watch::channel(SessionStatus {
            name: config.name.clone(),
            phase: Phase::Lobby,
            players: 0,
            capacity: config.capacity as u32,
            spectators: 0,
            scenario: config.scenario.clone(),
            mode: config.mode.clone(),
        });

        let session = Self {
            config,
            engine,
            registry,
            rejoin,
            snapshot,
            last_full_sequence: 0,
            votes: PauseVotes::default(),
            recorder,
            status,
            last_ping: now,
            result: None,
        };
        (session, status_rx)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot.phase == Phase::Ended
    }

    /// Drives the session until it ends or is shut down.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionEvent>) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Session {} open ({} slots)", self.config.name, self.config.capacity);

        loop {
            tokio::select! {
                event = inbox.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle(event, Instant::now()) {
                                break;
                            }
                        }
                        None => break,
                    }
                },
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                },
            }

            if self.is_finished() {
                break;
            }
        }

        info!(
            "Session {} closed at sequence {}",
            self.config.name, self.snapshot.sequence
        );
    }

    /// Processes one event. Returns false when the session should stop.
    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> bool {
        match event {
            SessionEvent::Attach {
                conn,
                addr,
                outbound,
                first,
            } => {
                self.registry.attach(conn, addr, outbound, now);
                self.on_message(conn, first, now);
            }
            SessionEvent::Message { conn, message } => self.on_message(conn, message, now),
            SessionEvent::Closed { conn, reason } => self.on_closed(conn, reason, now),
            SessionEvent::Shutdown => {
                info!("Session {} shutting down", self.config.name);
                self.registry.broadcast(&ServerMessage::Kicked {
                    reason: "server shutting down".into(),
                });
                return false;
            }
        }
        true
    }

    /// Timer-driven housekeeping: liveness, pings, grace and vote expiry.
    pub fn tick(&mut self, now: Instant) {
        for conn in self.registry.timed_out(now, self.config.liveness_timeout) {
            self.on_closed(conn, CloseReason::Timeout, now);
        }

        if now.duration_since(self.last_ping) >= self.config.ping_interval {
            self.last_ping = now;
            self.registry.broadcast(&ServerMessage::Ping {
                timestamp: shared::timestamp_ms(),
            });
        }

        for slot in self.rejoin.take_expired(now) {
            info!(
                "Session {}: grace expired for slot {}",
                self.config.name, slot
            );
            self.vacate_participant(slot, now);
        }

        if self.votes.expired(now, self.config.pause_vote_window) {
            debug!("Session {}: pause vote expired", self.config.name);
            self.votes.clear();
            self.broadcast_tally();
        }
    }

    fn on_message(&mut self, conn: ConnId, message: ClientMessage, now: Instant) {
        self.registry.touch(conn, now);
        match message {
            ClientMessage::Hello {
                name,
                desired_role,
                desired_slot,
                session: _,
                client_version,
            } => self.on_hello(conn, &name, desired_role, desired_slot, client_version, now),
            ClientMessage::Rejoin { rejoin_token } => self.on_rejoin(conn, &rejoin_token, now),
            ClientMessage::Action {
                slot,
                sequence,
                action_type,
                action_payload,
            } => self.on_action(
                conn,
                ActionRequest {
                    claimed_slot: slot,
                    sequence,
                    action: Action::new(action_type, action_payload),
                },
                now,
            ),
            ClientMessage::Ready { ready } => self.on_ready(conn, ready, now),
            ClientMessage::PauseVote { vote } => self.on_pause_vote(conn, vote, now),
            ClientMessage::Chat { text } => self.on_chat(conn, text, now),
            ClientMessage::Resync => {
                let snapshot = self.snapshot.clone();
                self.registry.send_to(
                    conn,
                    ServerMessage::State {
                        sequence: snapshot.sequence,
                        update: StateUpdate::Full { snapshot },
                        effects: Vec::new(),
                    },
                );
            }
            ClientMessage::Ping { timestamp } => {
                self.registry
                    .send_to(conn, ServerMessage::Pong { timestamp });
            }
            ClientMessage::Pong { .. } => {}
            ClientMessage::Leave => self.on_leave(conn, now),
        }
    }

    fn reject(&self, conn: ConnId, code: ReasonCode) {
        self.registry.send_to(conn, ServerMessage::reject(code));
    }

    /// Sends a REJECT and closes a connection that never got a slot.
    fn refuse(&mut self, conn: ConnId, code: ReasonCode) {
        self.reject(conn, code);
        self.registry.detach(conn);
    }

    fn on_hello(
        &mut self,
        conn: ConnId,
        name: &str,
        role: Role,
        desired_slot: Option<u8>,
        client_version: u32,
        now: Instant,
    ) {
        if self.registry.actor(conn).is_some() {
            return self.reject(conn, ReasonCode::AlreadyJoined);
        }
        if client_version != PROTOCOL_VERSION {
            return self.refuse(conn, ReasonCode::VersionMismatch);
        }
        match self.snapshot.phase {
            Phase::Ended => return self.refuse(conn, ReasonCode::MatchEnded),
            phase if phase.is_live() && role == Role::Participant => {
                return self.refuse(conn, ReasonCode::MatchInProgress)
            }
            _ => {}
        }
        let Some(name) = clean_name(name) else {
            return self.refuse(conn, ReasonCode::Malformed);
        };

        let slot = match self.registry.join(conn, &name, role, desired_slot) {
            Ok(slot) => slot,
            Err(code) => {
                info!(
                    "Session {}: join refused for {}: {}",
                    self.config.name, name, code
                );
                return self.refuse(conn, code);
            }
        };

        let token = self.rejoin.issue(slot, now);
        self.welcome(conn, slot, role, token);
        self.broadcast_slots();
        self.publish_status();
    }

    fn on_rejoin(&mut self, conn: ConnId, token: &str, now: Instant) {
        if self.registry.actor(conn).is_some() {
            return self.reject(conn, ReasonCode::AlreadyJoined);
        }
        if self.snapshot.phase == Phase::Ended {
            return self.refuse(conn, ReasonCode::MatchEnded);
        }
        let slot = match self.rejoin.redeem(token) {
            Ok(slot) => {
                if let Some(age) = self.rejoin.token_age(token, now) {
                    debug!(
                        "Session {}: redeeming token for slot {} issued {:?} ago",
                        self.config.name, slot, age
                    );
                }
                slot
            }
            Err(code) => {
                let addr = self.registry.connection(conn).map(|c| c.addr);
                warn!(
                    "Session {}: invalid rejoin token from {:?}",
                    self.config.name, addr
                );
                return self.refuse(conn, code);
            }
        };

        if let Some(previous) = self.registry.rebind(slot, conn) {
            info!(
                "Session {}: connection {} replaced by {} on slot {}",
                self.config.name, previous, conn, slot
            );
            self.registry.send_to(
                previous,
                ServerMessage::Kicked {
                    reason: "rejoined from another connection".into(),
                },
            );
            self.registry.detach(previous);
        }
        self.rejoin.cancel_grace(slot);
        let token = self.rejoin.issue(slot, now);
        let role = self
            .registry
            .slot(slot)
            .map_or(Role::Participant, |s| s.role);
        info!("Session {}: slot {} rejoined", self.config.name, slot);

        self.welcome(conn, slot, role, token);
        self.broadcast_slots();
        if self.snapshot.phase == Phase::Running && self.snapshot.active_slot.is_none() {
            self.transition(self.snapshot.clone(), Vec::new(), None);
        }
        self.evaluate_votes();
        self.publish_status();
    }

    fn welcome(&self, conn: ConnId, slot: u8, role: Role, rejoin_token: String) {
        self.registry.send_to(
            conn,
            ServerMessage::Welcome {
                session: self.config.name.clone(),
                slot,
                role,
                rejoin_token,
                snapshot: self.snapshot.clone(),
                slots: self.registry.slot_infos(),
            },
        );
    }

    fn on_action(&mut self, conn: ConnId, request: ActionRequest, now: Instant) {
        let Some(actor) = self.registry.actor(conn) else {
            return self.reject(conn, ReasonCode::Malformed);
        };
        if !self.registry.allow_action(conn, now) {
            return self.reject(conn, ReasonCode::RateLimited);
        }

        match validate(self.engine.as_ref(), &self.snapshot, actor, &request) {
            Verdict::Rejected(code) => self.reject(conn, code),
            Verdict::Accepted(accepted) => {
                let mut next = self.snapshot.clone();
                next.game = accepted.game;
                next.rng = accepted.rng;
                match accepted.next {
                    NextTurn::Stay => {}
                    NextTurn::Advance => self.hand_turn(&mut next, actor.slot, None),
                    NextTurn::Slot(slot) => self.hand_turn(&mut next, actor.slot, Some(slot)),
                }

                let terminal = accepted.terminal.is_some();
                let effects = accepted.effects;
                self.transition(next, effects.clone(), accepted.terminal);

                self.recorder.record(Transition {
                    sequence: self.snapshot.sequence,
                    slot: actor.slot,
                    action_type: request.action.action_type,
                    payload: payload_text(&request.action.payload),
                    effects,
                    round: self.snapshot.round,
                    turn: self.snapshot.turn,
                    rng_draws: self.snapshot.rng.draws,
                    terminal,
                });
            }
        }
    }

    fn on_ready(&mut self, conn: ConnId, ready: bool, _now: Instant) {
        let Some(actor) = self.registry.actor(conn) else {
            return self.reject(conn, ReasonCode::Malformed);
        };
        if actor.role != Role::Participant {
            return self.reject(conn, ReasonCode::NotParticipant);
        }
        if self.snapshot.phase != Phase::Lobby {
            return self.reject(conn, ReasonCode::MatchInProgress);
        }

        self.registry.set_ready(actor.slot, ready);
        self.broadcast_slots();
        if self.registry.all_ready(self.config.min_players) {
            self.start_match();
        }
    }

    fn start_match(&mut self) {
        let participants = self.registry.occupied_participants();
        info!(
            "Session {}: starting with participants {:?}",
            self.config.name, participants
        );

        let mut rng = SessionRng::restore(self.snapshot.rng);
        let mut next = self.snapshot.clone();
        next.game = self.engine.setup(&participants, &mut rng);
        next.rng = rng.state();
        next.phase = Phase::Running;
        next.round = 1;
        next.turn = 0;
        next.active_slot = None;

        self.recorder.start(ReplayHeader {
            format_version: FORMAT_VERSION,
            build: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
            session: self.config.name.clone(),
            seed: self.config.seed,
            scenario: self.config.scenario.clone(),
            mode: self.config.mode.clone(),
            participants,
        });
        self.transition(next, vec!["match started".into()], None);
        self.publish_status();
    }

    fn on_pause_vote(&mut self, conn: ConnId, vote: bool, now: Instant) {
        let Some(actor) = self.registry.actor(conn) else {
            return self.reject(conn, ReasonCode::Malformed);
        };
        if let Err(code) = validate_meta(self.snapshot.phase, actor, Meta::PauseVote) {
            return self.reject(conn, code);
        }

        // While running a `true` vote asks to pause; while paused a `false`
        // vote asks to resume.
        let in_favour = vote == (self.snapshot.phase == Phase::Running);
        if in_favour {
            self.votes.cast(actor.slot, now);
        } else {
            self.votes.retract(actor.slot);
        }
        self.evaluate_votes();
    }

    /// Votes needed to flip the current live phase, and the tally so far.
    fn vote_threshold(&self) -> u32 {
        let connected = self.registry.connected_participants().len() as u32;
        if self.snapshot.phase == Phase::Paused && self.config.solo_unpause && connected == 1 {
            return 1;
        }
        connected / 2 + 1
    }

    fn evaluate_votes(&mut self) {
        if !self.snapshot.phase.is_live() {
            return;
        }
        let needed = self.vote_threshold();
        let votes = self.votes.count();
        if votes == 0 || votes < needed {
            self.broadcast_tally();
            return;
        }

        let mut next = self.snapshot.clone();
        next.phase = match self.snapshot.phase {
            Phase::Running => Phase::Paused,
            _ => Phase::Running,
        };
        info!(
            "Session {}: {} of {} votes, now {:?}",
            self.config.name, votes, needed, next.phase
        );
        self.votes.clear();
        self.registry.broadcast(&ServerMessage::PauseTally {
            votes,
            needed,
            paused: next.phase == Phase::Paused,
        });
        self.transition(next, Vec::new(), None);
        self.publish_status();
    }

    fn broadcast_tally(&self) {
        if !self.snapshot.phase.is_live() {
            return;
        }
        self.registry.broadcast(&ServerMessage::PauseTally {
            votes: self.votes.count(),
            needed: self.vote_threshold(),
            paused: self.snapshot.phase == Phase::Paused,
        });
    }

    fn on_chat(&mut self, conn: ConnId, text: String, now: Instant) {
        let Some(actor) = self.registry.actor(conn) else {
            return self.reject(conn, ReasonCode::Malformed);
        };
        if !self.registry.allow_action(conn, now) {
            return self.reject(conn, ReasonCode::RateLimited);
        }
        if let Err(code) = validate_meta(self.snapshot.phase, actor, Meta::Chat(&text)) {
            return self.reject(conn, code);
        }
        let name = self
            .registry
            .slot(actor.slot)
            .map(|slot| slot.name.clone())
            .unwrap_or_default();
        self.registry.broadcast(&ServerMessage::Chat {
            slot: actor.slot,
            name,
            text: text.trim().to_string(),
        });
    }

    fn on_leave(&mut self, conn: ConnId, now: Instant) {
        match self.registry.actor(conn) {
            Some(actor) if actor.role == Role::Participant => {
                info!("Session {}: slot {} left", self.config.name, actor.slot);
                self.vacate_participant(actor.slot, now);
            }
            Some(actor) => {
                self.registry.vacate(actor.slot);
                self.rejoin.revoke_slot(actor.slot);
                self.broadcast_slots();
                self.publish_status();
            }
            None => {}
        }
        self.registry.detach(conn);
    }

    fn on_closed(&mut self, conn: ConnId, reason: CloseReason, now: Instant) {
        match &reason {
            CloseReason::Eof => debug!("Connection {} closed by peer", conn),
            CloseReason::Protocol(detail) => warn!("Connection {} dropped: {}", conn, detail),
            CloseReason::WriteFailed(detail) => info!("Write to connection {} failed: {}", conn, detail),
            CloseReason::Timeout => info!("Connection {} timed out", conn),
        }

        match self.registry.release(conn) {
            Released::Unbound => return,
            Released::Vacated(slot) => {
                self.rejoin.revoke_slot(slot);
                self.broadcast_slots();
            }
            Released::Reserved(slot) => {
                if self.snapshot.phase == Phase::Ended {
                    return;
                }
                self.rejoin
                    .start_grace(slot, now, self.config.grace_period);
                self.votes.retract(slot);
                self.broadcast_slots();
                if self.snapshot.phase == Phase::Running && self.snapshot.active_slot == Some(slot)
                {
                    self.transition(self.snapshot.clone(), Vec::new(), None);
                }
                self.evaluate_votes();
            }
        }
        self.publish_status();
    }

    /// Permanently frees a participant slot (grace expiry or LEAVE).
    fn vacate_participant(&mut self, slot: u8, _now: Instant) {
        self.registry.vacate(slot);
        self.rejoin.revoke_slot(slot);
        self.votes.retract(slot);
        self.broadcast_slots();

        if self.snapshot.phase.is_live() {
            let mut next = self.snapshot.clone();
            next.game = self.engine.remove_participant(&next.game, slot);
            let ended = (!self.config.continue_after_vacate).then(|| MatchResult {
                winners: self.registry.occupied_participants(),
                reason: "participant_left".into(),
            });
            self.transition(next, vec![format!("slot {slot} left the match")], ended);
            self.evaluate_votes();
        }
        self.publish_status();
    }

    /// Commits `next` as the new authoritative snapshot and broadcasts it.
    fn transition(&mut self, mut next: Snapshot, mut effects: Vec<String>, ended: Option<MatchResult>) {
        let previous_phase = self.snapshot.phase;
        next.sequence = self.snapshot.sequence + 1;

        let mut result = ended;
        if result.is_none() && next.phase.is_live() && self.registry.occupied_participants().is_empty()
        {
            result = Some(MatchResult {
                winners: Vec::new(),
                reason: "abandoned".into(),
            });
        }
        if result.is_none() && next.phase == Phase::Running {
            result = self.settle_turn(&mut next, &mut effects);
        }
        if result.is_some() {
            next.phase = Phase::Ended;
            next.active_slot = None;
        }

        self.publish(next, effects);

        if let Some(result) = result {
            self.finish(result);
        } else if self.snapshot.phase != previous_phase {
            self.registry.broadcast(&ServerMessage::Phase {
                phase: self.snapshot.phase,
                result: None,
            });
        }
    }

    /// Makes sure the active slot is held by a connected participant,
    /// auto-passing reserved slots. Returns a result if a pass ended the
    /// match.
    fn settle_turn(&self, next: &mut Snapshot, effects: &mut Vec<String>) -> Option<MatchResult> {
        for _ in 0..=self.registry.capacity() {
            match next.active_slot {
                Some(slot) if self.registry.is_connected(slot) => return None,
                Some(slot) if self.is_reserved(slot) => {
                    let mut rng = SessionRng::restore(next.rng);
                    let outcome = self.engine.pass(&next.game, slot, &mut rng);
                    next.rng = rng.state();
                    next.game = outcome.state;
                    effects.extend(outcome.effects);
                    if outcome.terminal.is_some() {
                        return outcome.terminal;
                    }
                    let forced = match outcome.next {
                        NextTurn::Slot(target) => Some(target),
                        NextTurn::Stay | NextTurn::Advance => None,
                    };
                    self.hand_turn(next, slot, forced);
                }
                Some(slot) => self.hand_turn(next, slot, None),
                None => match self.registry.connected_participants().first() {
                    Some(&slot) => self.give_turn(next, slot, false),
                    None => return None,
                },
            }
        }
        None
    }

    fn is_reserved(&self, slot: u8) -> bool {
        self.registry
            .slot(slot)
            .map_or(false, |s| s.occupant == Occupant::Reserved)
    }

    /// Moves the turn on from `from`. A slot named by the engine wins if it
    /// is an occupied participant slot; otherwise the next connected slot by
    /// index takes it.
    fn hand_turn(&self, next: &mut Snapshot, from: u8, forced: Option<u8>) {
        let capacity = self.registry.capacity();
        let forced = forced.filter(|&slot| {
            slot < capacity && self.registry.slot(slot).map_or(false, |s| !s.is_vacant())
        });
        let target = forced.or_else(|| {
            (1..=capacity as u16)
                .map(|offset| ((from as u16 + offset) % capacity as u16) as u8)
                .find(|&slot| self.registry.is_connected(slot))
        });
        match target {
            Some(slot) => self.give_turn(next, slot, slot <= from),
            None => next.active_slot = None,
        }
    }

    fn give_turn(&self, next: &mut Snapshot, slot: u8, wrapped: bool) {
        next.active_slot = Some(slot);
        next.turn += 1;
        if wrapped {
            next.round += 1;
        }
        let mut rng = SessionRng::restore(next.rng);
        next.game = self.engine.start_turn(&next.game, slot, &mut rng);
        next.rng = rng.state();
    }

    fn publish(&mut self, next: Snapshot, effects: Vec<String>) {
        let diff = self.snapshot.diff_to(&next);
        let full_due = next.sequence.saturating_sub(self.last_full_sequence)
            >= self.config.full_snapshot_interval;
        let update = if full_due || diff.encoded_len() >= next.encoded_len() {
            self.last_full_sequence = next.sequence;
            StateUpdate::Full {
                snapshot: next.clone(),
            }
        } else {
            StateUpdate::Diff { diff }
        };

        debug!(
            "Session {}: sequence {} ({})",
            self.config.name,
            next.sequence,
            if update.is_full() { "full" } else { "diff" }
        );
        let message = ServerMessage::State {
            sequence: next.sequence,
            update,
            effects,
        };
        self.snapshot = next;
        let dead = self.registry.broadcast(&message);
        if !dead.is_empty() {
            debug!("Broadcast skipped closed connections {:?}", dead);
        }
    }

    fn finish(&mut self, result: MatchResult) {
        info!(
            "Session {} ended: {} (winners {:?})",
            self.config.name, result.reason, result.winners
        );
        self.registry.broadcast(&ServerMessage::Phase {
            phase: Phase::Ended,
            result: Some(result.clone()),
        });
        self.rejoin.revoke_all();
        self.votes.clear();
        self.result = Some(result);
        self.publish_status();
    }

    fn broadcast_slots(&self) {
        self.registry.broadcast(&ServerMessage::Slots {
            slots: self.registry.slot_infos(),
        });
    }

    fn publish_status(&self) {
        self.status.send_replace(SessionStatus {
            name: self.config.name.clone(),
            phase: self.snapshot.phase,
            players: self.registry.occupied_participants().len() as u32,
            capacity: self.config.capacity as u32,
            spectators: self.registry.spectator_count() as u32,
            scenario: self.config.scenario.clone(),
            mode: self.config.mode.clone(),
        });
    }
}

fn clean_name(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    (!name.is_empty()).then_some(name)
}

fn payload_text(payload: &Value) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "null".into())
}
