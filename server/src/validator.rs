//! Action validation.
//!
//! `validate` is pure with respect to the snapshot it is given: it clones
//! the RNG out of the snapshot, runs the checks in a fixed order and returns
//! either the candidate next state or a reason code. Nothing is mutated, so a
//! rejected action leaves no trace.
//!
//! Check order:
//! 1. phase and turn ownership (always-legal meta messages are checked by
//!    [`validate_meta`] instead)
//! 2. freshness of the client's sequence number
//! 3. shape: legal type, in-range targets, sufficient resources
//! 4. the rule engine itself

use crate::rules::{Action, NextTurn, RuleEngine};
use log::debug;
use shared::{
    Document, MatchResult, Phase, ReasonCode, RngState, Role, SessionRng, Snapshot, MAX_CHAT_LEN,
};

pub const MAX_ACTION_TYPE_LEN: usize = 32;

/// The slot an inbound message was resolved to by the connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub slot: u8,
    pub role: Role,
}

/// An ACTION message after the connection has been resolved to an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub claimed_slot: u8,
    pub sequence: u64,
    pub action: Action,
}

/// Candidate transition produced by an accepted action.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub game: Document,
    pub rng: RngState,
    pub next: NextTurn,
    pub terminal: Option<MatchResult>,
    pub effects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(Accepted),
    Rejected(ReasonCode),
}

impl Verdict {
    pub fn into_result(self) -> Result<Accepted, ReasonCode> {
        match self {
            Verdict::Accepted(accepted) => Ok(accepted),
            Verdict::Rejected(code) => Err(code),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Messages that are legal regardless of whose turn it is.
#[derive(Debug, Clone, Copy)]
pub enum Meta<'a> {
    PauseVote,
    Chat(&'a str),
}

pub fn validate<E: RuleEngine + ?Sized>(
    engine: &E,
    snapshot: &Snapshot,
    actor: Actor,
    request: &ActionRequest,
) -> Verdict {
    match check(engine, snapshot, actor, request) {
        Ok(accepted) => Verdict::Accepted(accepted),
        Err(code) => {
            debug!(
                "Rejected {} from slot {}: {}",
                request.action.action_type, actor.slot, code
            );
            Verdict::Rejected(code)
        }
    }
}

fn check<E: RuleEngine + ?Sized>(
    engine: &E,
    snapshot: &Snapshot,
    actor: Actor,
    request: &ActionRequest,
) -> Result<Accepted, ReasonCode> {
    // 1. phase and turn
    match snapshot.phase {
        Phase::Lobby => return Err(ReasonCode::NotRunning),
        Phase::Paused => return Err(ReasonCode::Paused),
        Phase::Ended => return Err(ReasonCode::MatchEnded),
        Phase::Running => {}
    }
    if actor.role != Role::Participant {
        return Err(ReasonCode::NotParticipant);
    }
    if request.claimed_slot != actor.slot {
        return Err(ReasonCode::Malformed);
    }
    if snapshot.active_slot != Some(actor.slot) {
        return Err(ReasonCode::NotYourTurn);
    }

    // 2. freshness
    if request.sequence != snapshot.sequence {
        return Err(ReasonCode::Stale);
    }

    // 3. shape
    let action_type = &request.action.action_type;
    if action_type.is_empty() || action_type.len() > MAX_ACTION_TYPE_LEN {
        return Err(ReasonCode::Malformed);
    }
    engine.check_shape(&snapshot.game, actor.slot, &request.action)?;

    // 4. rules
    let mut rng = SessionRng::restore(snapshot.rng);
    let outcome = engine.apply(&snapshot.game, actor.slot, &request.action, &mut rng)?;

    Ok(Accepted {
        game: outcome.state,
        rng: rng.state(),
        next: outcome.next,
        terminal: outcome.terminal,
        effects: outcome.effects,
    })
}

/// Validates a pause vote or chat line. These skip turn gating but still
/// respect the match phase and the sender's role.
pub fn validate_meta(phase: Phase, actor: Actor, meta: Meta<'_>) -> Result<(), ReasonCode> {
    match meta {
        Meta::PauseVote => {
            if actor.role != Role::Participant {
                return Err(ReasonCode::NotParticipant);
            }
            if !phase.is_live() {
                return Err(ReasonCode::NotRunning);
            }
            Ok(())
        }
        Meta::Chat(text) => {
            if text.trim().is_empty() || text.chars().count() > MAX_CHAT_LEN {
                return Err(ReasonCode::Malformed);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skirmish::{piece, Skirmish};
    use serde_json::{json, Value};

    fn running_snapshot(rules: &Skirmish) -> Snapshot {
        let mut snapshot = Snapshot::new(21);
        let mut rng = SessionRng::restore(snapshot.rng);
        let game = rules.setup(&[0, 1], &mut rng);
        snapshot.game = rules.start_turn(&game, 0, &mut rng);
        snapshot.rng = rng.state();
        snapshot.phase = Phase::Running;
        snapshot.active_slot = Some(0);
        snapshot.sequence = 5;
        snapshot
    }

    fn participant(slot: u8) -> Actor {
        Actor {
            slot,
            role: Role::Participant,
        }
    }

    fn request(slot: u8, sequence: u64, action_type: &str, payload: Value) -> ActionRequest {
        ActionRequest {
            claimed_slot: slot,
            sequence,
            action: Action::new(action_type, payload),
        }
    }

    #[test]
    fn test_accepts_end_turn_from_active_slot() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);
        let verdict = validate(
            &rules,
            &snapshot,
            participant(0),
            &request(0, 5, "end_turn", Value::Null),
        );
        let accepted = verdict.into_result().unwrap();
        assert_eq!(accepted.next, NextTurn::Advance);
        assert_eq!(accepted.effects.len(), 1);
    }

    #[test]
    fn test_rejects_out_of_turn() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);
        let verdict = validate(
            &rules,
            &snapshot,
            participant(1),
            &request(1, 5, "end_turn", Value::Null),
        );
        assert_eq!(verdict, Verdict::Rejected(ReasonCode::NotYourTurn));
    }

    #[test]
    fn test_rejects_stale_sequence() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);
        let verdict = validate(
            &rules,
            &snapshot,
            participant(0),
            &request(0, 4, "end_turn", Value::Null),
        );
        assert_eq!(verdict, Verdict::Rejected(ReasonCode::Stale));
    }

    #[test]
    fn test_rejects_spoofed_slot() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);
        let verdict = validate(
            &rules,
            &snapshot,
            participant(0),
            &request(1, 5, "end_turn", Value::Null),
        );
        assert_eq!(verdict, Verdict::Rejected(ReasonCode::Malformed));
    }

    #[test]
    fn test_rejects_spectator() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);
        let spectator = Actor {
            slot: 0,
            role: Role::Spectator,
        };
        let verdict = validate(
            &rules,
            &snapshot,
            spectator,
            &request(0, 5, "end_turn", Value::Null),
        );
        assert_eq!(verdict, Verdict::Rejected(ReasonCode::NotParticipant));
    }

    #[test]
    fn test_phase_gating() {
        let rules = Skirmish::default();
        let mut snapshot = running_snapshot(&rules);
        let req = request(0, 5, "end_turn", Value::Null);

        snapshot.phase = Phase::Lobby;
        assert_eq!(
            validate(&rules, &snapshot, participant(0), &req),
            Verdict::Rejected(ReasonCode::NotRunning)
        );
        snapshot.phase = Phase::Paused;
        assert_eq!(
            validate(&rules, &snapshot, participant(0), &req),
            Verdict::Rejected(ReasonCode::Paused)
        );
        snapshot.phase = Phase::Ended;
        assert_eq!(
            validate(&rules, &snapshot, participant(0), &req),
            Verdict::Rejected(ReasonCode::MatchEnded)
        );
    }

    #[test]
    fn test_shape_errors_surface_as_reason_codes() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);

        let far = request(0, 5, "move", json!({ "x": 100, "y": 0 }));
        assert_eq!(
            validate(&rules, &snapshot, participant(0), &far),
            Verdict::Rejected(ReasonCode::OutOfRange)
        );

        let empty = request(0, 5, "", Value::Null);
        assert_eq!(
            validate(&rules, &snapshot, participant(0), &empty),
            Verdict::Rejected(ReasonCode::Malformed)
        );
    }

    #[test]
    fn test_validation_does_not_touch_snapshot() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);
        let before = snapshot.clone();

        let accepted = validate(
            &rules,
            &snapshot,
            participant(0),
            &request(0, 5, "search", Value::Null),
        )
        .into_result()
        .unwrap();

        assert_eq!(snapshot, before);
        assert!(accepted.rng.draws > snapshot.rng.draws);
        assert!(piece(&accepted.game, 0).unwrap().score > 0);
    }

    #[test]
    fn test_same_snapshot_same_outcome() {
        let rules = Skirmish::default();
        let snapshot = running_snapshot(&rules);
        let req = request(0, 5, "search", Value::Null);
        let a = validate(&rules, &snapshot, participant(0), &req);
        let b = validate(&rules, &snapshot, participant(0), &req);
        assert_eq!(a, b);
    }

    #[test]
    fn test_meta_messages() {
        let spectator = Actor {
            slot: 4,
            role: Role::Spectator,
        };
        assert!(validate_meta(Phase::Running, participant(1), Meta::PauseVote).is_ok());
        assert_eq!(
            validate_meta(Phase::Lobby, participant(1), Meta::PauseVote),
            Err(ReasonCode::NotRunning)
        );
        assert_eq!(
            validate_meta(Phase::Running, spectator, Meta::PauseVote),
            Err(ReasonCode::NotParticipant)
        );
        assert!(validate_meta(Phase::Lobby, spectator, Meta::Chat("hi")).is_ok());
        assert_eq!(
            validate_meta(Phase::Lobby, spectator, Meta::Chat("   ")),
            Err(ReasonCode::Malformed)
        );
    }
}
