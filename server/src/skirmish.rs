//! Small grid skirmish used as the server's built-in rule engine.
//!
//! Each participant has a piece on a `width x height` board with an energy
//! pool refilled at the start of its turn. `move` steps to an adjacent free
//! tile for 1 energy, `search` spends 2 energy and rolls a die (from the
//! session RNG) for score, `end_turn` passes. The first piece to reach the
//! target score wins.

use crate::rules::{Action, RuleEngine, RuleOutcome};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{Document, MatchResult, ReasonCode, SessionRng};

pub const ENERGY_PER_TURN: u32 = 3;
pub const MOVE_COST: u32 = 1;
pub const SEARCH_COST: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub x: i64,
    pub y: i64,
    pub energy: u32,
    pub score: u32,
}

#[derive(Debug, Clone)]
pub struct Skirmish {
    pub width: i64,
    pub height: i64,
    pub target_score: u32,
}

impl Default for Skirmish {
    fn default() -> Self {
        Self {
            width: 8,
            height: 8,
            target_score: 12,
        }
    }
}

pub fn piece_key(slot: u8) -> String {
    format!("p{slot}")
}

pub fn piece(state: &Document, slot: u8) -> Option<Piece> {
    state
        .get(&piece_key(slot))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn put_piece(state: &mut Document, slot: u8, piece: Piece) {
    state.insert(piece_key(slot), json!(piece));
}

fn target(payload: &Value) -> Result<(i64, i64), ReasonCode> {
    let x = payload.get("x").and_then(Value::as_i64);
    let y = payload.get("y").and_then(Value::as_i64);
    match (x, y) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(ReasonCode::Malformed),
    }
}

impl Skirmish {
    fn in_bounds(&self, x: i64, y: i64) -> bool {
        (0..self.width).contains(&x) && (0..self.height).contains(&y)
    }

    fn occupied(state: &Document, x: i64, y: i64, except: u8) -> bool {
        state.iter().any(|(key, value)| {
            key.starts_with('p')
                && *key != piece_key(except)
                && value.get("x").and_then(Value::as_i64) == Some(x)
                && value.get("y").and_then(Value::as_i64) == Some(y)
        })
    }
}

impl RuleEngine for Skirmish {
    fn name(&self) -> &str {
        "skirmish"
    }

    fn setup(&self, participants: &[u8], rng: &mut SessionRng) -> Document {
        let mut state = Document::new();
        state.insert(
            "board".into(),
            json!({ "width": self.width, "height": self.height }),
        );
        state.insert("target".into(), json!(self.target_score));

        for &slot in participants {
            let (x, y) = loop {
                let x = rng.gen_range(0..self.width);
                let y = rng.gen_range(0..self.height);
                if !Self::occupied(&state, x, y, slot) {
                    break (x, y);
                }
            };
            put_piece(
                &mut state,
                slot,
                Piece {
                    x,
                    y,
                    energy: 0,
                    score: 0,
                },
            );
        }
        state
    }

    fn check_shape(&self, state: &Document, slot: u8, action: &Action) -> Result<(), ReasonCode> {
        let current = piece(state, slot).ok_or(ReasonCode::NotParticipant)?;
        match action.action_type.as_str() {
            "move" => {
                let (x, y) = target(&action.payload)?;
                if !self.in_bounds(x, y) {
                    return Err(ReasonCode::OutOfRange);
                }
                if current.energy < MOVE_COST {
                    return Err(ReasonCode::InsufficientResources);
                }
                Ok(())
            }
            "search" => {
                if current.energy < SEARCH_COST {
                    return Err(ReasonCode::InsufficientResources);
                }
                Ok(())
            }
            "end_turn" => Ok(()),
            _ => Err(ReasonCode::UnknownAction),
        }
    }

    fn apply(
        &self,
        state: &Document,
        slot: u8,
        action: &Action,
        rng: &mut SessionRng,
    ) -> Result<RuleOutcome, ReasonCode> {
        let mut current = piece(state, slot).ok_or(ReasonCode::NotParticipant)?;
        let mut next = state.clone();

        match action.action_type.as_str() {
            "move" => {
                let (x, y) = target(&action.payload)?;
                let step = (x - current.x).abs().max((y - current.y).abs());
                if step != 1 || Self::occupied(state, x, y, slot) {
                    return Err(ReasonCode::RuleViolation);
                }
                current.x = x;
                current.y = y;
                current.energy -= MOVE_COST;
                put_piece(&mut next, slot, current);
                Ok(RuleOutcome::stay(next).with_effect(format!("slot {slot} moved to ({x}, {y})")))
            }
            "search" => {
                let roll: u32 = rng.gen_range(1..=6);
                current.energy -= SEARCH_COST;
                current.score += roll;
                put_piece(&mut next, slot, current);

                let mut outcome = RuleOutcome::stay(next)
                    .with_effect(format!("slot {slot} searched and found {roll}"));
                if current.score >= self.target_score {
                    outcome.terminal = Some(MatchResult {
                        winners: vec![slot],
                        reason: "target_score".into(),
                    });
                }
                Ok(outcome)
            }
            "end_turn" => {
                Ok(RuleOutcome::advance(next).with_effect(format!("slot {slot} ended its turn")))
            }
            _ => Err(ReasonCode::UnknownAction),
        }
    }

    fn pass(&self, state: &Document, slot: u8, _rng: &mut SessionRng) -> RuleOutcome {
        RuleOutcome::advance(state.clone()).with_effect(format!("slot {slot} passed"))
    }

    fn start_turn(&self, state: &Document, slot: u8, _rng: &mut SessionRng) -> Document {
        let mut next = state.clone();
        if let Some(mut current) = piece(state, slot) {
            current.energy = ENERGY_PER_TURN;
            put_piece(&mut next, slot, current);
        }
        next
    }

    fn remove_participant(&self, state: &Document, slot: u8) -> Document {
        let mut next = state.clone();
        next.remove(&piece_key(slot));
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(rng: &mut SessionRng) -> (Skirmish, Document) {
        let rules = Skirmish::default();
        let state = rules.setup(&[0, 1], rng);
        let state = rules.start_turn(&state, 0, rng);
        (rules, state)
    }

    fn neighbour(rules: &Skirmish, state: &Document, slot: u8) -> (i64, i64) {
        let p = piece(state, slot).unwrap();
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1), (1, 1), (-1, -1)] {
            let (x, y) = (p.x + dx, p.y + dy);
            if rules.in_bounds(x, y) && !Skirmish::occupied(state, x, y, slot) {
                return (x, y);
            }
        }
        panic!("no free neighbour");
    }

    #[test]
    fn test_setup_is_deterministic() {
        let rules = Skirmish::default();
        let a = rules.setup(&[0, 1, 2], &mut SessionRng::new(9));
        let b = rules.setup(&[0, 1, 2], &mut SessionRng::new(9));
        assert_eq!(a, b);
        assert!(piece(&a, 2).is_some());
        assert!(piece(&a, 3).is_none());
    }

    #[test]
    fn test_setup_never_stacks_pieces() {
        let rules = Skirmish {
            width: 2,
            height: 1,
            target_score: 5,
        };
        let state = rules.setup(&[0, 1], &mut SessionRng::new(1));
        let a = piece(&state, 0).unwrap();
        let b = piece(&state, 1).unwrap();
        assert_ne!((a.x, a.y), (b.x, b.y));
    }

    #[test]
    fn test_move_costs_energy() {
        let mut rng = SessionRng::new(4);
        let (rules, state) = started(&mut rng);
        let (x, y) = neighbour(&rules, &state, 0);
        let action = Action::new("move", json!({ "x": x, "y": y }));

        assert!(rules.check_shape(&state, 0, &action).is_ok());
        let outcome = rules.apply(&state, 0, &action, &mut rng).unwrap();
        let moved = piece(&outcome.state, 0).unwrap();
        assert_eq!((moved.x, moved.y), (x, y));
        assert_eq!(moved.energy, ENERGY_PER_TURN - MOVE_COST);
        assert_eq!(outcome.next, crate::rules::NextTurn::Stay);
    }

    #[test]
    fn test_move_out_of_range() {
        let mut rng = SessionRng::new(4);
        let (rules, state) = started(&mut rng);
        let action = Action::new("move", json!({ "x": -1, "y": 99 }));
        assert_eq!(
            rules.check_shape(&state, 0, &action),
            Err(ReasonCode::OutOfRange)
        );
    }

    #[test]
    fn test_move_missing_coordinates_is_malformed() {
        let mut rng = SessionRng::new(4);
        let (rules, state) = started(&mut rng);
        let action = Action::new("move", json!({ "x": "left" }));
        assert_eq!(
            rules.check_shape(&state, 0, &action),
            Err(ReasonCode::Malformed)
        );
    }

    #[test]
    fn test_search_requires_energy() {
        let mut rng = SessionRng::new(4);
        let rules = Skirmish::default();
        let state = rules.setup(&[0, 1], &mut rng);
        let action = Action::new("search", Value::Null);
        assert_eq!(
            rules.check_shape(&state, 0, &action),
            Err(ReasonCode::InsufficientResources)
        );
    }

    #[test]
    fn test_search_uses_session_rng() {
        let mut rng = SessionRng::new(4);
        let (rules, state) = started(&mut rng);
        let before = rng.draws();
        let outcome = rules
            .apply(&state, 0, &Action::new("search", Value::Null), &mut rng)
            .unwrap();
        assert!(rng.draws() > before);
        assert!(piece(&outcome.state, 0).unwrap().score >= 1);
    }

    #[test]
    fn test_search_reaching_target_is_terminal() {
        let mut rng = SessionRng::new(4);
        let rules = Skirmish {
            target_score: 1,
            ..Default::default()
        };
        let state = rules.setup(&[0, 1], &mut rng);
        let state = rules.start_turn(&state, 1, &mut rng);
        let outcome = rules
            .apply(&state, 1, &Action::new("search", Value::Null), &mut rng)
            .unwrap();
        let result = outcome.terminal.unwrap();
        assert_eq!(result.winners, vec![1]);
    }

    #[test]
    fn test_unknown_action() {
        let mut rng = SessionRng::new(4);
        let (rules, state) = started(&mut rng);
        assert_eq!(
            rules.check_shape(&state, 0, &Action::new("fly", Value::Null)),
            Err(ReasonCode::UnknownAction)
        );
    }

    #[test]
    fn test_remove_participant_drops_piece() {
        let mut rng = SessionRng::new(4);
        let (rules, state) = started(&mut rng);
        let state = rules.remove_participant(&state, 1);
        assert!(piece(&state, 1).is_none());
        assert!(piece(&state, 0).is_some());
    }
}
