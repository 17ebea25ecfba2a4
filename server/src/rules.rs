//! Contract between the match loop and the game-rule engine.
//!
//! The engine is a deterministic state-transition function over an opaque
//! [`Document`]. All randomness comes from the [`SessionRng`] passed in, so a
//! snapshot (which carries the RNG state) fully determines future outcomes.

use serde_json::Value;
use shared::{Document, MatchResult, ReasonCode, SessionRng};

/// A gameplay action as submitted in an ACTION message.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action_type: String,
    pub payload: Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

/// Who acts next after an accepted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTurn {
    /// The acting slot keeps the turn.
    Stay,
    /// Hand the turn to the next occupied slot by index, with wraparound.
    Advance,
    /// The engine picked the next slot itself (initiative order); the match
    /// loop takes it as authoritative.
    Slot(u8),
}

/// Result of a successful engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub state: Document,
    pub next: NextTurn,
    pub terminal: Option<MatchResult>,
    pub effects: Vec<String>,
}

impl RuleOutcome {
    pub fn stay(state: Document) -> Self {
        Self {
            state,
            next: NextTurn::Stay,
            terminal: None,
            effects: Vec::new(),
        }
    }

    pub fn advance(state: Document) -> Self {
        Self {
            next: NextTurn::Advance,
            ..Self::stay(state)
        }
    }

    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effects.push(effect.into());
        self
    }
}

pub trait RuleEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Builds the initial document for the given participant slots.
    fn setup(&self, participants: &[u8], rng: &mut SessionRng) -> Document;

    /// Shape check: legal type, in-range targets, sufficient resources.
    fn check_shape(&self, state: &Document, slot: u8, action: &Action) -> Result<(), ReasonCode>;

    /// Applies an action. Called only after `check_shape` passed.
    fn apply(
        &self,
        state: &Document,
        slot: u8,
        action: &Action,
        rng: &mut SessionRng,
    ) -> Result<RuleOutcome, ReasonCode>;

    /// Automatic pass for a participant whose connection is in its grace
    /// period while holding the turn.
    fn pass(&self, state: &Document, _slot: u8, _rng: &mut SessionRng) -> RuleOutcome {
        RuleOutcome::advance(state.clone())
    }

    /// Hook run when `slot` receives the turn.
    fn start_turn(&self, state: &Document, _slot: u8, _rng: &mut SessionRng) -> Document {
        state.clone()
    }

    /// Hook run when a participant slot is permanently vacated mid-match.
    fn remove_participant(&self, state: &Document, _slot: u8) -> Document {
        state.clone()
    }
}
