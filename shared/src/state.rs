//! Session snapshot model shared by server and clients.
//!
//! A [`Snapshot`] is the full serialisable state of a session at one
//! sequence number. The rule engine's own state is an opaque JSON document
//! ([`Document`]); the network layer only knows how to diff it key by key.
//! A [`StateDiff`] moves a snapshot from `base_sequence` to `sequence` and
//! applying it is a pure function, so a client fed diffs ends up with exactly
//! the state a client fed full snapshots would have.

use crate::rng::RngState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Rule-engine state: top-level keys map to arbitrary JSON values.
pub type Document = BTreeMap<String, Value>;

/// Lifecycle of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Running,
    Paused,
    Ended,
}

impl Phase {
    pub fn is_live(&self) -> bool {
        matches!(self, Phase::Running | Phase::Paused)
    }
}

/// Seat kind requested in HELLO and reported in slot listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Participant,
    Spectator,
}

/// Connection status of a slot as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Vacant,
    Connected,
    /// Connection lost, slot held open for the grace period.
    Reserved,
}

/// Public view of one slot, broadcast in SLOTS and WELCOME.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub index: u8,
    pub name: String,
    pub role: Role,
    pub status: SlotStatus,
    pub ready: bool,
}

/// Outcome reported when a match reaches the `Ended` phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winners: Vec<u8>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub phase: Phase,
    pub round: u32,
    pub turn: u64,
    pub active_slot: Option<u8>,
    pub rng: RngState,
    pub game: Document,
}

impl Snapshot {
    pub fn new(seed: u64) -> Self {
        Self {
            sequence: 0,
            phase: Phase::Lobby,
            round: 0,
            turn: 0,
            active_slot: None,
            rng: RngState { seed, draws: 0 },
            game: Document::new(),
        }
    }

    /// Computes the diff that turns `self` into `next`.
    pub fn diff_to(&self, next: &Snapshot) -> StateDiff {
        let set: Document = next
            .game
            .iter()
            .filter(|(key, value)| self.game.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let removed: Vec<String> = self
            .game
            .keys()
            .filter(|key| !next.game.contains_key(*key))
            .cloned()
            .collect();

        StateDiff {
            base_sequence: self.sequence,
            sequence: next.sequence,
            phase: next.phase,
            round: next.round,
            turn: next.turn,
            active_slot: next.active_slot,
            rng: next.rng,
            set,
            removed,
        }
    }

    /// Applies `diff` on top of this snapshot.
    ///
    /// Fails with [`DiffError::SequenceGap`] when the diff was computed
    /// against a different sequence number than the one held here.
    pub fn apply_diff(&self, diff: &StateDiff) -> Result<Snapshot, DiffError> {
        if diff.base_sequence != self.sequence {
            return Err(DiffError::SequenceGap {
                held: self.sequence,
                base: diff.base_sequence,
            });
        }

        let mut game = self.game.clone();
        for key in &diff.removed {
            game.remove(key);
        }
        for (key, value) in &diff.set {
            game.insert(key.clone(), value.clone());
        }

        Ok(Snapshot {
            sequence: diff.sequence,
            phase: diff.phase,
            round: diff.round,
            turn: diff.turn,
            active_slot: diff.active_slot,
            rng: diff.rng,
            game,
        })
    }

    /// Size of the JSON encoding, used to decide between diff and snapshot.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

/// Incremental change between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub base_sequence: u64,
    pub sequence: u64,
    pub phase: Phase,
    pub round: u32,
    pub turn: u64,
    pub active_slot: Option<u8>,
    pub rng: RngState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: Document,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

impl StateDiff {
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

/// Payload of a STATE message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateUpdate {
    Full { snapshot: Snapshot },
    Diff { diff: StateDiff },
}

impl StateUpdate {
    /// Applies the update to the state a client currently holds.
    ///
    /// A full snapshot always applies; a diff needs a held snapshot at the
    /// diff's base sequence.
    pub fn apply(&self, held: Option<&Snapshot>) -> Result<Snapshot, DiffError> {
        match self {
            StateUpdate::Full { snapshot } => Ok(snapshot.clone()),
            StateUpdate::Diff { diff } => match held {
                Some(current) => current.apply_diff(diff),
                None => Err(DiffError::NoBase {
                    base: diff.base_sequence,
                }),
            },
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            StateUpdate::Full { snapshot } => snapshot.sequence,
            StateUpdate::Diff { diff } => diff.sequence,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, StateUpdate::Full { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("diff based on sequence {base} but sequence {held} is held")]
    SequenceGap { held: u64, base: u64 },
    #[error("diff based on sequence {base} but no snapshot is held")]
    NoBase { base: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_with(sequence: u64, entries: &[(&str, Value)]) -> Snapshot {
        let mut snapshot = Snapshot::new(11);
        snapshot.sequence = sequence;
        for (key, value) in entries {
            snapshot.game.insert(key.to_string(), value.clone());
        }
        snapshot
    }

    #[test]
    fn test_diff_only_carries_changed_keys() {
        let before = snapshot_with(3, &[("board", json!([0, 0])), ("score", json!(1))]);
        let mut after = snapshot_with(4, &[("board", json!([0, 0])), ("score", json!(2))]);
        after.turn = 1;

        let diff = before.diff_to(&after);
        assert_eq!(diff.base_sequence, 3);
        assert_eq!(diff.sequence, 4);
        assert_eq!(diff.set.len(), 1);
        assert_eq!(diff.set.get("score"), Some(&json!(2)));
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_diff_records_removed_keys() {
        let before = snapshot_with(1, &[("a", json!(1)), ("b", json!(2))]);
        let after = snapshot_with(2, &[("a", json!(1))]);

        let diff = before.diff_to(&after);
        assert_eq!(diff.removed, vec!["b".to_string()]);

        let rebuilt = before.apply_diff(&diff).unwrap();
        assert_eq!(rebuilt, after);
    }

    #[test]
    fn test_apply_diff_matches_full_snapshot() {
        let s0 = snapshot_with(0, &[("x", json!({"hp": 5}))]);
        let mut s1 = snapshot_with(1, &[("x", json!({"hp": 4})), ("y", json!(true))]);
        s1.phase = Phase::Running;
        s1.active_slot = Some(1);
        s1.rng.draws = 3;

        let via_diff = StateUpdate::Diff {
            diff: s0.diff_to(&s1),
        }
        .apply(Some(&s0))
        .unwrap();
        let via_full = StateUpdate::Full {
            snapshot: s1.clone(),
        }
        .apply(None)
        .unwrap();

        assert_eq!(via_diff, via_full);
        assert_eq!(via_diff, s1);
    }

    #[test]
    fn test_apply_diff_detects_gap() {
        let s0 = snapshot_with(0, &[]);
        let s1 = snapshot_with(1, &[]);
        let s2 = snapshot_with(2, &[]);

        let diff = s1.diff_to(&s2);
        assert_eq!(
            s0.apply_diff(&diff),
            Err(DiffError::SequenceGap { held: 0, base: 1 })
        );
    }

    #[test]
    fn test_diff_without_base_fails() {
        let s0 = snapshot_with(0, &[]);
        let s1 = snapshot_with(1, &[]);
        let update = StateUpdate::Diff {
            diff: s0.diff_to(&s1),
        };
        assert_eq!(update.apply(None), Err(DiffError::NoBase { base: 0 }));
    }

    #[test]
    fn test_state_update_wire_shape() {
        let s0 = snapshot_with(0, &[]);
        let update = StateUpdate::Full { snapshot: s0 };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["kind"], "full");
        assert_eq!(value["snapshot"]["phase"], "lobby");
    }

    #[test]
    fn test_phase_is_live() {
        assert!(!Phase::Lobby.is_live());
        assert!(Phase::Running.is_live());
        assert!(Phase::Paused.is_live());
        assert!(!Phase::Ended.is_live());
    }
}
