//! Deterministic, serialisable random number generator owned by a session.
//!
//! The generator is counter based: the n-th output is a pure function of
//! `(seed, n)` (SplitMix64 evaluated at step n). Its whole state is therefore
//! the seed plus the number of draws consumed so far, which travels inside
//! every snapshot. Restoring a snapshot or replaying a log reproduces the
//! exact same sequence of draws.

use rand::{Error, RngCore};
use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seed plus consumed-draw count of a [`SessionRng`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RngState {
    pub seed: u64,
    pub draws: u64,
}

/// Session-scoped generator handed to the rule engine on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRng {
    state: RngState,
}

impl SessionRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: RngState { seed, draws: 0 },
        }
    }

    /// Rebuilds a generator from a snapshot's RNG state.
    pub fn restore(state: RngState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> RngState {
        self.state
    }

    pub fn draws(&self) -> u64 {
        self.state.draws
    }

    fn mix(mut z: u64) -> u64 {
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl RngCore for SessionRng {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.state.draws = self.state.draws.wrapping_add(1);
        let z = self
            .state
            .seed
            .wrapping_add(self.state.draws.wrapping_mul(GOLDEN_GAMMA));
        Self::mix(z)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
