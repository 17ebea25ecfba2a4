//! Rejoin tokens and disconnect grace periods.
//!
//! A token is `"<session>:<32 hex chars>"`. The session prefix lets the
//! connection router find the right session without asking every one of
//! them; the random part is the actual credential. Each slot holds at most
//! one live token: reissuing invalidates the previous one, so a token that
//! was already redeemed cannot be replayed after someone else took over.

use rand::Rng;
use shared::ReasonCode;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

pub const TOKEN_SEPARATOR: char = ':';

/// Mints a fresh token for `session`.
pub fn mint_token(session: &str) -> String {
    let secret: u128 = rand::thread_rng().gen();
    format!("{session}{TOKEN_SEPARATOR}{secret:032x}")
}

/// Extracts the session id embedded in a token.
pub fn session_of(token: &str) -> Option<&str> {
    let (session, secret) = token.rsplit_once(TOKEN_SEPARATOR)?;
    if session.is_empty() || secret.len() != 32 {
        return None;
    }
    Some(session)
}

#[derive(Debug, Clone)]
struct TokenRecord {
    slot: u8,
    issued: Instant,
}

/// Issues and redeems tokens and tracks per-slot grace deadlines.
#[derive(Debug)]
pub struct RejoinManager {
    session: String,
    tokens: HashMap<String, TokenRecord>,
    grace: HashMap<u8, Instant>,
}

impl RejoinManager {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            tokens: HashMap::new(),
            grace: HashMap::new(),
        }
    }

    /// Issues a token for `slot`, revoking any token the slot held before.
    pub fn issue(&mut self, slot: u8, now: Instant) -> String {
        self.revoke_token(slot);
        let token = mint_token(&self.session);
        self.tokens
            .insert(token.clone(), TokenRecord { slot, issued: now });
        token
    }

    /// Resolves a token to its slot without consuming it.
    pub fn redeem(&self, token: &str) -> Result<u8, ReasonCode> {
        self.tokens
            .get(token)
            .map(|record| record.slot)
            .ok_or(ReasonCode::InvalidToken)
    }

    /// How long ago `token` was issued.
    pub fn token_age(&self, token: &str, now: Instant) -> Option<Duration> {
        self.tokens
            .get(token)
            .map(|record| now.saturating_duration_since(record.issued))
    }

    pub fn revoke_token(&mut self, slot: u8) {
        self.tokens.retain(|_, record| record.slot != slot);
    }

    /// Forgets everything about `slot`: token and grace timer.
    pub fn revoke_slot(&mut self, slot: u8) {
        self.revoke_token(slot);
        self.grace.remove(&slot);
    }

    pub fn revoke_all(&mut self) {
        self.tokens.clear();
        self.grace.clear();
    }

    pub fn start_grace(&mut self, slot: u8, now: Instant, period: Duration) {
        self.grace.insert(slot, now + period);
    }

    pub fn cancel_grace(&mut self, slot: u8) {
        self.grace.remove(&slot);
    }

    pub fn in_grace(&self, slot: u8) -> bool {
        self.grace.contains_key(&slot)
    }

    pub fn grace_deadline(&self, slot: u8) -> Option<Instant> {
        self.grace.get(&slot).copied()
    }

    /// Removes and returns slots whose grace period has run out, lowest
    /// index first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<u8> {
        let mut expired: Vec<u8> = self
            .grace
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(slot, _)| *slot)
            .collect();
        expired.sort_unstable();
        for slot in &expired {
            self.grace.remove(slot);
        }
        expired
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}
