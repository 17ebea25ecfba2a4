//! Request budgets and payload checks for the master server.

use crate::error::MasterError;
use shared::ServerMetadata;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use tokio::time::{Duration, Instant};

pub const MAX_NAME_LEN: usize = 64;
pub const MAX_MODE_LEN: usize = 32;
pub const MAX_REGION_LEN: usize = 32;
pub const MAX_ADDRESS_LEN: usize = 255;

/// Sliding-window request counter keyed by peer IP.
#[derive(Debug)]
pub struct IpRateLimiter {
    limit: usize,
    window: Duration,
    hits: HashMap<IpAddr, VecDeque<Instant>>,
}

impl IpRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            hits: HashMap::new(),
        }
    }

    /// Records a request and reports whether it is within budget.
    pub fn check(&mut self, ip: IpAddr, now: Instant) -> Result<(), MasterError> {
        let window = self.window;
        let hits = self.hits.entry(ip).or_default();
        while hits
            .front()
            .map_or(false, |&t| now.saturating_duration_since(t) > window)
        {
            hits.pop_front();
        }
        if hits.len() >= self.limit {
            return Err(MasterError::RateLimited);
        }
        hits.push_back(now);
        Ok(())
    }

    /// Forgets peers with no hits inside the window.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.hits.retain(|_, hits| {
            hits.back()
                .map_or(false, |&t| now.saturating_duration_since(t) <= window)
        });
    }

    pub fn tracked(&self) -> usize {
        self.hits.len()
    }
}

pub fn validate_metadata(metadata: &ServerMetadata) -> Result<(), MasterError> {
    let too_long = |field: &str, value: &str, max: usize| {
        if value.chars().count() > max {
            Err(MasterError::InvalidPayload(format!(
                "{field} longer than {max} characters"
            )))
        } else {
            Ok(())
        }
    };
    too_long("name", &metadata.name, MAX_NAME_LEN)?;
    too_long("mode", &metadata.mode, MAX_MODE_LEN)?;
    too_long("region", &metadata.region, MAX_REGION_LEN)?;
    if metadata.capacity < metadata.player_count {
        return Err(MasterError::InvalidPayload(format!(
            "player_count {} exceeds capacity {}",
            metadata.player_count, metadata.capacity
        )));
    }
    Ok(())
}

pub fn validate_address(address: &str) -> Result<(), MasterError> {
    if address.is_empty() || address.len() > MAX_ADDRESS_LEN {
        return Err(MasterError::InvalidPayload("bad address length".into()));
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(MasterError::InvalidPayload(format!(
            "address {address} is not host:port"
        ))),
    }
}

/// Accepts anything when no secret is configured.
pub fn verify_token(expected: Option<&str>, offered: Option<&str>) -> Result<(), MasterError> {
    match expected {
        None => Ok(()),
        Some(expected) if offered == Some(expected) => Ok(()),
        Some(_) => Err(MasterError::Unauthorized),
    }
}
