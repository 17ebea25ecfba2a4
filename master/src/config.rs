//! Master server settings, filled from the command line by the binary.

use crate::error::MasterError;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Listener for REGISTER / HEARTBEAT / UNREGISTER / LIST / PING.
    pub bind: SocketAddr,
    /// Read-only HTTP listing; disabled when `None`.
    pub http_bind: Option<SocketAddr>,
    /// Entries without a heartbeat for longer than this are reaped.
    pub stale_after: Duration,
    pub reap_interval: Duration,
    /// Requests allowed per peer IP per `rate_window`.
    pub rate_limit: u32,
    pub rate_window: Duration,
    /// Shared secret required on REGISTER when set.
    pub token: Option<String>,
    pub max_entries: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], shared::DEFAULT_MASTER_PORT)),
            http_bind: Some(SocketAddr::from(([0, 0, 0, 0], 7780))),
            stale_after: Duration::from_secs(45),
            reap_interval: Duration::from_secs(15),
            rate_limit: 30,
            rate_window: Duration::from_secs(60),
            token: None,
            max_entries: 1024,
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> Result<(), MasterError> {
        if self.stale_after.is_zero() || self.reap_interval.is_zero() {
            return Err(MasterError::Config(
                "stale_after and reap_interval must be non-zero".into(),
            ));
        }
        if self.rate_limit == 0 {
            return Err(MasterError::Config("rate_limit must be at least 1".into()));
        }
        if self.max_entries == 0 {
            return Err(MasterError::Config("max_entries must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MasterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let config = MasterConfig {
            rate_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
