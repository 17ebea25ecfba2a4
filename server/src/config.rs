//! Plain configuration structs for the session server.
//!
//! The binary fills these from command line arguments; tests and embedders
//! build them directly from `Default`.

use crate::error::ServerError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Per-session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Room name, also the routing key in HELLO.
    pub name: String,
    /// Number of participant slots.
    pub capacity: u8,
    /// Participants needed before the lobby can start.
    pub min_players: u8,
    /// Spectator cap; `None` means unbounded.
    pub max_spectators: Option<u8>,
    /// How long a dropped participant's slot is held open.
    pub grace_period: Duration,
    /// A connection silent for longer than this is treated as dropped.
    pub liveness_timeout: Duration,
    pub ping_interval: Duration,
    /// Granularity of the match loop's timer checks.
    pub tick_interval: Duration,
    /// Pause/resume votes that do not reach a majority expire after this.
    pub pause_vote_window: Duration,
    /// Let a lone connected participant resume while others are in grace.
    pub solo_unpause: bool,
    /// Force a full snapshot broadcast every this many sequence numbers.
    pub full_snapshot_interval: u64,
    /// Keep playing when a participant's grace expires; otherwise end.
    pub continue_after_vacate: bool,
    pub seed: u64,
    pub scenario: String,
    pub mode: String,
    /// ACTION/CHAT messages allowed per connection per second.
    pub actions_per_second: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            capacity: 2,
            min_players: 2,
            max_spectators: Some(8),
            grace_period: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(5),
            tick_interval: Duration::from_millis(250),
            pause_vote_window: Duration::from_secs(30),
            solo_unpause: true,
            full_snapshot_interval: 32,
            continue_after_vacate: true,
            seed: 0,
            scenario: "skirmish".to_string(),
            mode: "competitive".to_string(),
            actions_per_second: 10,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.capacity == 0 {
            return Err(ServerError::Config("capacity must be at least 1".into()));
        }
        if self.min_players == 0 || self.min_players > self.capacity {
            return Err(ServerError::Config(format!(
                "min_players must be between 1 and capacity ({})",
                self.capacity
            )));
        }
        if self.name.is_empty() || self.name.contains(':') {
            return Err(ServerError::Config(
                "session name must be non-empty and must not contain ':'".into(),
            ));
        }
        if self.full_snapshot_interval == 0 {
            return Err(ServerError::Config(
                "full_snapshot_interval must be at least 1".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ServerError::Config("tick_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Address advertised to the master server; defaults to `bind`.
    pub advertised: Option<String>,
    /// One session is hosted per entry.
    pub sessions: Vec<SessionConfig>,
    pub master: Option<String>,
    pub heartbeat_interval: Duration,
    pub master_token: Option<String>,
    pub region: String,
    pub build: String,
    pub replay_dir: Option<PathBuf>,
    pub banlist: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], shared::DEFAULT_SERVER_PORT)),
            advertised: None,
            sessions: vec![SessionConfig::default()],
            master: None,
            heartbeat_interval: Duration::from_secs(15),
            master_token: None,
            region: String::new(),
            build: env!("CARGO_PKG_VERSION").to_string(),
            replay_dir: None,
            banlist: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.sessions.is_empty() {
            return Err(ServerError::Config("at least one session is required".into()));
        }
        let mut names: Vec<&str> = self.sessions.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.sessions.len() {
            return Err(ServerError::Config("session names must be unique".into()));
        }
        self.sessions.iter().try_for_each(SessionConfig::validate)
    }

    pub fn advertised_address(&self) -> String {
        self.advertised
            .clone()
            .unwrap_or_else(|| self.bind.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_are_valid() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_players_above_capacity_rejected() {
        let config = SessionConfig {
            capacity: 2,
            min_players: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_name_with_separator_rejected() {
        let config = SessionConfig {
            name: "a:b".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_session_names_rejected() {
        let config = ServerConfig {
            sessions: vec![SessionConfig::default(), SessionConfig::default()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_advertised_address_falls_back_to_bind() {
        let config = ServerConfig::default();
        assert_eq!(config.advertised_address(), "127.0.0.1:7777");

        let config = ServerConfig {
            advertised: Some("play.example.net:7777".into()),
            ..Default::default()
        };
        assert_eq!(config.advertised_address(), "play.example.net:7777");
    }
}
