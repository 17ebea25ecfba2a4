//! Master server registration for one hosted session.
//!
//! The publisher registers the room, then heartbeats on a fixed interval
//! with the player count and phase taken from the session's status channel.
//! Failures are never fatal: they are retried with exponential backoff and
//! the room stays playable, merely unlisted. When the session goes away the
//! publisher unregisters and exits.

use crate::error::ServerError;
use crate::session::SessionStatus;
use log::{debug, info, warn};
use shared::framing::{read_message, write_message};
use shared::{MasterRequest, MasterResponse, Phase, ServerMetadata, PROTOCOL_VERSION, UNKNOWN_REGISTRY_ID};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Duration, Instant};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Doubling retry delay with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub master: String,
    pub advertised: String,
    pub interval: Duration,
    pub token: Option<String>,
    pub region: String,
    pub build: String,
}

pub struct HeartbeatPublisher {
    config: HeartbeatConfig,
    status: watch::Receiver<SessionStatus>,
    registry_id: Option<String>,
    backoff: Backoff,
}

/// Sends one request to the master over a fresh connection.
pub async fn request(master: &str, message: &MasterRequest) -> Result<MasterResponse, ServerError> {
    let exchange = async {
        let mut stream = TcpStream::connect(master).await?;
        write_message(&mut stream, message).await?;
        read_message::<MasterResponse, _>(&mut stream)
            .await?
            .ok_or(ServerError::Protocol(shared::ProtocolError::Unexpected(
                "end of stream",
            )))
    };
    match timeout(REQUEST_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => Err(ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "master did not answer",
        ))),
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Lobby => "lobby",
        Phase::Running => "running",
        Phase::Paused => "paused",
        Phase::Ended => "ended",
    }
}

impl HeartbeatPublisher {
    pub fn new(config: HeartbeatConfig, status: watch::Receiver<SessionStatus>) -> Self {
        Self {
            config,
            status,
            registry_id: None,
            backoff: Backoff::default(),
        }
    }

    pub fn metadata(&self) -> ServerMetadata {
        let status = self.status.borrow();
        ServerMetadata {
            name: status.name.clone(),
            player_count: status.players,
            capacity: status.capacity,
            scenario: status.scenario.clone(),
            mode: status.mode.clone(),
            region: self.config.region.clone(),
            build: self.config.build.clone(),
            phase: phase_name(status.phase).to_string(),
            protocol: PROTOCOL_VERSION,
        }
    }

    fn session_gone(&self) -> bool {
        self.status.has_changed().is_err() || self.status.borrow().phase == Phase::Ended
    }

    /// Registers if needed, otherwise heartbeats.
    async fn beat(&mut self) -> Result<(), ServerError> {
        loop {
            let metadata = self.metadata();
            let Some(registry_id) = self.registry_id.clone() else {
                let register = MasterRequest::Register {
                    address: self.config.advertised.clone(),
                    metadata,
                    token: self.config.token.clone(),
                };
                return match request(&self.config.master, &register).await? {
                    MasterResponse::Registered { registry_id } => {
                        info!(
                            "Registered {} with master {} as {}",
                            self.config.advertised, self.config.master, registry_id
                        );
                        self.registry_id = Some(registry_id);
                        Ok(())
                    }
                    other => Err(ServerError::Config(format!(
                        "registration refused: {:?}",
                        other
                    ))),
                };
            };

            let heartbeat = MasterRequest::Heartbeat {
                registry_id,
                metadata,
            };
            match request(&self.config.master, &heartbeat).await? {
                MasterResponse::HeartbeatAck => return Ok(()),
                MasterResponse::Error { reason } if reason == UNKNOWN_REGISTRY_ID => {
                    info!("Master forgot our registration, registering again");
                    self.registry_id = None;
                }
                other => {
                    return Err(ServerError::Config(format!(
                        "heartbeat refused: {:?}",
                        other
                    )))
                }
            }
        }
    }

    async fn unregister(&mut self) {
        let Some(registry_id) = self.registry_id.take() else {
            return;
        };
        match request(&self.config.master, &MasterRequest::Unregister { registry_id }).await {
            Ok(_) => info!("Unregistered {} from master", self.config.advertised),
            Err(e) => debug!("Unregister failed: {}", e),
        }
    }

    /// Runs until the session ends or `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut stopping = false;
        while !stopping && !self.session_gone() && !*shutdown.borrow() {
            let delay = match self.beat().await {
                Ok(()) => {
                    self.backoff.reset();
                    self.config.interval
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        "Master {} unreachable ({}), retrying in {:?}",
                        self.config.master, e, delay
                    );
                    delay
                }
            };

            // Player count changes ride along with the next heartbeat; only
            // the end of the session or a shutdown cuts the wait short.
            let deadline = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    changed = shutdown.changed() => {
                        stopping = changed.is_err() || *shutdown.borrow();
                        if stopping {
                            break;
                        }
                    },
                    changed = self.status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    },
                }
                if self.session_gone() {
                    break;
                }
            }
        }
        self.unregister().await;
    }
}
