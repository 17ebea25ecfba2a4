//! Message-protocol listener and reaper for the master server.
//!
//! Session servers and browsers speak the same framed JSON protocol as the
//! gameplay connection. A connection may carry any number of requests; each
//! gets exactly one response. The registry table is shared with the HTTP
//! listing and the reaper through `Arc<RwLock<..>>`.

use crate::config::MasterConfig;
use crate::error::MasterError;
use crate::registry::MasterRegistry;
use crate::security::{validate_address, validate_metadata, verify_token, IpRateLimiter};
use log::{debug, error, info, warn};
use shared::framing::{read_message, write_message};
use shared::{MasterRequest, MasterResponse};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, sleep, timeout, Duration, Instant, MissedTickBehavior};

/// Idle connections are closed after this long without a request.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state behind every master connection.
#[derive(Clone)]
pub struct MasterService {
    registry: Arc<RwLock<MasterRegistry>>,
    limiter: Arc<Mutex<IpRateLimiter>>,
    token: Option<String>,
    reap_interval: Duration,
}

impl MasterService {
    pub fn new(config: &MasterConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(MasterRegistry::new(
                config.stale_after,
                config.max_entries,
            ))),
            limiter: Arc::new(Mutex::new(IpRateLimiter::new(
                config.rate_limit,
                config.rate_window,
            ))),
            token: config.token.clone(),
            reap_interval: config.reap_interval,
        }
    }

    pub fn registry(&self) -> Arc<RwLock<MasterRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Applies one request to the registry.
    pub async fn handle(&self, request: MasterRequest, now: Instant) -> Result<MasterResponse, MasterError> {
        match request {
            MasterRequest::Register {
                address,
                metadata,
                token,
            } => {
                if let Err(e) = verify_token(self.token.as_deref(), token.as_deref()) {
                    warn!("Refused registration of {}: bad token", address);
                    return Err(e);
                }
                validate_address(&address)?;
                validate_metadata(&metadata)?;
                let registry_id = self.registry.write().await.register(address, metadata, now)?;
                Ok(MasterResponse::Registered { registry_id })
            }
            MasterRequest::Heartbeat {
                registry_id,
                metadata,
            } => {
                validate_metadata(&metadata)?;
                self.registry
                    .write()
                    .await
                    .heartbeat(&registry_id, metadata, now)?;
                Ok(MasterResponse::HeartbeatAck)
            }
            MasterRequest::Unregister { registry_id } => {
                self.registry.write().await.unregister(&registry_id);
                Ok(MasterResponse::Unregistered)
            }
            MasterRequest::List { filter } => {
                let servers = self.registry.read().await.list(&filter, now);
                Ok(MasterResponse::Servers { servers })
            }
            MasterRequest::Ping { timestamp } => Ok(MasterResponse::Pong { timestamp }),
        }
    }

    /// Rate-checks the peer, then handles the request, folding refusals
    /// into ERROR responses. The flag is false when the connection should be
    /// closed after replying.
    ///
    /// HEARTBEATs for a registered id skip the per-IP budget: one host may
    /// run many rooms, each heartbeating on its own schedule.
    pub async fn respond(&self, ip: IpAddr, request: MasterRequest, now: Instant) -> (MasterResponse, bool) {
        if !self.is_known_heartbeat(&request).await {
            if let Err(e) = self.limiter.lock().await.check(ip, now) {
                info!("Rate limiting {}", ip);
                return (error_response(&e), false);
            }
        }
        match self.handle(request, now).await {
            Ok(response) => (response, true),
            Err(e) => {
                debug!("Request from {} refused: {}", ip, e);
                (error_response(&e), true)
            }
        }
    }

    async fn is_known_heartbeat(&self, request: &MasterRequest) -> bool {
        match request {
            MasterRequest::Heartbeat { registry_id, .. } => {
                self.registry.read().await.get(registry_id).is_some()
            }
            _ => false,
        }
    }

    /// Serves one connection until EOF, idle timeout or a protocol error.
    pub async fn serve_connection(&self, mut stream: TcpStream, addr: SocketAddr) {
        loop {
            let frame = match timeout(IDLE_TIMEOUT, read_message::<MasterRequest, _>(&mut stream)).await {
                Ok(frame) => frame,
                Err(_) => {
                    debug!("Closing idle master connection from {}", addr);
                    return;
                }
            };
            let request = match frame {
                Ok(Some(request)) => request,
                Ok(None) => return,
                Err(e) => {
                    warn!("Malformed request from {}: {}", addr, e);
                    let reply = error_response(&MasterError::Protocol(e));
                    let _ = write_message(&mut stream, &reply).await;
                    return;
                }
            };

            let (response, keep_open) = self.respond(addr.ip(), request, Instant::now()).await;
            if let Err(e) = write_message(&mut stream, &response).await {
                info!("Write to {} failed: {}", addr, e);
                return;
            }
            if !keep_open {
                return;
            }
        }
    }

    /// Accepts message-protocol connections forever.
    pub async fn run(self, listener: TcpListener) -> Result<(), MasterError> {
        info!("Master listening on {}", listener.local_addr()?);
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let service = self.clone();
                    tokio::spawn(async move {
                        service.serve_connection(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Periodic sweep removing stale entries and idle rate-limit buckets.
    pub async fn run_reaper(self) {
        let mut ticker = interval(self.reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let reaped = self.registry.write().await.reap(now);
            if reaped > 0 {
                debug!("Reaped {} stale entr{}", reaped, if reaped == 1 { "y" } else { "ies" });
            }
            self.limiter.lock().await.prune(now);
        }
    }
}

fn error_response(error: &MasterError) -> MasterResponse {
    MasterResponse::Error {
        reason: error.reason().to_string(),
    }
}
