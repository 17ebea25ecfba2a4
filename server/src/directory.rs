//! Named sessions hosted by one server process.
//!
//! The directory is the only structure shared between connection tasks and
//! session tasks. It maps room names to the inbound queue of each session's
//! match loop; the sessions themselves are never shared.

use crate::config::SessionConfig;
use crate::error::ServerError;
use crate::rejoin::session_of;
use crate::replay::ReplayRecorder;
use crate::rules::RuleEngine;
use crate::session::{Session, SessionEvent, SessionStatus};
use log::{info, warn};
use shared::{ClientMessage, ReasonCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tokio::time::Instant;

/// Cloneable reference to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub name: String,
    pub inbox: mpsc::UnboundedSender<SessionEvent>,
    pub status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn send(&self, event: SessionEvent) -> bool {
        self.inbox.send(event).is_ok()
    }
}

#[derive(Default)]
struct Rooms {
    sessions: HashMap<String, SessionHandle>,
    default_room: Option<String>,
}

#[derive(Clone, Default)]
pub struct SessionDirectory {
    rooms: Arc<RwLock<Rooms>>,
    emptied: Arc<Notify>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a session task and registers it under its name. The first
    /// session opened becomes the default room for HELLOs without one.
    pub async fn open(
        &self,
        config: SessionConfig,
        engine: Arc<dyn RuleEngine>,
        recorder: Box<dyn ReplayRecorder>,
    ) -> Result<SessionHandle, ServerError> {
        config.validate()?;
        let mut rooms = self.rooms.write().await;
        if rooms.sessions.contains_key(&config.name) {
            return Err(ServerError::Config(format!(
                "session {} already exists",
                config.name
            )));
        }

        let name = config.name.clone();
        let (session, status) = Session::new(config, engine, recorder, Instant::now());
        let (inbox, events) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            name: name.clone(),
            inbox,
            status,
        };
        rooms.sessions.insert(name.clone(), handle.clone());
        rooms.default_room.get_or_insert_with(|| name.clone());
        drop(rooms);

        let directory = self.clone();
        let inbox = handle.inbox.clone();
        tokio::spawn(async move {
            session.run(events).await;
            directory.remove(&name, &inbox).await;
        });
        info!("Opened session {}", handle.name);
        Ok(handle)
    }

    async fn remove(&self, name: &str, inbox: &mpsc::UnboundedSender<SessionEvent>) {
        let mut rooms = self.rooms.write().await;
        let same = rooms
            .sessions
            .get(name)
            .map_or(false, |handle| handle.inbox.same_channel(inbox));
        if same {
            rooms.sessions.remove(name);
            info!("Removed session {} from directory", name);
        }
        if rooms.sessions.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    pub async fn get(&self, name: &str) -> Option<SessionHandle> {
        self.rooms.read().await.sessions.get(name).cloned()
    }

    /// Finds the session a connection's first message is addressed to.
    pub async fn route(&self, first: &ClientMessage) -> Result<SessionHandle, ReasonCode> {
        let rooms = self.rooms.read().await;
        match first {
            ClientMessage::Hello { session, .. } => {
                let name = session.as_ref().or(rooms.default_room.as_ref());
                name.and_then(|name| rooms.sessions.get(name))
                    .cloned()
                    .ok_or(ReasonCode::NoSuchSession)
            }
            ClientMessage::Rejoin { rejoin_token } => {
                let handle = session_of(rejoin_token).and_then(|name| rooms.sessions.get(name));
                if handle.is_none() {
                    warn!("Rejoin token for an unknown session");
                }
                handle.cloned().ok_or(ReasonCode::InvalidToken)
            }
            _ => Err(ReasonCode::Malformed),
        }
    }

    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.rooms.read().await.sessions.values().cloned().collect()
    }

    pub async fn statuses(&self) -> Vec<SessionStatus> {
        let rooms = self.rooms.read().await;
        let mut statuses: Vec<SessionStatus> = rooms
            .sessions
            .values()
            .map(|handle| handle.status.borrow().clone())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.sessions.is_empty()
    }

    /// Resolves once every session has ended and left the directory.
    pub async fn wait_empty(&self) {
        loop {
            let emptied = self.emptied.notified();
            if self.is_empty().await {
                return;
            }
            emptied.await;
        }
    }

    /// Asks every session to stop.
    pub async fn shutdown(&self) {
        for handle in self.handles().await {
            handle.send(SessionEvent::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::NullRecorder;
    use crate::skirmish::Skirmish;
    use shared::{Phase, Role, PROTOCOL_VERSION};
    use tokio::time::{timeout, Duration};
    use tokio_test::assert_ok;

    fn room(name: &str) -> SessionConfig {
        SessionConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    async fn open(directory: &SessionDirectory, name: &str) -> SessionHandle {
        directory
            .open(room(name), Arc::new(Skirmish::default()), Box::new(NullRecorder))
            .await
            .unwrap()
    }

    fn hello(session: Option<&str>) -> ClientMessage {
        ClientMessage::Hello {
            name: "ana".into(),
            desired_role: Role::Participant,
            desired_slot: None,
            session: session.map(str::to_string),
            client_version: PROTOCOL_VERSION,
        }
    }

    #[tokio::test]
    async fn test_routes_by_name_and_default() {
        let directory = SessionDirectory::new();
        open(&directory, "alpha").await;
        open(&directory, "beta").await;

        assert_eq!(directory.route(&hello(Some("beta"))).await.unwrap().name, "beta");
        assert_eq!(directory.route(&hello(None)).await.unwrap().name, "alpha");
        assert_eq!(
            directory.route(&hello(Some("gamma"))).await.unwrap_err(),
            ReasonCode::NoSuchSession
        );
    }

    #[tokio::test]
    async fn test_routes_rejoin_by_token_prefix() {
        let directory = SessionDirectory::new();
        open(&directory, "alpha").await;
        let token = crate::rejoin::mint_token("alpha");
        let rejoin = ClientMessage::Rejoin {
            rejoin_token: token,
        };
        assert_eq!(directory.route(&rejoin).await.unwrap().name, "alpha");

        let bogus = ClientMessage::Rejoin {
            rejoin_token: "nope".into(),
        };
        assert_eq!(
            directory.route(&bogus).await.unwrap_err(),
            ReasonCode::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_first_message_must_join() {
        let directory = SessionDirectory::new();
        open(&directory, "alpha").await;
        assert_eq!(
            directory.route(&ClientMessage::Resync).await.unwrap_err(),
            ReasonCode::Malformed
        );
    }

    #[tokio::test]
    async fn test_duplicate_names_are_refused() {
        let directory = SessionDirectory::new();
        open(&directory, "alpha").await;
        let again = directory
            .open(room("alpha"), Arc::new(Skirmish::default()), Box::new(NullRecorder))
            .await;
        assert!(matches!(again, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_empties_directory() {
        let directory = SessionDirectory::new();
        open(&directory, "alpha").await;
        let statuses = directory.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].phase, Phase::Lobby);

        directory.shutdown().await;
        assert_ok!(timeout(Duration::from_secs(2), directory.wait_empty()).await);
        assert_eq!(directory.len().await, 0);
    }
}
