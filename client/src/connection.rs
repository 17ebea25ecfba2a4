use crate::error::ClientError;
use crate::mirror::StateMirror;
use log::{debug, info};
use serde_json::Value;
use shared::framing::{read_message, write_message};
use shared::{ClientMessage, Role, ServerMessage, PROTOCOL_VERSION};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};

/// How long `hello`/`rejoin` wait for WELCOME.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One TCP connection to a session server plus the mirrored state.
pub struct SessionClient {
    stream: TcpStream,
    mirror: StateMirror,
}

impl SessionClient {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(Self {
            stream,
            mirror: StateMirror::new(),
        })
    }

    pub fn mirror(&self) -> &StateMirror {
        &self.mirror
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        write_message(&mut self.stream, message).await?;
        Ok(())
    }

    /// Reads the next server message, folds it into the mirror and sends
    /// any automatic reply. `Ok(None)` means the server closed the stream.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        let Some(message) = read_message::<ServerMessage, _>(&mut self.stream).await? else {
            return Ok(None);
        };
        if let Some(reply) = self.mirror.observe(&message) {
            debug!("Auto-reply {}", reply.kind());
            self.send(&reply).await?;
        }
        Ok(Some(message))
    }

    /// Receives until `matches` accepts a message or `limit` passes.
    pub async fn wait_for<F>(
        &mut self,
        limit: Duration,
        what: &'static str,
        mut matches: F,
    ) -> Result<ServerMessage, ClientError>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.recv()).await {
                Ok(Ok(Some(message))) if matches(&message) => return Ok(message),
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => return Err(ClientError::Closed),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ClientError::Timeout(what)),
            }
        }
    }

    async fn await_welcome(&mut self) -> Result<u8, ClientError> {
        let reply = self
            .wait_for(JOIN_TIMEOUT, "WELCOME", |m| {
                matches!(m, ServerMessage::Welcome { .. } | ServerMessage::Reject { .. })
            })
            .await?;
        match reply {
            ServerMessage::Welcome { slot, .. } => Ok(slot),
            ServerMessage::Reject { reason_code, .. } => Err(ClientError::Rejected(reason_code)),
            _ => Err(ClientError::Closed),
        }
    }

    /// Sends HELLO and waits for the seat.
    pub async fn hello(
        &mut self,
        name: &str,
        role: Role,
        session: Option<&str>,
    ) -> Result<u8, ClientError> {
        self.send(&ClientMessage::Hello {
            name: name.to_string(),
            desired_role: role,
            desired_slot: None,
            session: session.map(str::to_string),
            client_version: PROTOCOL_VERSION,
        })
        .await?;
        self.await_welcome().await
    }

    /// Opens a new connection and reclaims a slot with a rejoin token.
    pub async fn rejoin(addr: &str, rejoin_token: &str) -> Result<Self, ClientError> {
        let mut client = Self::connect(addr).await?;
        client
            .send(&ClientMessage::Rejoin {
                rejoin_token: rejoin_token.to_string(),
            })
            .await?;
        client.await_welcome().await?;
        Ok(client)
    }

    /// Sends an ACTION for our slot at the currently held sequence.
    pub async fn act(&mut self, action_type: &str, payload: Value) -> Result<(), ClientError> {
        let slot = self.mirror.slot.ok_or(ClientError::NotJoined)?;
        let sequence = self.mirror.sequence();
        self.send(&ClientMessage::Action {
            slot,
            sequence,
            action_type: action_type.to_string(),
            action_payload: payload,
        })
        .await
    }

    pub async fn ready(&mut self, ready: bool) -> Result<(), ClientError> {
        self.send(&ClientMessage::Ready { ready }).await
    }

    pub async fn pause_vote(&mut self, vote: bool) -> Result<(), ClientError> {
        self.send(&ClientMessage::PauseVote { vote }).await
    }

    pub async fn chat(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::Chat {
            text: text.to_string(),
        })
        .await
    }

    pub async fn leave(mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Leave).await
    }
}
