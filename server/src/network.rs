//! Server network layer: TCP accept loop and per-connection pumps
//!
//! Each accepted socket gets a reader (this task) and a writer task. The
//! reader waits for HELLO or REJOIN, asks the directory which session the
//! connection belongs to, then forwards every decoded frame to that
//! session's queue. The writer drains the connection's outbound queue;
//! when the session drops its end of the queue the writer flushes what is
//! left and closes the socket.

use crate::directory::SessionDirectory;
use crate::error::ServerError;
use crate::registry::ConnId;
use crate::security::BanList;
use crate::session::{CloseReason, SessionEvent};
use log::{debug, error, info, warn};
use shared::framing::{read_message, write_message};
use shared::{ClientMessage, ProtocolError, ReasonCode, ServerMessage};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{sleep, timeout, Duration};

/// Time allowed between accept and the first HELLO/REJOIN.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Listening socket plus everything a connection task needs
pub struct Server {
    listener: TcpListener,
    directory: SessionDirectory,
    bans: Arc<RwLock<BanList>>,
    next_conn: Arc<AtomicU64>,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        directory: SessionDirectory,
        bans: BanList,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Server {
            listener,
            directory,
            bans: Arc::new(RwLock::new(bans)),
            next_conn: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn bans(&self) -> Arc<RwLock<BanList>> {
        Arc::clone(&self.bans)
    }

    /// Accepts connections until the listener fails permanently
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
                    let directory = self.directory.clone();
                    let bans = Arc::clone(&self.bans);
                    tokio::spawn(async move {
                        handle_connection(stream, addr, conn, directory, bans).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn: ConnId,
    directory: SessionDirectory,
    bans: Arc<RwLock<BanList>>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {}: {}", addr, e);
    }
    let (mut reader, mut writer) = stream.into_split();

    if bans.read().await.is_banned(addr.ip()) {
        warn!("Refusing banned peer {}", addr);
        let _ = write_message(&mut writer, &ServerMessage::reject(ReasonCode::Banned)).await;
        return;
    }

    let first = match handshake(&mut reader, &mut writer).await {
        Ok(Some(first)) => first,
        Ok(None) => return,
        Err(e) => {
            warn!("Connection {} from {} failed handshake: {}", conn, addr, e);
            let _ = write_message(&mut writer, &ServerMessage::reject(ReasonCode::Malformed)).await;
            return;
        }
    };

    let session = match directory.route(&first).await {
        Ok(session) => session,
        Err(code) => {
            info!("Connection {} from {} not routed: {}", conn, addr, code);
            let _ = write_message(&mut writer, &ServerMessage::reject(code)).await;
            return;
        }
    };

    let inbox = session.inbox.clone();
    let (outbound, queue) = mpsc::unbounded_channel();
    let mut writer_task = tokio::spawn(write_loop(writer, queue, conn, inbox.clone()));

    if !session.send(SessionEvent::Attach {
        conn,
        addr,
        outbound,
        first,
    }) {
        debug!("Session {} closed before connection {} attached", session.name, conn);
        return;
    }

    let reason = loop {
        tokio::select! {
            frame = read_message::<ClientMessage, _>(&mut reader) => {
                match frame {
                    Ok(Some(message)) => {
                        if inbox.send(SessionEvent::Message { conn, message }).is_err() {
                            break None;
                        }
                    }
                    Ok(None) => break Some(CloseReason::Eof),
                    Err(e) => break Some(CloseReason::Protocol(e.to_string())),
                }
            },
            // The session closed this connection (or the socket failed).
            _ = &mut writer_task => break None,
        }
    };

    if let Some(reason) = reason {
        let _ = inbox.send(SessionEvent::Closed { conn, reason });
    }
}

/// Waits for the message that joins a session, answering PINGs meanwhile.
async fn handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
) -> Result<Option<ClientMessage>, ProtocolError> {
    loop {
        let message = match timeout(HANDSHAKE_TIMEOUT, read_message::<ClientMessage, _>(reader)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no HELLO or REJOIN received",
                )))
            }
        };
        match message {
            None => return Ok(None),
            Some(ClientMessage::Ping { timestamp }) => {
                write_message(writer, &ServerMessage::Pong { timestamp }).await?;
            }
            Some(first @ (ClientMessage::Hello { .. } | ClientMessage::Rejoin { .. })) => {
                return Ok(Some(first))
            }
            Some(other) => return Err(ProtocolError::Unexpected(other.kind())),
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<ServerMessage>,
    conn: ConnId,
    inbox: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(message) = queue.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            let _ = inbox.send(SessionEvent::Closed {
                conn,
                reason: CloseReason::WriteFailed(e.to_string()),
            });
            return;
        }
    }
    let _ = writer.shutdown().await;
}
