//! # Session Client Library
//!
//! Headless client for the session server. It handles the connection, the
//! join handshake and the local mirror of the session state; presentation
//! is left to whoever embeds it.
//!
//! ## State Mirroring
//! WELCOME carries a full snapshot. Every STATE after that is a diff or a
//! full snapshot tagged with a sequence number. Diffs apply only on top of
//! the exact sequence they were computed from, so a missed update shows up
//! as a gap; the mirror then sends RESYNC and waits for a full snapshot.
//! PINGs are answered automatically to keep the connection alive.
//!
//! ## Module Organization
//!
//! - `connection`: [`SessionClient`], TCP connection, HELLO/REJOIN, actions
//! - `mirror`: [`StateMirror`], applying updates and detecting gaps
//! - `browser`: fetching the server list from a master server
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::SessionClient;
//! use shared::Role;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = SessionClient::connect("127.0.0.1:7777").await?;
//!     let slot = client.hello("ana", Role::Participant, None).await?;
//!     println!("seated at slot {slot}");
//!     client.ready(true).await?;
//!     while client.recv().await?.is_some() {
//!         if client.mirror().is_my_turn() {
//!             client.act("end_turn", serde_json::Value::Null).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod connection;
pub mod error;
pub mod mirror;

pub use browser::browse;
pub use connection::SessionClient;
pub use error::ClientError;
pub use mirror::StateMirror;
