//! # Session Server Library
//!
//! This library provides the authoritative server for turn-based online
//! matches. It owns the canonical session state, accepts client actions over
//! TCP, validates and applies them through a pluggable rule engine, and
//! broadcasts the resulting state to every connected participant and
//! spectator.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! Each session's state (game document, round/turn pointer, RNG state) is
//! owned by exactly one match loop task. Connections never touch it; they
//! feed the match loop through a per-session queue, so all mutation happens
//! in one serialized context without locks.
//!
//! ### Connection Lifecycle
//! - Slot assignment for participants and spectators
//! - Rejoin tokens and disconnect grace periods
//! - Liveness checks driven by PING/PONG traffic
//! - Ban list and per-connection rate limiting
//!
//! ### State Broadcasting
//! Every accepted action produces a STATE message carrying either a diff
//! against the previous state or a full snapshot. Full snapshots are forced
//! periodically, on rejoin, and whenever a diff would be larger than the
//! snapshot itself. Sequence numbers let clients detect gaps and RESYNC.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Connection table and slot seating: who is connected, which slot they
//! hold, ready flags, spectators, reserved (grace) slots.
//!
//! ### Rejoin Module (`rejoin`)
//! Mints, redeems and revokes rejoin tokens; tracks grace deadlines.
//!
//! ### Validator and Rules Modules (`validator`, `rules`, `skirmish`)
//! The pure action validator, the rule engine contract it calls into, and
//! the built-in grid skirmish engine.
//!
//! ### Session Module (`session`)
//! The match loop state machine: lobby, running, paused, ended; turn
//! order; pause votes; broadcast policy.
//!
//! ### Directory and Network Modules (`directory`, `network`)
//! Named rooms hosted by one process, and the TCP accept loop with its
//! per-connection reader and writer tasks.
//!
//! ### Replay and Heartbeat Modules (`replay`, `heartbeat`)
//! Fire-and-forget replay logging and master server registration.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, SessionConfig, SessionDirectory};
//! use server::replay::NullRecorder;
//! use server::security::BanList;
//! use server::skirmish::Skirmish;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = SessionDirectory::new();
//!     directory
//!         .open(
//!             SessionConfig::default(),
//!             Arc::new(Skirmish::default()),
//!             Box::new(NullRecorder),
//!         )
//!         .await?;
//!
//!     let server = Server::bind("127.0.0.1:7777".parse()?, directory, BanList::in_memory()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod heartbeat;
pub mod network;
pub mod registry;
pub mod rejoin;
pub mod replay;
pub mod rules;
pub mod security;
pub mod session;
pub mod skirmish;
pub mod validator;

pub use config::{ServerConfig, SessionConfig};
pub use directory::{SessionDirectory, SessionHandle};
pub use error::ServerError;
pub use network::Server;
pub use rules::{Action, RuleEngine, RuleOutcome};
pub use session::{Session, SessionStatus};
