//! # Master Server Library
//!
//! Discovery service for session servers. Servers register their address
//! and room metadata, keep the entry alive with heartbeats and unregister
//! when they shut down. Browsing clients ask for the list, either over the
//! framed message protocol (LIST) or the read-only HTTP endpoint, and then
//! connect to a chosen session server directly.
//!
//! ## Trust Boundary
//!
//! Registration is unauthenticated unless a shared secret is configured,
//! in which case REGISTER must carry it. Payloads are bounds-checked and
//! every peer IP gets a request budget; nothing more is verified.
//!
//! ## Module Organization
//!
//! - `registry`: the entry table, heartbeat refresh, reaping and listing
//! - `service`: message-protocol listener and the periodic reaper
//! - `http`: `GET /list` and `GET /healthz`
//! - `security`: per-IP rate limiting, payload checks, shared secret
//! - `config`, `error`: settings and the error taxonomy

pub mod config;
pub mod error;
pub mod http;
pub mod registry;
pub mod security;
pub mod service;

pub use config::MasterConfig;
pub use error::MasterError;
pub use registry::{MasterRegistry, RegistryEntry};
pub use service::MasterService;
