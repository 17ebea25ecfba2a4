//! Read-only HTTP listing.
//!
//! `GET /list` returns the JSON array of `{address, player_count, capacity,
//! metadata}` rows, optionally filtered by `mode`, `region`, `build` and
//! capped by `limit`. `GET /healthz` reports liveness and the entry count.

use crate::error::MasterError;
use crate::registry::MasterRegistry;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde_json::{json, Value};
use shared::{ListFilter, ServerListing};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::time::Instant;

type SharedRegistry = Arc<RwLock<MasterRegistry>>;

pub fn router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/list", get(list))
        .route("/healthz", get(health))
        .with_state(registry)
}

async fn list(
    State(registry): State<SharedRegistry>,
    Query(filter): Query<ListFilter>,
) -> Json<Vec<ServerListing>> {
    Json(registry.read().await.list(&filter, Instant::now()))
}

async fn health(State(registry): State<SharedRegistry>) -> Json<Value> {
    let servers = registry.read().await.len();
    Json(json!({ "status": "ok", "servers": servers }))
}

pub async fn serve(listener: TcpListener, registry: SharedRegistry) -> Result<(), MasterError> {
    info!("HTTP listing on http://{}/list", listener.local_addr()?);
    axum::serve(listener, router(registry)).await?;
    Ok(())
}
