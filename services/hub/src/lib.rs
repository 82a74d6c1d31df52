//! The `hub` binary crate: transport listeners, protocol dispatch, message
//! handlers, and the background maintenance tasks that sit around
//! `chathub-core`'s in-memory model (§2, §4).

pub mod config;
pub mod db;
pub mod directory_client;
pub mod dispatch;
pub mod durable_pg;
pub mod error;
pub mod handlers;
pub mod state;
pub mod transport;

use std::sync::Arc;

use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub use state::AppState;

/// The WebSocket upgrade route (§4: "Transport listeners"). Plain TCP and
/// SSH bind their own listeners directly in `main`; WebSocket rides on an
/// axum router since upgrade negotiation is HTTP.
pub fn build_ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        transport::ws::handle_socket(state, socket, addr.to_string()).await;
    })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}
