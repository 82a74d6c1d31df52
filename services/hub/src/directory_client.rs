//! Outbound half of the directory sub-protocol (§4.6 "as client"): register
//! this server with each configured directory, then heartbeat at the
//! interval the directory hands back, reconnecting with a 60 s back-off on
//! any error. `hub::handlers::directory` is the host side of the same
//! sub-protocol; this module is the only place the server dials out to a
//! peer rather than answering an inbound connection.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use chathub_protocol::messages;
use chathub_protocol::{decode_message, encode_message, ChatCodec};

use crate::state::AppState;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(60);

/// Spawns one maintenance task per configured directory address. No-op if
/// discovery is disabled or no directories are configured.
pub fn spawn_all(state: Arc<AppState>) {
    if !state.config.discovery.directory_enabled {
        return;
    }
    for addr in state.config.discovery.directory_addresses.clone() {
        let state = state.clone();
        tokio::spawn(async move {
            maintain(state, addr).await;
        });
    }
}

/// True if `hostname` can only ever resolve to a loopback address, meaning
/// announcing it to a remote directory would be pointless (§4.6 "the client
/// verifies it is not listening on loopback only").
fn is_loopback_only(hostname: &str) -> bool {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return ip.is_loopback();
    }
    hostname.eq_ignore_ascii_case("localhost")
}

/// Registers with `directory_addr`, then heartbeats forever, reconnecting
/// after `RECONNECT_BACKOFF` whenever the dial, the verify challenge, or a
/// heartbeat fails. Runs until the process exits; there is no cooperative
/// shutdown hook for this loop because a directory connection carries no
/// client state worth draining cleanly.
async fn maintain(state: Arc<AppState>, directory_addr: String) {
    loop {
        if let Err(err) = register_and_heartbeat(&state, &directory_addr).await {
            warn!(directory = %directory_addr, error = %err, "directory client session ended, backing off");
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn register_and_heartbeat(state: &Arc<AppState>, directory_addr: &str) -> Result<(), String> {
    let hostname = state
        .config
        .discovery
        .public_hostname
        .clone()
        .ok_or_else(|| "discovery.public_hostname is not configured".to_owned())?;

    if is_loopback_only(&hostname) {
        warn!(%hostname, "refusing to announce a loopback-only hostname to the directory");
        return Err("public_hostname resolves to loopback".to_owned());
    }

    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(directory_addr))
        .await
        .map_err(|_| "dial timed out".to_owned())?
        .map_err(|e| e.to_string())?;
    let mut framed = Framed::new(stream, ChatCodec);

    use futures_util::{SinkExt, StreamExt};

    framed
        .send(encode_message(&messages::RegisterServer {
            hostname,
            port: state.config.server.tcp_port,
            name: state.config.discovery.server_name.clone(),
            description: state.config.discovery.server_description.clone(),
            max_users: state.config.discovery.max_users,
            is_public: true,
        }))
        .await
        .map_err(|e| e.to_string())?;

    // The host immediately ACKs "verification pending" and then dials us
    // back out-of-band with VERIFY_REGISTRATION -- not on this connection.
    // We still drain the ack frame so the socket doesn't wedge on a buffered
    // write, but its content is not load-bearing here.
    let _ = timeout(VERIFY_TIMEOUT, framed.next()).await;

    info!(%directory_addr, "registered with directory, entering heartbeat loop");

    let mut interval_secs: u32 = chathub_core::directory::heartbeat_interval_secs(0);
    loop {
        tokio::time::sleep(Duration::from_secs(interval_secs as u64)).await;

        let count = state.sessions.count_online_users().await as u32;
        framed
            .send(encode_message(&messages::Heartbeat {
                user_count: count,
                max_users: state.config.discovery.max_users,
                uptime_seconds: state.uptime_seconds(crate::state::now_ms()),
                channel_count: state.memdb.count_channels().await as u32,
            }))
            .await
            .map_err(|e| e.to_string())?;

        let frame = timeout(VERIFY_TIMEOUT, framed.next())
            .await
            .map_err(|_| "heartbeat ack timed out".to_owned())?
            .ok_or_else(|| "directory closed the connection".to_owned())?
            .map_err(|e| e.to_string())?;
        let ack = decode_message::<messages::HeartbeatAck>(&frame).map_err(|e| e.to_string())?;
        interval_secs = ack.interval_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_ip_and_localhost_are_rejected() {
        assert!(is_loopback_only("127.0.0.1"));
        assert!(is_loopback_only("::1"));
        assert!(is_loopback_only("localhost"));
        assert!(is_loopback_only("LOCALHOST"));
    }

    #[test]
    fn public_hostnames_are_accepted() {
        assert!(!is_loopback_only("chat.example.com"));
        assert!(!is_loopback_only("203.0.113.7"));
    }
}
