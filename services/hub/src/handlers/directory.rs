//! Server-to-server directory/heartbeat sub-protocol (§4.6). These handlers
//! run on whichever connection a peer happens to use -- the normal chat
//! transports double as the federation transport, per §9 "polymorphism over
//! transports".

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use chathub_core::model::{DiscoveredServer, Session};
use chathub_protocol::{decode_message, encode_message, ChatCodec};
use chathub_protocol::messages;

use crate::error::HandlerError;
use crate::state::{now_ms, AppState};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_LIST_SERVERS_LIMIT: u16 = 500;

/// `LIST_SERVERS`. Returns self as the first entry plus up to `limit <= 500`
/// stored peers (§4.6); an empty list if directory mode is disabled.
pub async fn list_servers(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::ListServers,
) -> Result<(), HandlerError> {
    if !state.config.discovery.directory_enabled {
        session
            .conn
            .write_frame(&encode_message(&messages::ListServersResponse { servers: Vec::new() }))
            .await?;
        return Ok(());
    }

    let limit = msg.limit.clamp(1, MAX_LIST_SERVERS_LIMIT);
    let mut servers = vec![self_server_info(state).await];
    servers.extend(
        state
            .memdb
            .list_discovered_servers(limit as usize)
            .await
            .into_iter()
            .map(|s| messages::ServerInfo {
                hostname: s.hostname,
                port: s.port,
                name: s.name,
                description: s.description,
                user_count: s.user_count,
                max_users: s.max_users,
                uptime_seconds: s.uptime_seconds,
                channel_count: s.channel_count,
                is_public: s.is_public,
            }),
    );

    session
        .conn
        .write_frame(&encode_message(&messages::ListServersResponse { servers }))
        .await?;
    Ok(())
}

async fn self_server_info(state: &Arc<AppState>) -> messages::ServerInfo {
    messages::ServerInfo {
        hostname: state.config.discovery.public_hostname.clone().unwrap_or_default(),
        port: state.config.server.tcp_port,
        name: state.config.discovery.server_name.clone(),
        description: state.config.discovery.server_description.clone(),
        user_count: state.sessions.count_online_users().await as u32,
        max_users: state.config.discovery.max_users,
        uptime_seconds: state.uptime_seconds(now_ms()),
        channel_count: state.memdb.count_channels().await as u32,
        is_public: true,
    }
}

/// `REGISTER_SERVER`. Rate-limited per source IP (§4.6: 30/hour sliding
/// window); accepted registrations are verified out-of-band by dialing the
/// advertised `hostname:port` back with a random challenge before they are
/// added to the directory, so a registrant can't claim a hostname it
/// doesn't control.
pub async fn register_server(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::RegisterServer,
) -> Result<(), HandlerError> {
    let ip = session
        .remote_addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(&session.remote_addr)
        .parse()
        .unwrap_or(std::net::IpAddr::from([0, 0, 0, 0]));

    let now = now_ms();
    if !state.register_rate_limiter.check_and_record(ip, now).await {
        session
            .conn
            .write_frame(&encode_message(&messages::RegisterAck {
                success: false,
                message: "rate limit exceeded".to_owned(),
            }))
            .await?;
        return Ok(());
    }

    // Not persisted yet -- the async dial-back challenge below still has to
    // succeed first, and no second ACK follows it (§4.6: "No second ACK is
    // sent; the remote obtains its state by sending HEARTBEAT").
    session
        .conn
        .write_frame(&encode_message(&messages::RegisterAck {
            success: false,
            message: "Verification in progress".to_owned(),
        }))
        .await?;

    state
        .directory_registrations
        .write()
        .await
        .insert(session.id, (msg.hostname.clone(), msg.port));

    let state = state.clone();
    tokio::spawn(async move {
        verify_and_register(state, msg).await;
    });
    Ok(())
}

async fn verify_and_register(state: Arc<AppState>, msg: messages::RegisterServer) {
    let challenge: u64 = rand::thread_rng().gen();
    let now = now_ms();
    state
        .pending_challenges
        .issue(msg.hostname.clone(), msg.port, challenge, now)
        .await;

    let addr = format!("{}:{}", msg.hostname, msg.port);
    let dial = tokio::time::timeout(VERIFY_TIMEOUT, TcpStream::connect(&addr)).await;
    let Ok(Ok(stream)) = dial else {
        tracing::warn!(%addr, "directory verification dial failed");
        return;
    };
    let mut framed = Framed::new(stream, ChatCodec);

    use futures_util::{SinkExt, StreamExt};
    if framed
        .send(encode_message(&messages::VerifyRegistration { challenge }))
        .await
        .is_err()
    {
        return;
    }

    let Ok(Some(Ok(frame))) = tokio::time::timeout(VERIFY_TIMEOUT, framed.next()).await else {
        tracing::warn!(%addr, "directory verification timed out");
        return;
    };

    let Ok(response) = decode_message::<messages::VerifyResponse>(&frame) else {
        return;
    };

    let verified = state
        .pending_challenges
        .verify_and_clear(&msg.hostname, msg.port, response.challenge)
        .await;
    if !verified {
        tracing::warn!(%addr, "directory verification challenge mismatch");
        return;
    }

    state
        .memdb
        .upsert_discovered_server(DiscoveredServer {
            hostname: msg.hostname,
            port: msg.port,
            name: msg.name,
            description: msg.description,
            user_count: 0,
            max_users: msg.max_users,
            uptime_seconds: 0,
            channel_count: 0,
            is_public: msg.is_public,
            last_heartbeat_at: now_ms(),
            heartbeat_interval: chathub_core::directory::heartbeat_interval_secs(
                state.memdb.list_discovered_servers(usize::MAX).await.len(),
            ),
        })
        .await;
}

/// `VERIFY_REGISTRATION`. Arrives on a connection some other directory
/// dialed back to confirm this hub really controls the hostname it
/// registered; the only correct response is to echo the challenge.
pub async fn verify_registration(
    session: &Arc<Session>,
    msg: messages::VerifyRegistration,
) -> Result<(), HandlerError> {
    session
        .conn
        .write_frame(&encode_message(&messages::VerifyResponse {
            challenge: msg.challenge,
        }))
        .await?;
    Ok(())
}

/// `HEARTBEAT`. Updates the sender's stored counters and recomputes the
/// heartbeat interval from the current directory population, returning it in
/// `HEARTBEAT_ACK` (§4.6). The sender is identified by the `(hostname, port)`
/// it gave us in the `REGISTER_SERVER` it sent earlier on this connection;
/// a heartbeat from a connection that never registered (or whose
/// registration hasn't been verified yet) just gets the recomputed interval
/// back with nothing to update.
pub async fn heartbeat(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::Heartbeat,
) -> Result<(), HandlerError> {
    let count = state.memdb.list_discovered_servers(usize::MAX).await.len();
    let interval = chathub_core::directory::heartbeat_interval_secs(count);

    let registration = state.directory_registrations.read().await.get(&session.id).cloned();
    if let Some((hostname, port)) = registration {
        if let Some(mut server) = state.memdb.get_discovered_server(&hostname, port).await {
            server.user_count = msg.user_count;
            server.max_users = msg.max_users;
            server.uptime_seconds = msg.uptime_seconds;
            server.channel_count = msg.channel_count;
            server.last_heartbeat_at = now_ms();
            server.heartbeat_interval = interval;
            state.memdb.upsert_discovered_server(server).await;
        }
    }
    session
        .conn
        .write_frame(&encode_message(&messages::HeartbeatAck {
            interval_secs: interval,
        }))
        .await?;
    Ok(())
}
