//! SSH transport (§4: "Transport listeners", §4.6). Unlike TCP and
//! WebSocket, `russh` drives the connection through callbacks rather than an
//! `AsyncRead`/`AsyncWrite` pair, so this adapter buffers inbound bytes itself
//! and calls [`crate::dispatch::dispatch_frame`] directly instead of going
//! through [`crate::dispatch::run_frame_loop`].
//!
//! Public-key auth here is a stand-in: any presented key is accepted and
//! logged, never checked against a registry (see DESIGN.md). The `session`
//! channel is the only one served; `shell`, `pty-req`, `env`, and
//! `window-change` requests are acknowledged so well-behaved SSH clients
//! don't hang, but otherwise ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use russh::server::{Auth, Handle, Msg, Server as RusshServer, Session as RusshSession};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use chathub_protocol::Frame;

use chathub_core::model::{ByteSink, Session as ChatSession, Transport};

use crate::dispatch::{dispatch_frame, send_error, send_server_config};
use crate::error::HandlerError;
use crate::state::AppState;

/// Wraps the `russh` channel handle so writes from both the connection
/// callback and the broadcaster funnel through one mutex, matching the
/// per-connection write discipline the other two transports observe.
struct SshByteSink {
    handle: AsyncMutex<Handle>,
    channel: ChannelId,
}

#[async_trait::async_trait]
impl ByteSink for SshByteSink {
    async fn write_frame(&self, frame: &Frame) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        frame
            .write(&mut buf)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let handle = self.handle.lock().await;
        handle
            .data(self.channel, CryptoVec::from_slice(&buf))
            .await
            .map_err(|_| std::io::Error::other("ssh channel closed"))
    }

    async fn close(&self) {
        let handle = self.handle.lock().await;
        let _ = handle.close(self.channel).await;
    }
}

/// Per-connection `russh` handler. One instance is created per client by
/// [`SshServer::new_client`] and lives for the life of the connection.
pub struct SshHandler {
    state: Arc<AppState>,
    remote_addr: String,
    session: Option<Arc<ChatSession>>,
    inbound: BytesMut,
}

#[async_trait::async_trait]
impl russh::server::Handler for SshHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        info!(user, fingerprint = %public_key.fingerprint(), "ssh public key presented (unverified)");
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        let sink = SshByteSink {
            handle: AsyncMutex::new(session.handle()),
            channel: channel.id(),
        };
        let chat_session = self
            .state
            .create_session(self.remote_addr.clone(), Transport::Ssh, Box::new(sink))
            .await;
        info!(session_id = chat_session.id, "ssh session established");

        let state = self.state.clone();
        let greet = chat_session.clone();
        tokio::spawn(async move {
            let _ = send_server_config(&greet, &state).await;
        });

        self.session = Some(chat_session);
        Ok(true)
    }

    async fn data(&mut self, _channel: ChannelId, data: &[u8], _session: &mut RusshSession) -> Result<(), Self::Error> {
        self.inbound.extend_from_slice(data);
        let Some(chat_session) = self.session.clone() else {
            return Ok(());
        };

        loop {
            match Frame::try_parse(&mut self.inbound) {
                Ok(Some(frame)) => match dispatch_frame(&self.state, &chat_session, frame).await {
                    Ok(()) => {}
                    Err(HandlerError::ClientDisconnecting) => {
                        self.state.sessions.remove_session(chat_session.id).await;
                        self.session = None;
                        break;
                    }
                    Err(err) => {
                        let (code, message) = err.wire_code();
                        if send_error(&chat_session, code, message).await.is_err() {
                            self.state.sessions.remove_session(chat_session.id).await;
                            self.session = None;
                            break;
                        }
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "malformed frame on ssh channel, dropping connection");
                    self.state.sessions.remove_session(chat_session.id).await;
                    self.session = None;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut RusshSession) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn channel_close(&mut self, _channel: ChannelId, _session: &mut RusshSession) -> Result<(), Self::Error> {
        if let Some(chat_session) = self.session.take() {
            self.state.sessions.remove_session(chat_session.id).await;
        }
        Ok(())
    }

    async fn channel_eof(&mut self, _channel: ChannelId, _session: &mut RusshSession) -> Result<(), Self::Error> {
        if let Some(chat_session) = self.session.take() {
            self.state.sessions.remove_session(chat_session.id).await;
        }
        Ok(())
    }
}

/// Factory handed to `russh::server::run`; one [`SshHandler`] per accepted
/// connection (§9 "Polymorphism over transports").
#[derive(Clone)]
pub struct SshServer {
    state: Arc<AppState>,
}

impl RusshServer for SshServer {
    type Handler = SshHandler;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> SshHandler {
        SshHandler {
            state: self.state.clone(),
            remote_addr: addr.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_owned()),
            session: None,
            inbound: BytesMut::new(),
        }
    }
}

/// Runs the SSH listener until the process is killed. `russh::server::run`
/// has no cooperative shutdown hook, so unlike the TCP/WS listeners this one
/// is not wired to `AppState`'s shutdown watch channel; it is expected to be
/// dropped along with the rest of the process on exit.
pub async fn serve(state: Arc<AppState>, bind_addr: SocketAddr, host_key: KeyPair) {
    let config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });
    let server = SshServer { state };
    if let Err(err) = russh::server::run(config, bind_addr, server).await {
        warn!(error = %err, "ssh server exited");
    }
}
