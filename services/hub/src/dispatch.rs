//! Per-session frame dispatch (§4.5). One connection task per transport
//! drives a `Framed`/byte-buffer loop and calls [`dispatch_frame`] for every
//! decoded frame; this module only holds the routing and state-machine
//! checks, not the transport plumbing.

use std::sync::Arc;

use chathub_protocol::messages::{self, error_code, msg_type};
use chathub_protocol::{decode_message, encode_message, Frame, ProtocolError};

use chathub_core::model::Session;

use crate::error::HandlerError;
use crate::handlers;
use crate::state::AppState;

/// Derived from [`chathub_core::model::SessionState`] rather than tracked
/// separately: `user_id` set means AUTHENTICATED, a non-empty nickname with
/// no `user_id` means NAMED, and otherwise CONNECTED (§4.5 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnState {
    Connected,
    Named,
    Authenticated,
}

pub async fn connection_state(session: &Arc<Session>) -> ConnState {
    let state = session.state.read().await;
    if state.user_id.is_some() {
        ConnState::Authenticated
    } else if !state.nickname.is_empty() {
        ConnState::Named
    } else {
        ConnState::Connected
    }
}

async fn send(session: &Arc<Session>, frame: Frame) -> Result<(), HandlerError> {
    session.conn.write_frame(&frame).await?;
    Ok(())
}

pub async fn send_error(session: &Arc<Session>, code: u16, message: impl Into<String>) -> Result<(), HandlerError> {
    send(
        session,
        encode_message(&messages::ErrorMsg {
            code,
            message: message.into(),
        }),
    )
    .await
}

pub async fn send_server_config(session: &Arc<Session>, state: &AppState) -> Result<(), HandlerError> {
    send(
        session,
        encode_message(&messages::ServerConfig {
            max_message_length: state.config.limits.max_message_length as u32,
            max_nickname_length: state.config.limits.max_nickname_length as u32,
            server_name: state.config.discovery.server_name.clone(),
            motd: String::new(),
        }),
    )
    .await
}

/// Dispatches one already-decoded frame. Malformed payloads and unknown
/// types are handled here (§7 protocol errors); everything else is routed
/// to a handler in [`crate::handlers`].
pub async fn dispatch_frame(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    frame: Frame,
) -> Result<(), HandlerError> {
    let conn_state = connection_state(session).await;

    macro_rules! decode_or_invalid {
        ($ty:ty) => {
            match decode_message::<$ty>(&frame) {
                Ok(m) => m,
                Err(_) => {
                    send_error(session, error_code::INVALID_FORMAT, "Invalid message format").await?;
                    return Ok(());
                }
            }
        };
    }

    match frame.msg_type {
        msg_type::SET_NICKNAME => {
            let msg = decode_or_invalid!(messages::SetNickname);
            handlers::nickname::set_nickname(state, session, msg).await
        }
        msg_type::LIST_CHANNELS => {
            let _msg = decode_or_invalid!(messages::ListChannels);
            handlers::channel::list_channels(state, session).await
        }
        msg_type::JOIN_CHANNEL => {
            if conn_state == ConnState::Connected {
                return send(
                    session,
                    encode_message(&messages::JoinResponse {
                        success: false,
                        message: "nickname required".to_owned(),
                        channel_id: 0,
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::JoinChannel);
            handlers::channel::join_channel(state, session, msg).await
        }
        msg_type::LEAVE_CHANNEL => {
            if conn_state == ConnState::Connected {
                return send(
                    session,
                    encode_message(&messages::LeaveResponse {
                        success: false,
                        message: "nickname required".to_owned(),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::LeaveChannel);
            handlers::channel::leave_channel(state, session, msg).await
        }
        msg_type::LIST_MESSAGES => {
            let msg = decode_or_invalid!(messages::ListMessages);
            handlers::message::list_messages(state, session, msg).await
        }
        msg_type::POST_MESSAGE => {
            if conn_state == ConnState::Connected {
                return send(
                    session,
                    encode_message(&messages::MessagePosted {
                        success: false,
                        message_id: 0,
                        error: Some("nickname required".to_owned()),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::PostMessage);
            handlers::message::post_message(state, session, msg).await
        }
        msg_type::DELETE_MESSAGE => {
            if conn_state == ConnState::Connected {
                return send(
                    session,
                    encode_message(&messages::AdminResponse {
                        success: false,
                        message: "nickname required".to_owned(),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::DeleteMessage);
            handlers::message::delete_message(state, session, msg).await
        }
        msg_type::EDIT_MESSAGE => {
            if conn_state != ConnState::Authenticated {
                return send(
                    session,
                    encode_message(&messages::EditResponse {
                        success: false,
                        message_id: 0,
                        error: Some("authentication required".to_owned()),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::EditMessage);
            handlers::message::edit_message(state, session, msg).await
        }
        msg_type::PING => {
            let _msg = decode_or_invalid!(messages::Ping);
            Ok(())
        }
        msg_type::DISCONNECT => {
            let _msg = decode_or_invalid!(messages::Disconnect);
            Err(HandlerError::ClientDisconnecting)
        }
        msg_type::REGISTER_USER => {
            // Gated at NAMED rather than AUTHENTICATED; see DESIGN.md
            // "Explicit requirement deviations" for why.
            if conn_state == ConnState::Connected {
                return send(
                    session,
                    encode_message(&messages::RegisterResponse {
                        success: false,
                        message: "nickname required".to_owned(),
                        user_id: None,
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::RegisterUser);
            handlers::auth::register_user(state, session, msg).await
        }
        msg_type::AUTH => {
            if conn_state == ConnState::Connected {
                return send(
                    session,
                    encode_message(&messages::AuthResponse {
                        success: false,
                        message: "nickname required".to_owned(),
                        user_id: None,
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::Auth);
            handlers::auth::authenticate(state, session, msg).await
        }
        msg_type::LOGOUT => {
            if conn_state != ConnState::Authenticated {
                return send(
                    session,
                    encode_message(&messages::AuthResponse {
                        success: false,
                        message: "not authenticated".to_owned(),
                        user_id: None,
                    }),
                )
                .await;
            }
            let _msg = decode_or_invalid!(messages::Logout);
            handlers::auth::logout(state, session).await
        }
        msg_type::CREATE_CHANNEL => {
            if conn_state != ConnState::Authenticated {
                return send(
                    session,
                    encode_message(&messages::AdminResponse {
                        success: false,
                        message: "authentication required".to_owned(),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::CreateChannel);
            handlers::channel::create_channel(state, session, msg).await
        }
        msg_type::DELETE_CHANNEL => {
            // Not explicitly named in the AUTHENTICATED-gated list; treated
            // as an admin op since it is destructive and channel-wide.
            if !is_admin_authenticated(session).await {
                return send(
                    session,
                    encode_message(&messages::AdminResponse {
                        success: false,
                        message: "permission denied".to_owned(),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::DeleteChannel);
            handlers::channel::delete_channel(state, session, msg).await
        }
        msg_type::ADMIN_BAN => {
            if !is_admin_authenticated(session).await {
                return send(
                    session,
                    encode_message(&messages::AdminResponse {
                        success: false,
                        message: "permission denied".to_owned(),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::AdminBan);
            handlers::admin::ban(state, session, msg).await
        }
        msg_type::ADMIN_UNBAN => {
            if !is_admin_authenticated(session).await {
                return send(
                    session,
                    encode_message(&messages::AdminResponse {
                        success: false,
                        message: "permission denied".to_owned(),
                    }),
                )
                .await;
            }
            let msg = decode_or_invalid!(messages::AdminUnban);
            handlers::admin::unban(state, session, msg).await
        }
        msg_type::SUBSCRIBE_THREAD => {
            if conn_state == ConnState::Connected {
                return send_error(session, error_code::NICKNAME_REQUIRED, "nickname required").await;
            }
            let msg = decode_or_invalid!(messages::SubscribeThread);
            handlers::subscribe::subscribe_thread(state, session, msg).await
        }
        msg_type::UNSUBSCRIBE_THREAD => {
            let msg = decode_or_invalid!(messages::UnsubscribeThread);
            handlers::subscribe::unsubscribe_thread(state, session, msg).await
        }
        msg_type::SUBSCRIBE_CHANNEL => {
            if conn_state == ConnState::Connected {
                return send_error(session, error_code::NICKNAME_REQUIRED, "nickname required").await;
            }
            let msg = decode_or_invalid!(messages::SubscribeChannel);
            handlers::subscribe::subscribe_channel(state, session, msg).await
        }
        msg_type::UNSUBSCRIBE_CHANNEL => {
            let msg = decode_or_invalid!(messages::UnsubscribeChannel);
            handlers::subscribe::unsubscribe_channel(state, session, msg).await
        }
        msg_type::LIST_SERVERS => {
            let msg = decode_or_invalid!(messages::ListServers);
            handlers::directory::list_servers(state, session, msg).await
        }
        msg_type::REGISTER_SERVER => {
            let msg = decode_or_invalid!(messages::RegisterServer);
            handlers::directory::register_server(state, session, msg).await
        }
        msg_type::VERIFY_REGISTRATION => {
            let msg = decode_or_invalid!(messages::VerifyRegistration);
            handlers::directory::verify_registration(session, msg).await
        }
        msg_type::HEARTBEAT => {
            let msg = decode_or_invalid!(messages::Heartbeat);
            handlers::directory::heartbeat(state, session, msg).await
        }
        _ => send_error(session, error_code::UNSUPPORTED_TYPE, "Unsupported message type").await,
    }
}

async fn is_admin_authenticated(session: &Arc<Session>) -> bool {
    let state = session.state.read().await;
    state.user_id.is_some() && state.user_flags & chathub_core::model::ADMIN_FLAG != 0
}

/// Runs the decode -> dispatch loop over an already-framed byte stream
/// (§4.5). Shared by all three transports: TCP and SSH hand the dispatcher a
/// `Stream<Item = Result<Frame, ProtocolError>>` produced by their own
/// adapter, and the WebSocket transport does the same after mapping binary
/// messages to frames (§9 "Polymorphism over transports"). Every outbound
/// frame -- responses, errors, broadcasts -- goes through `session.conn`
/// alone, so the per-connection write mutex living inside the adapter is the
/// only place frames can interleave on the wire.
pub async fn run_frame_loop<St>(state: Arc<AppState>, session: Arc<Session>, mut frames: St)
where
    St: futures_util::Stream<Item = Result<Frame, ProtocolError>> + Unpin,
{
    use futures_util::StreamExt;

    if send_server_config(&session, &state).await.is_err() {
        state.sessions.remove_session(session.id).await;
        return;
    }

    loop {
        let decoded = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(_)) | None => break,
        };

        let timeout_ms = (state.config.limits.session_timeout_seconds as i64) * 1000;
        let should_persist = state
            .sessions
            .update_session_activity(&session, crate::state::now_ms(), timeout_ms)
            .await;
        if should_persist {
            let db_session_id = session.db_session_id.clone();
            let pool = state.db_pool.clone();
            let now = crate::state::now_ms();
            tokio::spawn(async move {
                let _ = crate::durable_pg::touch_session_activity(&pool, &db_session_id, now).await;
            });
        }

        match dispatch_frame(&state, &session, decoded).await {
            Ok(()) => {}
            Err(HandlerError::ClientDisconnecting) => {
                // Remove before the caller tears down the write side, so the
                // broadcaster never schedules a write to a closing connection
                // (§7 "graceful disconnect").
                state.sessions.remove_session(session.id).await;
                return;
            }
            Err(err) => {
                let (code, message) = err.wire_code();
                if send_error(&session, code, message).await.is_err() {
                    break;
                }
            }
        }
    }

    state.sessions.remove_session(session.id).await;
}
