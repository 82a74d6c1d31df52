use std::sync::Arc;

use chathub_core::memdb::is_valid_nickname;
use chathub_core::model::Session;
use chathub_protocol::{encode_message, messages};

use crate::error::HandlerError;
use crate::state::{now_ms, AppState};

/// `SET_NICKNAME` (§4.5: `[CONNECTED] --SET_NICKNAME ok--> [NAMED]`).
///
/// Nicknames are validated against the same `^[A-Za-z0-9_-]{3,20}$` pattern
/// as registered usernames but are not themselves persisted until a user
/// registers; uniqueness is only enforced against other sessions currently
/// online, to avoid two connections presenting an identical identity.
///
/// Broadcasts a server-wide presence update on every successful change (§9
/// Open Question: the reimplementation picks the "always broadcast" variant
/// of the source's two divergent `handleSetNickname` implementations),
/// mirroring `handlers::channel::join_channel`'s presence broadcast.
pub async fn set_nickname(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::SetNickname,
) -> Result<(), HandlerError> {
    let nickname = msg.nickname.trim();

    if !is_valid_nickname(nickname) {
        return send_response(session, false, "invalid nickname").await;
    }

    for other in state.sessions.get_all_sessions().await {
        if other.id == session.id {
            continue;
        }
        if other.state.read().await.nickname == nickname {
            return send_response(session, false, "nickname already in use").await;
        }
    }

    {
        let mut st = session.state.write().await;
        st.nickname = nickname.to_owned();
        st.last_activity = now_ms();
    }

    send_response(session, true, "nickname set").await?;

    let online_count = state.sessions.count_online_users().await as u32;
    state
        .broadcaster
        .broadcast_to_all(encode_message(&messages::ServerPresence { online_count }))
        .await;
    Ok(())
}

async fn send_response(session: &Arc<Session>, success: bool, message: &str) -> Result<(), HandlerError> {
    session
        .conn
        .write_frame(&encode_message(&messages::NicknameResponse {
            success,
            message: message.to_owned(),
        }))
        .await?;
    Ok(())
}
