use std::sync::Arc;

use chathub_core::model::{BanKind, Session};
use chathub_protocol::encode_message;
use chathub_protocol::messages;

use crate::error::HandlerError;
use crate::state::{now_ms, AppState};

/// `ADMIN_BAN`. A regular ban disconnects the target immediately; a
/// shadowban leaves the session connected but flips `shadowbanned` so its
/// future posts are filtered to `{author, admins}` (§3 Ban).
pub async fn ban(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::AdminBan,
) -> Result<(), HandlerError> {
    let admin_user_id = session.state.read().await.user_id;
    let now = now_ms();

    let target = state.memdb.get_user_by_nickname(&msg.target_nickname).await;
    let banned_until = msg.duration_secs.map(|d| now + (d as i64) * 1000);

    let ban = state
        .memdb
        .create_ban(
            BanKind::User,
            target.as_ref().map(|u| u.id),
            Some(msg.target_nickname.clone()),
            None,
            msg.reason.clone(),
            msg.shadowban,
            banned_until,
            admin_user_id,
            now,
        )
        .await;

    for s in state.sessions.get_all_sessions().await {
        let matches = {
            let st = s.state.read().await;
            st.nickname == msg.target_nickname
                || (target.is_some() && st.user_id == target.as_ref().map(|u| u.id))
        };
        if !matches {
            continue;
        }
        if msg.shadowban {
            s.state.write().await.shadowbanned = true;
        } else {
            state.sessions.remove_session(s.id).await;
        }
    }

    state
        .memdb
        .record_admin_action(
            admin_user_id,
            if msg.shadowban { "shadowban" } else { "ban" },
            Some(msg.target_nickname),
            Some(msg.reason),
            now,
        )
        .await;

    session
        .conn
        .write_frame(&encode_message(&messages::AdminResponse {
            success: true,
            message: format!("ban {} recorded", ban.id),
        }))
        .await?;
    Ok(())
}

/// `ADMIN_UNBAN`.
pub async fn unban(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::AdminUnban,
) -> Result<(), HandlerError> {
    let admin_user_id = session.state.read().await.user_id;
    let now = now_ms();

    match state.memdb.remove_ban(msg.ban_id).await {
        Ok(()) => {
            state
                .memdb
                .record_admin_action(
                    admin_user_id,
                    "unban",
                    Some(msg.ban_id.to_string()),
                    None,
                    now,
                )
                .await;
            session
                .conn
                .write_frame(&encode_message(&messages::AdminResponse {
                    success: true,
                    message: "ban removed".to_owned(),
                }))
                .await?;
        }
        Err(err) => {
            session
                .conn
                .write_frame(&encode_message(&messages::AdminResponse {
                    success: false,
                    message: err.to_string(),
                }))
                .await?;
        }
    }
    Ok(())
}
