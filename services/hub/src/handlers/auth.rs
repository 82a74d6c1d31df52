use std::sync::Arc;

use chathub_core::model::Session;
use chathub_protocol::encode_message;
use chathub_protocol::messages;

use crate::error::HandlerError;
use crate::state::{now_ms, AppState};

/// `REGISTER_USER`. Double-hashed per §3 User: the client supplies an
/// Argon2id base64 hash, the server re-hashes it with bcrypt before
/// persisting, so a durable-store compromise alone never discloses a
/// crackable password hash.
pub async fn register_user(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::RegisterUser,
) -> Result<(), HandlerError> {
    let bcrypt_hash = match bcrypt::hash(&msg.password_hash, bcrypt::DEFAULT_COST) {
        Ok(h) => h,
        Err(_) => {
            return send_register_response(session, false, "failed to hash password", None).await;
        }
    };

    match state.memdb.create_user(&msg.nickname, &bcrypt_hash, now_ms()).await {
        Ok(user) => send_register_response(session, true, "registered", Some(user.id)).await,
        Err(err) => send_register_response(session, false, &err.to_string(), None).await,
    }
}

/// `AUTH`. Regular bans refuse authentication outright; a shadowban still
/// lets the session in but marks it so posts are filtered to `{author,
/// admins}` (§3 Ban).
pub async fn authenticate(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::Auth,
) -> Result<(), HandlerError> {
    let Some(user) = state.memdb.get_user_by_nickname(&msg.nickname).await else {
        return send_auth_response(session, false, "invalid credentials", None).await;
    };

    if user.password_hash.is_empty() {
        return send_auth_response(session, false, "account has no password set", None).await;
    }

    let verified = bcrypt::verify(&msg.password_hash, &user.password_hash).unwrap_or(false);
    if !verified {
        return send_auth_response(session, false, "invalid credentials", None).await;
    }

    let now = now_ms();
    let active_ban = state.memdb.find_active_ban_for_user(user.id, &user.nickname, now).await;
    if let Some(ban) = &active_ban {
        if !ban.shadowban {
            return send_auth_response(session, false, "account is banned", None).await;
        }
    }
    let shadowbanned = active_ban.is_some_and(|b| b.shadowban);

    {
        let mut st = session.state.write().await;
        st.user_id = Some(user.id);
        st.nickname = user.nickname.clone();
        st.user_flags = user.user_flags;
        st.shadowbanned = shadowbanned;
    }
    state.memdb.touch_user_last_seen(user.id, now).await;

    send_auth_response(session, true, "authenticated", Some(user.id)).await
}

/// `LOGOUT` (§4.5: `[AUTHENTICATED] --LOGOUT--> [NAMED]`, keeps nickname).
pub async fn logout(state: &Arc<AppState>, session: &Arc<Session>) -> Result<(), HandlerError> {
    {
        let mut st = session.state.write().await;
        st.user_id = None;
        st.user_flags = 0;
        st.shadowbanned = false;
    }
    let _ = state;
    session
        .conn
        .write_frame(&encode_message(&messages::AuthResponse {
            success: true,
            message: "logged out".to_owned(),
            user_id: None,
        }))
        .await?;
    Ok(())
}

async fn send_register_response(
    session: &Arc<Session>,
    success: bool,
    message: &str,
    user_id: Option<u64>,
) -> Result<(), HandlerError> {
    session
        .conn
        .write_frame(&encode_message(&messages::RegisterResponse {
            success,
            message: message.to_owned(),
            user_id,
        }))
        .await?;
    Ok(())
}

async fn send_auth_response(
    session: &Arc<Session>,
    success: bool,
    message: &str,
    user_id: Option<u64>,
) -> Result<(), HandlerError> {
    session
        .conn
        .write_frame(&encode_message(&messages::AuthResponse {
            success,
            message: message.to_owned(),
            user_id,
        }))
        .await?;
    Ok(())
}
