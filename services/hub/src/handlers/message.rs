use std::sync::Arc;

use chathub_core::model::Session;
use chathub_protocol::encode_message;
use chathub_protocol::messages;

use crate::error::{core_error_wire, HandlerError};
use crate::state::{now_ms, AppState};

fn to_message_info(m: chathub_core::model::Message) -> messages::MessageInfo {
    let content = m.display_content().to_owned();
    messages::MessageInfo {
        id: m.id,
        channel_id: m.channel_id,
        subchannel_id: m.subchannel_id,
        parent_id: m.parent_id,
        thread_root_id: m.thread_root_id,
        author_user_id: m.author_user_id,
        author_nickname: m.author_nickname,
        content,
        created_at: m.created_at,
        edited_at: m.edited_at,
        deleted_at: m.deleted_at,
    }
}

/// `LIST_MESSAGES`. Lists thread replies when `parent_id` is set, otherwise
/// root messages for the channel/subchannel.
pub async fn list_messages(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::ListMessages,
) -> Result<(), HandlerError> {
    let limit = msg.limit.min(500).max(1);
    let out = if let Some(thread_root_id) = msg.parent_id {
        state
            .memdb
            .list_thread_replies(msg.channel_id, thread_root_id, limit, msg.before, msg.after)
            .await
    } else {
        state
            .memdb
            .list_root_messages(msg.channel_id, limit, msg.before, msg.after)
            .await
    };

    session
        .conn
        .write_frame(&encode_message(&messages::MessageList {
            messages: out.into_iter().map(to_message_info).collect(),
        }))
        .await?;
    Ok(())
}

/// `POST_MESSAGE` (§8 scenario S1). A session that has only set a nickname
/// (not authenticated) posts under a `~`-prefixed display name so clients
/// can distinguish anonymous authorship from a registered account.
pub async fn post_message(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::PostMessage,
) -> Result<(), HandlerError> {
    let (author_user_id, author_nickname, shadowbanned) = {
        let st = session.state.read().await;
        let display = if st.user_id.is_some() {
            st.nickname.clone()
        } else {
            format!("~{}", st.nickname)
        };
        (st.user_id, display, st.shadowbanned)
    };

    match state
        .memdb
        .post_message(
            msg.channel_id,
            msg.subchannel_id,
            msg.parent_id,
            author_user_id,
            &author_nickname,
            &msg.content,
            state.config.limits.max_message_length,
            now_ms(),
        )
        .await
    {
        Ok(message) => {
            session
                .conn
                .write_frame(&encode_message(&messages::MessagePosted {
                    success: true,
                    message_id: message.id,
                    error: None,
                }))
                .await?;

            let frame = encode_message(&messages::NewMessage {
                message: to_message_info(message.clone()),
            });
            state
                .broadcaster
                .broadcast_new_message(
                    session,
                    message.channel_id,
                    message.subchannel_id,
                    message.thread_root_id,
                    shadowbanned,
                    frame,
                )
                .await;
        }
        // Channel-type violations get the stable `ERROR` frame §8 scenario S4
        // expects (no row created, no broadcast), rather than a type-specific
        // failure response.
        Err(chathub_core::CoreError::ChatDoesNotThread) => {
            let (code, message) = core_error_wire(&chathub_core::CoreError::ChatDoesNotThread);
            crate::dispatch::send_error(session, code, message).await?;
        }
        Err(err) => {
            session
                .conn
                .write_frame(&encode_message(&messages::MessagePosted {
                    success: false,
                    message_id: 0,
                    error: Some(err.to_string()),
                }))
                .await?;
        }
    }
    Ok(())
}

/// `DELETE_MESSAGE`. Admins bypass ownership; everyone else can only delete
/// their own posts (enforced inside `MemDb::soft_delete_message`).
pub async fn delete_message(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::DeleteMessage,
) -> Result<(), HandlerError> {
    let (user_id, is_admin) = {
        let st = session.state.read().await;
        (st.user_id, st.user_flags & chathub_core::model::ADMIN_FLAG != 0)
    };

    let result = if is_admin {
        state.memdb.admin_soft_delete_message(msg.message_id, now_ms()).await
    } else {
        state
            .memdb
            .soft_delete_message(msg.message_id, user_id, now_ms())
            .await
    };

    match result {
        Ok(message) => {
            session
                .conn
                .write_frame(&encode_message(&messages::AdminResponse {
                    success: true,
                    message: "message deleted".to_owned(),
                }))
                .await?;
            state
                .broadcaster
                .broadcast_to_channel(
                    message.channel_id,
                    encode_message(&messages::MessageDeleted {
                        message_id: message.id,
                        channel_id: message.channel_id,
                    }),
                )
                .await;
            if is_admin {
                state
                    .memdb
                    .record_admin_action(
                        user_id,
                        "delete_message",
                        Some(message.id.to_string()),
                        None,
                        now_ms(),
                    )
                    .await;
            }
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

/// `EDIT_MESSAGE`. Requires `[AUTHENTICATED]` (enforced by the dispatcher);
/// admins bypass ownership the same way `DELETE_MESSAGE` does.
pub async fn edit_message(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::EditMessage,
) -> Result<(), HandlerError> {
    let (user_id, is_admin) = {
        let st = session.state.read().await;
        (st.user_id, st.user_flags & chathub_core::model::ADMIN_FLAG != 0)
    };

    let result = if is_admin {
        state
            .memdb
            .admin_update_message(
                msg.message_id,
                &msg.content,
                state.config.limits.max_message_length,
                now_ms(),
            )
            .await
    } else {
        state
            .memdb
            .update_message(
                msg.message_id,
                user_id,
                &msg.content,
                state.config.limits.max_message_length,
                now_ms(),
            )
            .await
    };

    match result {
        Ok(message) => {
            session
                .conn
                .write_frame(&encode_message(&messages::EditResponse {
                    success: true,
                    message_id: message.id,
                    error: None,
                }))
                .await?;
            state
                .broadcaster
                .broadcast_to_channel(
                    message.channel_id,
                    encode_message(&messages::NewMessage {
                        message: to_message_info(message),
                    }),
                )
                .await;
        }
        Err(err) => {
            session
                .conn
                .write_frame(&encode_message(&messages::EditResponse {
                    success: false,
                    message_id: msg.message_id,
                    error: Some(err.to_string()),
                }))
                .await?;
        }
    }
    Ok(())
}
