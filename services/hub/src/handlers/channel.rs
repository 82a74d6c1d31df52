use std::sync::Arc;

use chathub_core::model::Session;
use chathub_protocol::encode_message;
use chathub_protocol::messages;

use crate::error::HandlerError;
use crate::state::{now_ms, AppState};

async fn channel_online_count(state: &Arc<AppState>, channel_id: u64) -> u32 {
    let mut count = 0u32;
    for session in state.sessions.get_all_sessions().await {
        if session.state.read().await.joined_channel == Some(channel_id) {
            count += 1;
        }
    }
    count
}

fn to_channel_info(c: chathub_core::model::Channel, user_count: u32) -> messages::ChannelInfo {
    messages::ChannelInfo {
        id: c.id,
        name: c.name,
        display_name: c.display_name,
        description: c.description,
        channel_type: c.channel_type,
        retention_hours: c.retention_hours,
        is_private: c.is_private,
        user_count,
    }
}

/// `LIST_CHANNELS`.
pub async fn list_channels(state: &Arc<AppState>, session: &Arc<Session>) -> Result<(), HandlerError> {
    let mut infos = Vec::new();
    for c in state.memdb.list_channels().await {
        let count = channel_online_count(state, c.id).await;
        infos.push(to_channel_info(c, count));
    }
    session
        .conn
        .write_frame(&encode_message(&messages::ChannelList { channels: infos }))
        .await?;
    Ok(())
}

/// `JOIN_CHANNEL`. Broadcasts `CHANNEL_PRESENCE` on every successful join,
/// matching the presence-broadcasting variant of the source's two divergent
/// `handleCreateChannel`/`handleSetNickname`-era implementations.
pub async fn join_channel(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::JoinChannel,
) -> Result<(), HandlerError> {
    if !state.memdb.channel_exists(msg.channel_id).await {
        return send_join_response(session, false, "channel not found", msg.channel_id).await;
    }

    session.state.write().await.joined_channel = Some(msg.channel_id);
    send_join_response(session, true, "joined", msg.channel_id).await?;

    let online_count = channel_online_count(state, msg.channel_id).await;
    state
        .broadcaster
        .broadcast_to_channel(
            msg.channel_id,
            encode_message(&messages::ChannelPresence {
                channel_id: msg.channel_id,
                online_count,
            }),
        )
        .await;
    Ok(())
}

/// `LEAVE_CHANNEL`. Always answers with `LEAVE_RESPONSE`, never a generic
/// `ERROR`, since leaving a channel you were never in is not itself an
/// error condition worth a different wire shape.
pub async fn leave_channel(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::LeaveChannel,
) -> Result<(), HandlerError> {
    let was_joined = {
        let mut st = session.state.write().await;
        let was = st.joined_channel == Some(msg.channel_id);
        if was {
            st.joined_channel = None;
        }
        was
    };

    session
        .conn
        .write_frame(&encode_message(&messages::LeaveResponse {
            success: true,
            message: "left".to_owned(),
        }))
        .await?;

    if was_joined {
        let online_count = channel_online_count(state, msg.channel_id).await;
        state
            .broadcaster
            .broadcast_to_channel(
                msg.channel_id,
                encode_message(&messages::ChannelPresence {
                    channel_id: msg.channel_id,
                    online_count,
                }),
            )
            .await;
    }
    Ok(())
}

/// `CREATE_CHANNEL`. Reuses `AdminResponse` since there is no dedicated
/// acknowledgement type for this operation.
pub async fn create_channel(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::CreateChannel,
) -> Result<(), HandlerError> {
    let user_id = session.state.read().await.user_id;
    let now = now_ms();
    match state
        .memdb
        .create_channel(
            &msg.name,
            &msg.display_name,
            msg.description,
            msg.channel_type,
            msg.retention_hours,
            user_id,
            msg.is_private,
            now,
        )
        .await
    {
        Ok(channel) => {
            session
                .conn
                .write_frame(&encode_message(&messages::AdminResponse {
                    success: true,
                    message: format!("channel {} created", channel.id),
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

/// `DELETE_CHANNEL`. Not present in the `[AUTHENTICATED]`-gated message list;
/// the dispatcher additionally requires the admin flag before calling this,
/// since dropping a channel (and cascading its messages) is destructive.
pub async fn delete_channel(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::DeleteChannel,
) -> Result<(), HandlerError> {
    match state.memdb.delete_channel(msg.channel_id).await {
        Ok(()) => {
            session
                .conn
                .write_frame(&encode_message(&messages::AdminResponse {
                    success: true,
                    message: "channel deleted".to_owned(),
                }))
                .await?;
            for s in state.sessions.get_all_sessions().await {
                let mut st = s.state.write().await;
                if st.joined_channel == Some(msg.channel_id) {
                    st.joined_channel = None;
                }
            }
            state.sessions.remove_channel_subscriptions(msg.channel_id).await;
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

async fn send_join_response(
    session: &Arc<Session>,
    success: bool,
    message: &str,
    channel_id: u64,
) -> Result<(), HandlerError> {
    session
        .conn
        .write_frame(&encode_message(&messages::JoinResponse {
            success,
            message: message.to_owned(),
            channel_id,
        }))
        .await?;
    Ok(())
}
