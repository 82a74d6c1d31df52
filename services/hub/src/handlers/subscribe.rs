use std::sync::Arc;

use chathub_core::model::{ChannelSub, Session};
use chathub_protocol::encode_message;
use chathub_protocol::messages;

use crate::dispatch::send_error;
use crate::error::{core_error_wire, HandlerError};
use crate::state::AppState;

/// `SUBSCRIBE_THREAD`. `SubscribeOk` has no failure variant, so a limit
/// violation falls back to a generic `ERROR` frame via `core_error_wire`.
pub async fn subscribe_thread(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::SubscribeThread,
) -> Result<(), HandlerError> {
    match state.sessions.subscribe_to_thread(session, msg.thread_id).await {
        Ok(()) => {
            session
                .conn
                .write_frame(&encode_message(&messages::SubscribeOk {
                    channel_id: None,
                    thread_id: Some(msg.thread_id),
                }))
                .await?;
            Ok(())
        }
        Err(err) => {
            let (code, message) = core_error_wire(&err);
            send_error(session, code, message).await
        }
    }
}

/// `UNSUBSCRIBE_THREAD`. Unconditional: unsubscribing from a thread you
/// were never subscribed to is a no-op, not an error.
pub async fn unsubscribe_thread(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::UnsubscribeThread,
) -> Result<(), HandlerError> {
    state.sessions.unsubscribe_from_thread(session, msg.thread_id).await;
    session
        .conn
        .write_frame(&encode_message(&messages::SubscribeOk {
            channel_id: None,
            thread_id: Some(msg.thread_id),
        }))
        .await?;
    Ok(())
}

pub async fn subscribe_channel(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::SubscribeChannel,
) -> Result<(), HandlerError> {
    let sub = ChannelSub {
        channel_id: msg.channel_id,
        subchannel_id: msg.subchannel_id,
    };
    match state.sessions.subscribe_to_channel(session, sub).await {
        Ok(()) => {
            session
                .conn
                .write_frame(&encode_message(&messages::SubscribeOk {
                    channel_id: Some(msg.channel_id),
                    thread_id: None,
                }))
                .await?;
            Ok(())
        }
        Err(err) => {
            let (code, message) = core_error_wire(&err);
            send_error(session, code, message).await
        }
    }
}

pub async fn unsubscribe_channel(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    msg: messages::UnsubscribeChannel,
) -> Result<(), HandlerError> {
    let sub = ChannelSub {
        channel_id: msg.channel_id,
        subchannel_id: msg.subchannel_id,
    };
    state.sessions.unsubscribe_from_channel(session, sub).await;
    session
        .conn
        .write_frame(&encode_message(&messages::SubscribeOk {
            channel_id: Some(msg.channel_id),
            thread_id: None,
        }))
        .await?;
    Ok(())
}
