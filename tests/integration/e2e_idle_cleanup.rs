//! §8 scenario S6 — idle sessions are pruned, including their subscriptions.

#[path = "common.rs"]
mod common;

use chathub_core::model::ChannelType;
use chathub_protocol::messages;
use common::{expect, TestServer};

#[tokio::test]
async fn idle_session_is_swept_and_its_subscriptions_pruned() {
    let server = TestServer::start(|cfg| {
        cfg.limits.session_timeout_seconds = 2;
    })
    .await;

    let channel = server
        .state
        .memdb
        .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
        .await
        .expect("create channel");

    let mut idle = server.connect().await;
    let _: messages::ServerConfig = expect(&mut idle).await;
    idle.send(&messages::SetNickname {
        nickname: "idle".to_owned(),
    })
    .await
    .unwrap();
    let _: messages::NicknameResponse = expect(&mut idle).await;
    idle.send(&messages::SubscribeChannel {
        channel_id: channel.id,
        subchannel_id: None,
    })
    .await
    .unwrap();
    let _: messages::SubscribeOk = expect(&mut idle).await;

    assert_eq!(server.state.sessions.count_online_users().await, 1);
    assert_eq!(
        server
            .state
            .sessions
            .get_channel_subscribers(chathub_core::model::ChannelSub::whole_channel(channel.id))
            .await
            .len(),
        1
    );

    // Let last_activity fall well past the 2 s timeout without sending or
    // receiving a single frame.
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    // Trigger the sweep directly rather than waiting out a real 30 s ticker
    // (§8 S6 explicitly allows "or earlier if the test triggers cleanup").
    let removed = server.state.sweep_idle_sessions().await;
    assert_eq!(removed, 1);

    assert_eq!(server.state.sessions.count_online_users().await, 0);
    assert!(server
        .state
        .sessions
        .get_channel_subscribers(chathub_core::model::ChannelSub::whole_channel(channel.id))
        .await
        .is_empty());
}
