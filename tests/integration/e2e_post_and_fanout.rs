//! §8 scenario S1 — post and fan-out.

#[path = "common.rs"]
mod common;

use chathub_core::model::ChannelType;
use chathub_protocol::messages;
use common::{expect, TestServer};

#[tokio::test]
async fn post_and_fanout_delivers_ack_before_broadcast() {
    let server = TestServer::start(|_| {}).await;

    let channel = server
        .state
        .memdb
        .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
        .await
        .expect("create channel");

    let mut alice = server.connect().await;
    let _: messages::ServerConfig = expect(&mut alice).await;
    alice
        .send(&messages::SetNickname {
            nickname: "alice".to_owned(),
        })
        .await
        .unwrap();
    let resp: messages::NicknameResponse = expect(&mut alice).await;
    assert!(resp.success);

    alice
        .send(&messages::JoinChannel {
            channel_id: channel.id,
        })
        .await
        .unwrap();
    let join: messages::JoinResponse = expect(&mut alice).await;
    assert!(join.success);

    alice
        .send(&messages::SubscribeChannel {
            channel_id: channel.id,
            subchannel_id: None,
        })
        .await
        .unwrap();
    let _: messages::SubscribeOk = expect(&mut alice).await;

    let mut bob = server.connect().await;
    let _: messages::ServerConfig = expect(&mut bob).await;
    bob.send(&messages::SetNickname {
        nickname: "bob".to_owned(),
    })
    .await
    .unwrap();
    let resp: messages::NicknameResponse = expect(&mut bob).await;
    assert!(resp.success);

    bob.send(&messages::SubscribeChannel {
        channel_id: channel.id,
        subchannel_id: None,
    })
    .await
    .unwrap();
    let _: messages::SubscribeOk = expect(&mut bob).await;

    alice
        .send(&messages::PostMessage {
            channel_id: channel.id,
            subchannel_id: None,
            parent_id: None,
            content: "hello".to_owned(),
        })
        .await
        .unwrap();

    // The post ack must be the very next frame alice's client decodes as
    // MESSAGE_POSTED, strictly before the NEW_MESSAGE broadcast.
    let posted: messages::MessagePosted = expect(&mut alice).await;
    assert!(posted.success);
    let message_id = posted.message_id;
    assert!(message_id > 0);

    let new_msg_alice: messages::NewMessage = expect(&mut alice).await;
    assert_eq!(new_msg_alice.message.id, message_id);
    assert_eq!(new_msg_alice.message.author_nickname, "~alice");
    assert_eq!(new_msg_alice.message.content, "hello");

    let new_msg_bob: messages::NewMessage = expect(&mut bob).await;
    assert_eq!(new_msg_bob.message.id, message_id);
    assert_eq!(new_msg_bob.message.author_nickname, "~alice");
    assert_eq!(new_msg_bob.message.content, "hello");
}
