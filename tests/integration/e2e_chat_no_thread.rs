//! §8 scenario S4 — chat channels reject threaded replies.

#[path = "common.rs"]
mod common;

use chathub_core::model::ChannelType;
use chathub_protocol::messages::{self, error_code};
use common::{expect, TestServer};

#[tokio::test]
async fn posting_a_reply_into_a_chat_channel_yields_error_6000() {
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

    // No replies are possible yet since chat channels never accept a root
    // message's id as a parent, but we can still exercise the rejection path
    // directly with an arbitrary parent id.
    alice
        .send(&messages::PostMessage {
            channel_id: channel.id,
            subchannel_id: None,
            parent_id: Some(1),
            content: "reply".to_owned(),
        })
        .await
        .unwrap();

    let err: messages::ErrorMsg = expect(&mut alice).await;
    assert_eq!(err.code, error_code::CHAT_NO_THREAD);

    // No message row was created and nothing was broadcast: the channel
    // still has zero root messages.
    let count = server
        .state
        .memdb
        .list_root_messages(channel.id, 10, None, None)
        .await
        .len();
    assert_eq!(count, 0);
}
