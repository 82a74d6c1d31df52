//! §8 scenario S3 — a `DISCONNECT` racing a concurrent broadcast never
//! produces a half-written frame, and online-user accounting settles to
//! exactly one fewer session.

#[path = "common.rs"]
mod common;

use chathub_core::model::ChannelType;
use chathub_protocol::messages;
use common::{expect, TestServer};

#[tokio::test]
async fn disconnect_during_broadcast_leaves_accounting_consistent() {
    let server = TestServer::start(|_| {}).await;

    let channel = server
        .state
        .memdb
        .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
        .await
        .expect("create channel");

    let mut leaving = server.connect().await;
    let _: messages::ServerConfig = expect(&mut leaving).await;
    leaving
        .send(&messages::SetNickname {
            nickname: "leaving".to_owned(),
        })
        .await
        .unwrap();
    let _: messages::NicknameResponse = expect(&mut leaving).await;
    leaving
        .send(&messages::SubscribeChannel {
            channel_id: channel.id,
            subchannel_id: None,
        })
        .await
        .unwrap();
    let _: messages::SubscribeOk = expect(&mut leaving).await;

    let mut poster = server.connect().await;
    let _: messages::ServerConfig = expect(&mut poster).await;
    poster
        .send(&messages::SetNickname {
            nickname: "poster".to_owned(),
        })
        .await
        .unwrap();
    let _: messages::NicknameResponse = expect(&mut poster).await;
    poster
        .send(&messages::SubscribeChannel {
            channel_id: channel.id,
            subchannel_id: None,
        })
        .await
        .unwrap();
    let _: messages::SubscribeOk = expect(&mut poster).await;

    assert_eq!(server.state.sessions.count_online_users().await, 2);

    // Race: `leaving` tells the server to drop it at roughly the same moment
    // `poster` posts a message that will try to fan out to `leaving` as a
    // channel subscriber.
    let disconnect = leaving.send(&messages::Disconnect {});
    let post = poster.send(&messages::PostMessage {
        channel_id: channel.id,
        subchannel_id: None,
        parent_id: None,
        content: "racing".to_owned(),
    });
    let (disconnect_result, post_result) = tokio::join!(disconnect, post);
    disconnect_result.unwrap();
    post_result.unwrap();

    // Whether or not `leaving` was still in the subscriber list when the
    // fan-out ran, `poster`'s own ack and broadcast copy must decode cleanly
    // -- a half-written frame on the wire would fail here, not silently pass.
    let posted: messages::MessagePosted = expect(&mut poster).await;
    assert!(posted.success);
    let seen: messages::NewMessage = expect(&mut poster).await;
    assert_eq!(seen.message.content, "racing");

    // Give the dispatcher loop time to process the DISCONNECT and tear the
    // session down (and, if the broadcaster raced ahead of it, to reap the
    // now-dead write).
    for _ in 0..20 {
        if server.state.sessions.count_online_users().await == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(server.state.sessions.count_online_users().await, 1);
}
