//! §8 scenario S2 — shadowban filters posts to {author, admins}.

#[path = "common.rs"]
mod common;

use chathub_core::model::{ChannelType, ADMIN_FLAG};
use chathub_protocol::messages;
use common::{expect, TestServer};

async fn set_nickname(client: &mut chathub_test_support::TestClient<tokio::net::TcpStream>, nickname: &str) {
    client
        .send(&messages::SetNickname {
            nickname: nickname.to_owned(),
        })
        .await
        .unwrap();
    let resp: messages::NicknameResponse = expect(client).await;
    assert!(resp.success, "set_nickname({nickname}) failed: {}", resp.message);
}

async fn register_and_auth(
    client: &mut chathub_test_support::TestClient<tokio::net::TcpStream>,
    nickname: &str,
    password_hash: &str,
) -> u64 {
    client
        .send(&messages::RegisterUser {
            nickname: nickname.to_owned(),
            password_hash: password_hash.to_owned(),
        })
        .await
        .unwrap();
    let reg: messages::RegisterResponse = expect(client).await;
    assert!(reg.success, "register({nickname}) failed: {}", reg.message);

    client
        .send(&messages::Auth {
            nickname: nickname.to_owned(),
            password_hash: password_hash.to_owned(),
        })
        .await
        .unwrap();
    let auth: messages::AuthResponse = expect(client).await;
    assert!(auth.success, "auth({nickname}) failed: {}", auth.message);
    auth.user_id.expect("authenticated response carries a user id")
}

async fn subscribe(client: &mut chathub_test_support::TestClient<tokio::net::TcpStream>, channel_id: u64) {
    client
        .send(&messages::SubscribeChannel {
            channel_id,
            subchannel_id: None,
        })
        .await
        .unwrap();
    let _: messages::SubscribeOk = expect(client).await;
}

#[tokio::test]
async fn shadowbanned_posts_are_filtered_to_author_and_admins() {
    let server = TestServer::start(|_| {}).await;

    let channel = server
        .state
        .memdb
        .create_channel("general", "General", None, ChannelType::Chat, 24, None, false, 0)
        .await
        .expect("create channel");

    let mut dora = server.connect().await;
    let _: messages::ServerConfig = expect(&mut dora).await;
    set_nickname(&mut dora, "dora").await;
    register_and_auth(&mut dora, "dora", "dorahash").await;

    // No in-protocol path promotes a user to admin; grant it directly on the
    // live session the way an operator-run bootstrap script would seed the
    // first admin account.
    {
        let sessions = server.state.sessions.get_all_sessions().await;
        let dora_session = sessions
            .iter()
            .find(|s| s.state.try_read().map(|st| st.nickname == "dora").unwrap_or(false))
            .expect("dora's session is live")
            .clone();
        dora_session.state.write().await.user_flags |= ADMIN_FLAG;
    }
    subscribe(&mut dora, channel.id).await;

    let mut alice = server.connect().await;
    let _: messages::ServerConfig = expect(&mut alice).await;
    set_nickname(&mut alice, "alice").await;
    register_and_auth(&mut alice, "alice", "alicehash").await;
    subscribe(&mut alice, channel.id).await;

    dora.send(&messages::AdminBan {
        target_nickname: "alice".to_owned(),
        reason: "testing".to_owned(),
        shadowban: true,
        duration_secs: None,
    })
    .await
    .unwrap();
    let ban_resp: messages::AdminResponse = expect(&mut dora).await;
    assert!(ban_resp.success);

    // Alice is shadowbanned but still authenticates successfully.
    alice
        .send(&messages::Auth {
            nickname: "alice".to_owned(),
            password_hash: "alicehash".to_owned(),
        })
        .await
        .unwrap();
    let reauth: messages::AuthResponse = expect(&mut alice).await;
    assert!(reauth.success);

    let mut bob = server.connect().await;
    let _: messages::ServerConfig = expect(&mut bob).await;
    set_nickname(&mut bob, "bob").await;
    subscribe(&mut bob, channel.id).await;

    let mut carol = server.connect().await;
    let _: messages::ServerConfig = expect(&mut carol).await;
    set_nickname(&mut carol, "carol").await;
    subscribe(&mut carol, channel.id).await;

    alice
        .send(&messages::PostMessage {
            channel_id: channel.id,
            subchannel_id: None,
            parent_id: None,
            content: "hi".to_owned(),
        })
        .await
        .unwrap();
    let posted: messages::MessagePosted = expect(&mut alice).await;
    assert!(posted.success);

    // Alice (the author) and dora (admin) both see the post.
    let seen_by_alice: messages::NewMessage = expect(&mut alice).await;
    assert_eq!(seen_by_alice.message.content, "hi");
    let seen_by_dora: messages::NewMessage = expect(&mut dora).await;
    assert_eq!(seen_by_dora.message.content, "hi");

    // bob and carol never see it. Ping both and confirm the only frame
    // waiting for them is the PING's own implicit silence -- use a PING
    // round-trip substitute by racing a short timeout against recv_frame,
    // since a PING draws no response from the server.
    assert_no_new_message(&mut bob).await;
    assert_no_new_message(&mut carol).await;
}

async fn assert_no_new_message(client: &mut chathub_test_support::TestClient<tokio::net::TcpStream>) {
    let outcome = tokio::time::timeout(std::time::Duration::from_millis(300), client.recv_frame()).await;
    match outcome {
        Err(_) => {} // timed out waiting for a frame: nothing arrived, as expected
        Ok(Some(Ok(frame))) => {
            assert_ne!(
                frame.msg_type,
                messages::msg_type::NEW_MESSAGE,
                "shadowbanned post leaked to a non-admin subscriber"
            );
        }
        Ok(Some(Err(err))) => panic!("frame decode error: {err}"),
        Ok(None) => {} // connection closed, also fine
    }
}
