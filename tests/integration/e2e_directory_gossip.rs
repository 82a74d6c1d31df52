//! §8 scenario S5 — directory registration is gated on a verified dial-back.

#[path = "common.rs"]
mod common;

use std::time::Duration;

use chathub_protocol::messages;
use chathub_protocol::{decode_message, encode_message, ChatCodec};
use common::{expect, TestServer};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

/// Stands in for the registering server's own listener: accepts exactly one
/// connection, expects `VERIFY_REGISTRATION`, and replies with `challenge`
/// (or a deliberately wrong one, to exercise the rejection path).
async fn run_fake_peer(listener: TcpListener, challenge_to_echo: u64) {
    let (stream, _) = listener.accept().await.expect("accept from directory");
    let mut framed = Framed::new(stream, ChatCodec);
    let frame = framed
        .next()
        .await
        .expect("connection closed before VERIFY_REGISTRATION arrived")
        .expect("frame decode error");
    let _msg: messages::VerifyRegistration =
        decode_message(&frame).expect("expected VERIFY_REGISTRATION");
    framed
        .send(encode_message(&messages::VerifyResponse {
            challenge: challenge_to_echo,
        }))
        .await
        .expect("send VERIFY_RESPONSE");
}

async fn list_servers(client: &mut chathub_test_support::TestClient<tokio::net::TcpStream>) -> Vec<messages::ServerInfo> {
    client.send(&messages::ListServers { limit: 100 }).await.unwrap();
    let resp: messages::ListServersResponse = expect(client).await;
    resp.servers
}

#[tokio::test]
async fn verified_registration_is_persisted_and_listed() {
    let server = TestServer::start(|_| {}).await;

    let peer_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake peer");
    let peer_addr = peer_listener.local_addr().unwrap();

    // The fake peer doesn't know the challenge yet -- it'll read whatever
    // VERIFY_REGISTRATION sends and echo that value back correctly here.
    let peer_task = tokio::spawn(async move {
        let (stream, _) = peer_listener.accept().await.expect("accept from directory");
        let mut framed = Framed::new(stream, ChatCodec);
        let frame = framed
            .next()
            .await
            .expect("connection closed before VERIFY_REGISTRATION arrived")
            .expect("frame decode error");
        let msg: messages::VerifyRegistration =
            decode_message(&frame).expect("expected VERIFY_REGISTRATION");
        framed
            .send(encode_message(&messages::VerifyResponse {
                challenge: msg.challenge,
            }))
            .await
            .expect("send VERIFY_RESPONSE");
    });

    let mut registrant = server.connect().await;
    let _: messages::ServerConfig = expect(&mut registrant).await;
    registrant
        .send(&messages::RegisterServer {
            hostname: "127.0.0.1".to_owned(),
            port: peer_addr.port(),
            name: "peer-hub".to_owned(),
            description: "a friendly neighbor".to_owned(),
            max_users: 500,
            is_public: true,
        })
        .await
        .unwrap();
    // §4.6: the immediate ACK always reports not-yet-persisted -- the
    // record only lands once the async dial-back challenge succeeds, and no
    // second ACK follows it.
    let ack: messages::RegisterAck = expect(&mut registrant).await;
    assert!(!ack.success);

    peer_task.await.expect("fake peer task panicked");

    let mut found = false;
    for _ in 0..20 {
        let servers = list_servers(&mut registrant).await;
        if servers.iter().any(|s| s.port == peer_addr.port()) {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(found, "verified registration never showed up in LIST_SERVERS");
}

#[tokio::test]
async fn mismatched_challenge_is_not_persisted() {
    let server = TestServer::start(|_| {}).await;

    let peer_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake peer");
    let peer_addr = peer_listener.local_addr().unwrap();

    // Echo back a value that can never match the real challenge.
    let peer_task = tokio::spawn(run_fake_peer(peer_listener, u64::MAX));

    let mut registrant = server.connect().await;
    let _: messages::ServerConfig = expect(&mut registrant).await;
    registrant
        .send(&messages::RegisterServer {
            hostname: "127.0.0.1".to_owned(),
            port: peer_addr.port(),
            name: "impostor-hub".to_owned(),
            description: String::new(),
            max_users: 500,
            is_public: true,
        })
        .await
        .unwrap();
    let ack: messages::RegisterAck = expect(&mut registrant).await;
    assert!(!ack.success, "accept is always success=false; verification hasn't run yet");

    peer_task.await.expect("fake peer task panicked");

    // Give the verification task a moment to run and fail, then confirm it
    // never shows up in the list.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let servers = list_servers(&mut registrant).await;
    assert!(
        !servers.iter().any(|s| s.port == peer_addr.port()),
        "a registration with a mismatched challenge must not be persisted"
    );
}
