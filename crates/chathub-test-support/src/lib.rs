//! Mock transport and fixture helpers shared by the chat hub's integration
//! test suites.

pub mod client;

pub use client::TestClient;

/// Builds an in-memory duplex pair wired to two [`TestClient`]s, useful for
/// exercising the dispatcher without a real socket.
pub fn duplex_pair(
    max_buf_size: usize,
) -> (
    TestClient<tokio::io::DuplexStream>,
    TestClient<tokio::io::DuplexStream>,
) {
    let (a, b) = tokio::io::duplex(max_buf_size);
    (TestClient::new(a), TestClient::new(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathub_protocol::messages::{Ping, PostMessage};

    #[tokio::test]
    async fn duplex_pair_round_trips_a_message() {
        let (mut client, mut server) = duplex_pair(4096);
        client
            .send(&PostMessage {
                channel_id: 1,
                subchannel_id: None,
                parent_id: None,
                content: "hello".to_owned(),
            })
            .await
            .unwrap();

        let received: PostMessage = server.recv().await.unwrap();
        assert_eq!(received.content, "hello");

        server.send(&Ping {}).await.unwrap();
        let _: Ping = client.recv().await.unwrap();
    }
}
