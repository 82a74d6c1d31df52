use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use chathub_protocol::{decode_message, encode_message, ChatCodec, Frame, Message, ProtocolError};

/// A test client driving the binary protocol over any `AsyncRead + AsyncWrite`
/// transport, mirroring how the real dispatcher is transport-generic (§9
/// "Polymorphism over transports").
pub struct TestClient<S> {
    framed: Framed<S, ChatCodec>,
}

impl<S> TestClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, ChatCodec),
        }
    }

    pub async fn send<M: Message>(&mut self, msg: &M) -> std::io::Result<()> {
        self.framed
            .send(encode_message(msg))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    pub async fn recv_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        self.framed.next().await
    }

    /// Awaits the next frame and decodes it as `M`, panicking on type
    /// mismatch -- this is test-only, so a wrong-type frame is a test bug.
    pub async fn recv<M: Message>(&mut self) -> Option<M> {
        let frame = self.recv_frame().await?.expect("frame decode failed");
        Some(decode_message::<M>(&frame).expect("message decode failed"))
    }
}

impl TestClient<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }
}
