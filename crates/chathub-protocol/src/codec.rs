use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::Frame;

/// `tokio_util` codec for the length-prefixed binary frame format (§4.1).
///
/// Used with [`tokio_util::codec::Framed`] over any `AsyncRead + AsyncWrite`
/// (TCP socket, SSH channel); the WebSocket transport decodes the identical
/// bytes out of `Message::Binary` payloads instead of going through this
/// codec directly, since axum already delivers whole WS frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatCodec;

impl Decoder for ChatCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        Frame::try_parse(src)
    }
}

impl Encoder<Frame> for ChatCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        item.write(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn framed_round_trip_over_an_in_memory_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FramedWrite::new(client, ChatCodec);
        let mut reader = FramedRead::new(server, ChatCodec);

        let frame = Frame::new(0x06, Bytes::from_static(b"post me"));
        writer.send(frame.clone()).await.unwrap();

        let decoded = reader.next().await.unwrap().unwrap();
        assert_eq!(decoded, frame);
    }
}
