//! WebSocket transport (§4: "Transport listeners", §6: "the WebSocket
//! transport accepts only binary messages; text messages cause connection
//! close"). Axum already frames individual WS messages, so each binary
//! message is expected to hold exactly one wire frame's bytes; the stream
//! adapter below decodes it with the same [`Frame::try_parse`] the other
//! transports use, just without needing a `tokio_util::codec::Framed`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use chathub_protocol::{Frame, ProtocolError};

use chathub_core::model::{ByteSink, Transport};

use crate::dispatch::run_frame_loop;
use crate::state::AppState;

struct WsByteSink {
    sink: AsyncMutex<SplitSink<WebSocket, Message>>,
}

#[async_trait::async_trait]
impl ByteSink for WsByteSink {
    async fn write_frame(&self, frame: &Frame) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        frame
            .write(&mut buf)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Binary(buf.freeze()))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}

/// Maps inbound WS messages to decoded frames. A text message, a close
/// frame, or a decode failure all end the stream; pings/pongs are
/// transparently handled by axum and never reach this adapter.
fn frame_stream(
    stream: SplitStream<WebSocket>,
) -> impl futures_util::Stream<Item = Result<Frame, ProtocolError>> + Unpin {
    stream.filter_map(|item| async move {
        match item {
            Ok(Message::Binary(bytes)) => {
                let mut buf = BytesMut::from(&bytes[..]);
                match Frame::try_parse(&mut buf) {
                    Ok(Some(frame)) => Some(Ok(frame)),
                    Ok(None) => Some(Err(ProtocolError::Incomplete)),
                    Err(err) => Some(Err(err)),
                }
            }
            Ok(Message::Text(_)) => Some(Err(ProtocolError::NonBinaryMessage)),
            Ok(Message::Close(_)) | Err(_) => None,
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
        }
    })
}

pub async fn handle_socket(state: Arc<AppState>, socket: WebSocket, remote_addr: String) {
    let (write_half, read_half) = socket.split();
    let sink = WsByteSink {
        sink: AsyncMutex::new(write_half),
    };

    let session = state
        .create_session(remote_addr, Transport::WebSocket, Box::new(sink))
        .await;
    info!(session_id = session.id, "websocket session established");

    run_frame_loop(state, session, frame_stream(read_half)).await;
}
