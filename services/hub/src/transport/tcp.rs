//! Plain TCP transport (§4: "Transport listeners"). Frames are decoded and
//! encoded with the shared [`ChatCodec`] over a split `TcpStream`, exactly
//! the way `tokio_util::codec::Framed` is used elsewhere in this workspace.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{info, warn};

use chathub_protocol::{ChatCodec, Frame};

use chathub_core::model::{ByteSink, Transport};

use crate::dispatch::run_frame_loop;
use crate::state::AppState;

/// Wraps the write half of a `TcpStream` behind the mutex §5 calls for:
/// concurrent broadcaster writes and direct handler replies must never
/// interleave bytes on the wire.
struct TcpByteSink {
    writer: AsyncMutex<FramedWrite<tokio::io::WriteHalf<TcpStream>, ChatCodec>>,
}

#[async_trait::async_trait]
impl ByteSink for TcpByteSink {
    async fn write_frame(&self, frame: &Frame) -> std::io::Result<()> {
        use futures_util::SinkExt;
        self.writer
            .lock()
            .await
            .send(frame.clone())
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.get_mut().shutdown().await;
    }
}

/// Accepts connections until `state` reports shutdown, spawning one
/// dispatcher task per connection.
pub async fn serve(state: Arc<AppState>, listener: TcpListener) {
    let mut shutdown_rx = state.shutdown_rx.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "tcp accept failed");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(state, stream, addr.to_string()).await;
                });
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("tcp listener stopping");
                    return;
                }
            }
        }
    }
}

async fn handle_connection(state: Arc<AppState>, stream: TcpStream, remote_addr: String) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = tokio::io::split(stream);
    let frames = FramedRead::new(read_half, ChatCodec);
    let sink = TcpByteSink {
        writer: AsyncMutex::new(FramedWrite::new(write_half, ChatCodec)),
    };

    let session = state
        .create_session(remote_addr, Transport::Tcp, Box::new(sink))
        .await;
    info!(session_id = session.id, "tcp session established");

    run_frame_loop(state, session, frames).await;
}
