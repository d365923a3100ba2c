//! WebSocket transport for [`Connection`](super::Connection).

use super::FrameSink;
use crate::codec::FrameKind;
use crate::error::ServerError;
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::debug;

/// Type alias for WebSocket sink (outgoing messages)
pub type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Outbound half of an accepted WebSocket.
///
/// Writers from the read loop and from fan-out workers are serialized by the
/// mutex, so frames are never interleaved.
pub struct WebSocketSink {
    sink: Mutex<WsSink>,
}

impl WebSocketSink {
    pub fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&self, kind: FrameKind, bytes: Vec<u8>) -> Result<(), ServerError> {
        let message = match kind {
            FrameKind::Text => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| ServerError::Internal(format!("Text frame is not UTF-8: {e}")))?;
                Message::text(text)
            }
            FrameKind::Binary => Message::binary(bytes),
        };

        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| ServerError::Transport(format!("Failed to send message: {e}")))
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("WebSocket close returned: {}", e);
        }
    }
}
