//! Per-connection lifecycle: handshake, read loop and cleanup.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry, WebSocketSink};
use crate::dispatch::Broadcaster;
use crate::error::ServerError;
use crate::messaging::MessageRouter;
use dashmap::DashMap;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Everything a connection task needs, cheap to clone.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub router: Arc<MessageRouter>,
    /// Every open transport, logged in or not.
    pub live: Arc<DashMap<ConnectionId, Arc<Connection>>>,
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Runs one client connection from handshake to close.
pub(crate) async fn handle_connection(
    ctx: ConnectionContext,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let config = ctx.config.clone();
    let check_request = move |request: &Request, response: Response| {
        if request.uri().path() != config.path {
            debug!("Rejecting {} for path {}", addr, request.uri().path());
            return Err(reject(StatusCode::NOT_FOUND, "Not found"));
        }
        let origin = request
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok());
        if !config.origin_allowed(origin) {
            warn!("🚫 Rejecting {} from origin {:?}", addr, origin);
            return Err(reject(StatusCode::FORBIDDEN, "Origin not allowed"));
        }
        Ok(response)
    };

    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(ctx.config.max_message_size))
        .max_frame_size(Some(ctx.config.max_message_size));

    let ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, check_request, Some(ws_config))
            .await
            .map_err(|e| ServerError::Network(format!("WebSocket handshake failed for {addr}: {e}")))?;

    let (sink, mut stream) = ws_stream.split();
    let connection = Connection::with_close_timeout(
        Some(addr),
        Arc::new(WebSocketSink::new(sink)),
        ctx.config.write_timeout,
    );
    let id = connection.id();
    ctx.live.insert(id, connection.clone());
    info!("🔗 Connection {} established from {}", id, addr);

    let mut closed = connection.closed_signal();
    while !connection.is_closed() {
        let next = tokio::select! {
            next = timeout(ctx.config.read_timeout, stream.next()) => next,
            _ = closed.changed() => break,
        };

        let message = match next {
            Err(_) => {
                info!("⏱️ Connection {} idle for {:?}, closing", id, ctx.config.read_timeout);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("Read error on connection {}: {}", id, e);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let keep_open = match message {
            Message::Text(text) => ctx.process_frame(&connection, text.as_bytes()).await,
            Message::Binary(bytes) => ctx.process_frame(&connection, &bytes).await,
            Message::Close(_) => {
                debug!("Connection {} requested close", id);
                false
            }
            // Pongs for client pings are written by the protocol layer.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => true,
        };
        if !keep_open {
            break;
        }
    }

    ctx.live.remove(&id);
    if let Some(info) = ctx.registry.remove(id).await {
        info!("👋 User {} disconnected (connection {})", info.user_id, id);
    }
    connection.close().await;
    info!("🔌 Connection {} from {} closed", id, addr);
    Ok(())
}

impl ConnectionContext {
    /// Decodes and routes one frame. Returns false when the transport failed
    /// and the connection should be torn down.
    async fn process_frame(&self, connection: &Arc<Connection>, bytes: &[u8]) -> bool {
        let envelope = match self.broadcaster.codec().decode_envelope(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Undecodable frame on connection {}: {}", connection.id(), e);
                self.broadcaster
                    .send_error(connection, None, &ServerError::from(e))
                    .await;
                return !connection.is_closed();
            }
        };

        match self.router.route(connection, &envelope).await {
            Ok(()) => true,
            Err(e) if e.is_transport() => {
                debug!("Write failed on connection {}: {}", connection.id(), e);
                false
            }
            Err(e) => {
                debug!(
                    "Kind {} from connection {} failed: {}",
                    envelope.header.msg_type,
                    connection.id(),
                    e
                );
                self.broadcaster
                    .send_error(connection, Some(&envelope), &e)
                    .await;
                true
            }
        }
    }
}
