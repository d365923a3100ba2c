//! Connection management for client connections.
//!
//! A [`Connection`] wraps the outbound half of one transport session. The
//! [`ConnectionRegistry`] tracks which user and room each logged-in
//! connection belongs to.

pub mod registry;
pub mod websocket;

pub use registry::{ConnectionInfo, ConnectionRegistry, Member};
pub use websocket::WebSocketSink;

use crate::codec::FrameKind;
use crate::error::ServerError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::debug;

/// Type alias for connection identifiers.
///
/// Connection IDs are process-unique and never reused.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How long [`Connection::close`] waits for the transport by default.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound half of a transport.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Writes one frame.
    async fn send_frame(&self, kind: FrameKind, bytes: Vec<u8>) -> Result<(), ServerError>;

    /// Closes the transport. Calling it twice is harmless.
    async fn close(&self);
}

/// One live transport session.
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    sink: Arc<dyn FrameSink>,
    closed: watch::Sender<bool>,
    close_timeout: Duration,
    connected_at: SystemTime,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(remote_addr: Option<SocketAddr>, sink: Arc<dyn FrameSink>) -> Arc<Self> {
        Self::with_close_timeout(remote_addr, sink, DEFAULT_CLOSE_TIMEOUT)
    }

    /// Creates a connection whose transport close is abandoned after
    /// `close_timeout`.
    pub fn with_close_timeout(
        remote_addr: Option<SocketAddr>,
        sink: Arc<dyn FrameSink>,
        close_timeout: Duration,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            sink,
            closed,
            close_timeout,
            connected_at: SystemTime::now(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// Writes one frame, failing with a transport error if it does not
    /// complete within `deadline`.
    pub async fn send(
        &self,
        kind: FrameKind,
        bytes: Vec<u8>,
        deadline: Duration,
    ) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::Transport(format!(
                "connection {} is closed",
                self.id
            )));
        }
        match tokio::time::timeout(deadline, self.sink.send_frame(kind, bytes)).await {
            Ok(result) => result,
            Err(_) => Err(ServerError::Transport(format!(
                "write deadline of {deadline:?} exceeded on connection {}",
                self.id
            ))),
        }
    }

    /// Marks the connection closed and closes the transport.
    ///
    /// The read loop watching [`Connection::closed_signal`] exits and runs its
    /// normal cleanup. A peer that stops reading cannot hold this up for longer
    /// than the close timeout; the socket is dropped with the last handle.
    pub async fn close(&self) {
        self.closed.send_replace(true);
        if tokio::time::timeout(self.close_timeout, self.sink.close())
            .await
            .is_err()
        {
            debug!(
                "Connection {} did not close within {:?}, abandoning transport",
                self.id, self.close_timeout
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}
