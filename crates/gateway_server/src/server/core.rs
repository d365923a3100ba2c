//! Core gateway server implementation.
//!
//! This module contains the `GatewayServer` struct, which owns the listener,
//! the connection registry, the outbound pipeline and the background tasks,
//! and wires them together.

use super::handlers::{handle_connection, ConnectionContext};
use crate::codec::create_codec;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::dispatch::{Broadcaster, DeliveryTimeouts, WorkerPool};
use crate::error::ServerError;
use crate::messaging::{GatewayHandler, MessageRouter};
use crate::protocol::{current_timestamp, BroadcastPush, MessageKind, Payload, SystemMessagePush};
use crate::services::Services;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Listen backlog for the gateway socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Point-in-time counters for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub rooms: usize,
    pub max_connections: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

/// The WebSocket gateway.
///
/// `GatewayServer` accepts client connections, routes their messages to the
/// registered handlers, and fans server pushes out through the broadcaster.
///
/// # Architecture
///
/// * **Registry**: logged-in connections indexed by connection, user and room
/// * **Router**: kind to handler table driving the per-connection read loop
/// * **Broadcaster**: bounded buffer in front of a fixed worker pool
/// * **Heartbeat sweep**: periodic eviction of connections that went quiet
///
/// Must be constructed inside a tokio runtime; the worker pool starts its
/// workers immediately.
pub struct GatewayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<WorkerPool>,
    broadcaster: Arc<Broadcaster>,
    router: Arc<MessageRouter>,
    live: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    shutdown_sender: broadcast::Sender<()>,
    background: Mutex<Vec<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
    stopped: AtomicBool,
}

impl GatewayServer {
    /// Creates a gateway with the development service stand-ins.
    pub fn new(config: ServerConfig) -> Self {
        Self::new_with_services(config, Services::default())
    }

    /// Creates a gateway whose handlers use the given collaborators.
    pub fn new_with_services(config: ServerConfig, services: Services) -> Self {
        let config = Arc::new(config);
        let codec = create_codec(config.wire_format);
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let pool = Arc::new(WorkerPool::new(
            config.dispatch_workers,
            config.worker_queue_capacity,
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            registry.clone(),
            codec.clone(),
            pool.clone(),
            config.broadcast_buffer,
            DeliveryTimeouts {
                reply: config.write_timeout,
                fan_out: config.broadcast_write_timeout,
                error: config.error_write_timeout,
            },
        ));

        let handler = Arc::new(GatewayHandler::new(
            registry.clone(),
            broadcaster.clone(),
            services,
            config.profile_cache_ttl,
        ));
        let mut router = MessageRouter::new(codec);
        router.register_client_kinds(handler);

        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            pool,
            broadcaster,
            router: Arc::new(router),
            live: Arc::new(DashMap::new()),
            shutdown_sender,
            background: Mutex::new(Vec::new()),
            local_addr: OnceLock::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Binds the configured address with `SO_REUSEADDR`.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR on {}: {}", address, e);
        }

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;
        info!("✅ Listener bound on {}", address);
        Ok(listener)
    }

    /// Binds and serves until [`GatewayServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Serves an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("Gateway already shut down, not serving");
            return Ok(());
        }
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Listener has no local address: {e}")))?;
        let _ = self.local_addr.set(local_addr);

        info!("🚀 Starting gateway on ws://{}{}", local_addr, self.config.path);
        info!(
            "📦 Wire format {:?}, {} dispatch worker(s), limit {} connection(s)",
            self.config.wire_format,
            self.pool.size(),
            self.config.max_connections
        );
        if self.config.enable_compression {
            info!("🗜️ Compression requested but not negotiated; frames are sent uncompressed");
        }

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        {
            let mut background = self.background.lock().await;
            match self
                .broadcaster
                .spawn_dispatch_loop(self.shutdown_sender.subscribe())
                .await
            {
                Some(handle) => background.push(handle),
                None => warn!("Broadcast dispatch loop already running"),
            }
            background.push(self.spawn_heartbeat_sweep());
        }

        let context = ConnectionContext {
            config: self.config.clone(),
            registry: self.registry.clone(),
            broadcaster: self.broadcaster.clone(),
            router: self.router.clone(),
            live: self.live.clone(),
        };

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let context = context.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(context, stream, addr).await {
                                warn!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }

    fn spawn_heartbeat_sweep(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let timeout = self.config.heartbeat_timeout;
        let mut shutdown = self.shutdown_sender.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.sweep_dead(timeout).await;
                        if evicted > 0 {
                            info!("🧹 Heartbeat sweep evicted {} connection(s)", evicted);
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            debug!("Heartbeat sweep stopped");
        })
    }

    /// Stops the gateway.
    ///
    /// Stops accepting, stops the sweep, drains queued broadcasts through the
    /// worker pool, then closes every open connection. Calling it again is a
    /// no-op.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("🛑 Shutting down gateway...");
        let _ = self.shutdown_sender.send(());

        let background: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for task in background {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        // No-op when the dispatch loop ran; it closed the buffer on its way out.
        self.broadcaster.close_buffer().await;
        self.pool.shutdown().await;

        let open: Vec<Arc<Connection>> = self.live.iter().map(|entry| entry.value().clone()).collect();
        info!("🧹 Closing {} open connection(s)", open.len());
        join_all(open.iter().map(|connection| connection.close())).await;

        info!("✅ Gateway shutdown completed");
        Ok(())
    }

    pub async fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.registry.connection_count().await,
            rooms: self.registry.room_count().await,
            max_connections: self.registry.max_connections(),
            heartbeat_interval_secs: self.config.heartbeat_interval.as_secs(),
            heartbeat_timeout_secs: self.config.heartbeat_timeout.as_secs(),
        }
    }

    /// Queues a system notice for every member of a room. Returns false if
    /// the broadcast buffer dropped it.
    pub fn broadcast_system_to_room(
        &self,
        room_id: &str,
        level: i32,
        content: &str,
    ) -> Result<bool, ServerError> {
        let mut envelope = self.broadcaster.codec().build_push(
            MessageKind::PushSystemMsg,
            0,
            room_id,
            "",
            &Payload::SystemMessage(SystemMessagePush {
                level,
                content: content.to_string(),
            }),
        )?;
        envelope.header.timestamp = current_timestamp();
        Ok(self.broadcaster.to_room(room_id, envelope, None))
    }

    /// Queues an announcement for every logged-in connection.
    pub fn broadcast_to_all(&self, content: &str) -> Result<bool, ServerError> {
        let mut envelope = self.broadcaster.codec().build_push(
            MessageKind::PushBroadcast,
            0,
            "",
            "",
            &Payload::Broadcast(BroadcastPush {
                content: content.to_string(),
            }),
        )?;
        envelope.header.timestamp = current_timestamp();
        Ok(self.broadcaster.to_all(envelope))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }

    /// Address the listener is bound to, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of open transports, logged in or not.
    pub fn open_connections(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::recording_connection;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            max_connections: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stats_reflect_registry() {
        let server = GatewayServer::new(test_config());
        let (a, _) = recording_connection();
        let registry = server.registry();
        registry.add(a.clone(), 1).await.unwrap();
        registry.join_room(a.id(), "r1").await.unwrap();

        let stats = server.stats().await;
        assert_eq!(
            stats,
            GatewayStats {
                connections: 1,
                rooms: 1,
                max_connections: 3,
                heartbeat_interval_secs: 5,
                heartbeat_timeout_secs: 15,
            }
        );
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["max_connections"], 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_operator_broadcasts_reach_members() {
        let server = Arc::new(GatewayServer::new(test_config()));
        let listener = server.bind().unwrap();
        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let (a, sink_a) = recording_connection();
        let (b, sink_b) = recording_connection();
        let registry = server.registry();
        registry.add(a.clone(), 1).await.unwrap();
        registry.add(b.clone(), 2).await.unwrap();
        registry.join_room(a.id(), "r1").await.unwrap();

        // Give serve() a moment to start the dispatch loop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.broadcast_system_to_room("r1", 1, "maintenance").unwrap());
        assert!(server.broadcast_to_all("hello").unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink_a.frames().await.len(), 2);
        assert_eq!(sink_b.frames().await.len(), 1);

        server.shutdown().await.unwrap();
        serving.await.unwrap().unwrap();
        assert!(server.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_refuses_broadcasts() {
        let server = Arc::new(GatewayServer::new(test_config()));
        server.shutdown().await.unwrap();

        assert!(!server.broadcast_to_all("too late").unwrap());

        let listener = server.bind().unwrap();
        let served = tokio::time::timeout(Duration::from_secs(1), server.serve(listener)).await;
        assert!(matches!(served, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let server = GatewayServer::new(test_config());
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.local_addr().is_none());
    }
}
