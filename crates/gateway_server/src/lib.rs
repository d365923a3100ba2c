//! # Gateway Server - Real-time Game Connection Gateway
//!
//! A WebSocket gateway sitting between game clients and game logic. It
//! authenticates connections, tracks which user sits on which connection and
//! in which room, routes client requests to handlers, and fans server pushes
//! out to users, rooms, or everyone.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Protocol Codec** - [`codec::JsonCodec`] for text frames and
//!   [`codec::BinaryCodec`] for binary frames behind one [`codec::Codec`] trait
//! * **Connection Registry** - [`connection::ConnectionRegistry`], three
//!   indices (connection, user, room) under one lock
//! * **Dispatch** - [`dispatch::Broadcaster`] buffer feeding a fixed
//!   [`dispatch::WorkerPool`]
//! * **Router** - [`messaging::MessageRouter`] mapping message kinds to
//!   [`messaging::MessageHandler`]s
//! * **Server** - [`GatewayServer`] owning the listener and background tasks
//!
//! ### Message Flow
//!
//! 1. Client sends a frame carrying an envelope `{header, body}`
//! 2. The codec validates the header and decodes the body by kind
//! 3. The router hands the typed payload to the registered handler
//! 4. The handler replies directly and queues any pushes with the broadcaster
//! 5. A worker resolves the audience against the registry and writes frames
//!
//! Every response carries kind `status + 1000`; a failed request gets an
//! error response and the connection stays open.
//!
//! ## Error Handling
//!
//! [`ServerError`] separates per-message failures (codec, authentication,
//! lookups) from transport failures, which end only the affected connection.

pub use config::{ServerConfig, WireFormat};
pub use error::{AuthError, CodecError, DirectoryError, ServerError};
pub use server::{GatewayServer, GatewayStats};
pub use services::Services;

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod messaging;
pub mod protocol;
pub mod server;
pub mod services;
