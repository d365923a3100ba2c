//! Gateway server: listener, per-connection tasks and lifecycle.

pub mod core;
mod handlers;

pub use self::core::{GatewayServer, GatewayStats};
