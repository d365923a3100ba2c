//! Message routing logic for dispatching decoded envelopes to handlers.
//!
//! The routing table is a plain map from [`MessageKind`] to handler, built
//! once at startup. Unknown kinds fail with `UnsupportedKind`; the caller
//! turns any error into an error frame and keeps the connection open.

use crate::codec::Codec;
use crate::connection::Connection;
use crate::error::{CodecError, ServerError};
use crate::protocol::{Envelope, MessageKind, Payload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Business logic for one or more message kinds.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        payload: Payload,
    ) -> Result<(), ServerError>;
}

pub struct MessageRouter {
    codec: Arc<dyn Codec>,
    handlers: HashMap<MessageKind, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            debug!("Replaced handler for {:?}", kind);
        }
    }

    /// Registers one shared handler for every client kind.
    pub fn register_client_kinds(&mut self, handler: Arc<dyn MessageHandler>) {
        for kind in MessageKind::CLIENT_KINDS {
            self.register(kind, handler.clone());
        }
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Decodes the payload and invokes the handler registered for its kind.
    pub async fn route(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
    ) -> Result<(), ServerError> {
        let raw = envelope.header.msg_type;
        let handler = MessageKind::from_u32(raw)
            .and_then(|kind| self.handlers.get(&kind))
            .ok_or(CodecError::UnsupportedKind(raw))?;

        let payload = self.codec.decode_payload(envelope)?;
        debug!(
            "📨 Routing kind {} (msg_id '{}') from connection {}",
            raw,
            envelope.header.msg_id,
            connection.id()
        );
        handler.handle(connection, envelope, payload).await
    }
}
