//! Message routing and the built-in client message handlers.

pub mod handlers;
pub mod router;

pub use handlers::GatewayHandler;
pub use router::{MessageHandler, MessageRouter};
