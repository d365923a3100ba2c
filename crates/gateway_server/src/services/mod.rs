//! External collaborators consumed by the handlers.
//!
//! The gateway only sees these through narrow traits: credential checks,
//! user profile lookup, room listing, and a keyed blob cache. The default
//! implementations here are development stand-ins with placeholder data.

pub mod cache;
pub mod directory;

pub use cache::{KeyValueStore, MemoryStore};
pub use directory::{
    Authenticator, DevAuthenticator, PlaceholderUserDirectory, RoomDirectory, StaticRoomDirectory,
    UserDirectory,
};

use std::sync::Arc;

/// Bundle of collaborators handed to the default message handler.
#[derive(Clone)]
pub struct Services {
    pub authenticator: Arc<dyn Authenticator>,
    pub users: Arc<dyn UserDirectory>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub cache: Arc<dyn KeyValueStore>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            authenticator: Arc::new(DevAuthenticator),
            users: Arc::new(PlaceholderUserDirectory),
            rooms: Arc::new(StaticRoomDirectory::default()),
            cache: Arc::new(MemoryStore::new()),
        }
    }
}
