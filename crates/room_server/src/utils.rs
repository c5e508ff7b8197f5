//! Convenience constructors.

use crate::{config::ServerConfig, server::RoomServer};
use room_store::RoomStore;
use std::sync::Arc;

/// Creates a server with the default configuration.
pub fn create_server(store: Arc<dyn RoomStore>) -> RoomServer {
    RoomServer::new(ServerConfig::default(), store)
}

/// Creates a server with a custom configuration.
pub fn create_server_with_config(config: ServerConfig, store: Arc<dyn RoomStore>) -> RoomServer {
    RoomServer::new(config, store)
}
