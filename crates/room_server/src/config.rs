//! Server configuration types and defaults.

use crate::rooms::AdmissionScope;
use room_protocol::FrameConfig;
use std::net::{Ipv4Addr, SocketAddr};

/// Configuration structure for the room server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Largest frame payload accepted or sent, in bytes
    pub max_frame_bytes: u32,

    /// Frames buffered per connection before pushes to it are dropped
    pub outbound_queue_depth: usize,

    /// Upper bound for the capacity of a new room
    pub max_room_capacity: u32,

    /// Granularity of the join admission lock
    pub admission_scope: AdmissionScope,
}

impl ServerConfig {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_frame_bytes,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            max_connections: 1000,
            max_frame_bytes: FrameConfig::default().max_payload_size,
            outbound_queue_depth: 256,
            max_room_capacity: 64,
            admission_scope: AdmissionScope::Global,
        }
    }
}
