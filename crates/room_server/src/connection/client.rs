//! Per-connection state owned by the connection's reader task.

use crate::connection::ConnectionHandle;
use room_protocol::UserId;
use std::time::Instant;

/// Represents an individual client connection to the server.
///
/// Tracks the user bound to the connection once sign-in succeeds, alongside
/// the handle used to answer its requests.
#[derive(Debug)]
pub struct ClientConnection {
    /// Outbound handle for responses to this connection
    pub handle: ConnectionHandle,

    /// The signed-in user (None until sign-in succeeds)
    pub user: Option<UserId>,

    /// When this connection was established
    pub connected_at: Instant,
}

impl ClientConnection {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            user: None,
            connected_at: Instant::now(),
        }
    }
}
