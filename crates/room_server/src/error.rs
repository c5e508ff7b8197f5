//! Error types for the room server.
//!
//! [`RoomError`] is recovered at the request boundary and turned into a
//! failure response; [`ServerError`] is fatal to a connection or to the
//! server itself.

use room_protocol::{ErrorKind, GameId, RoomId, TransportError, UserId};
use room_store::StoreError;

/// Per-request failure. The `Display` text is what the client sees.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("{0}")]
    Validation(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Cannot act on behalf of another user")]
    UserMismatch { signed_in: UserId, claimed: UserId },

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("User not found")]
    UserNotFound(UserId),

    #[error("Game not found")]
    GameNotFound(GameId),

    #[error("Room not found")]
    RoomNotFound(RoomId),

    #[error("Room is closed")]
    RoomClosed(RoomId),

    #[error("Not a member of this room")]
    NotMember { user: UserId, room: RoomId },

    #[error("Room is full")]
    RoomFull { room: RoomId, capacity: u32 },

    #[error("User is already signed in")]
    AlreadySignedIn(UserId),

    #[error("Connection is already signed in")]
    SessionActive,

    /// Store failures never leak details to the client.
    #[error("Unknown error")]
    Store(#[from] StoreError),
}

impl RoomError {
    /// The wire category of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoomError::Validation(_) => ErrorKind::Validation,
            RoomError::NotSignedIn
            | RoomError::UserMismatch { .. }
            | RoomError::AuthenticationFailed => ErrorKind::Unauthorized,
            RoomError::UserNotFound(_)
            | RoomError::GameNotFound(_)
            | RoomError::RoomNotFound(_)
            | RoomError::RoomClosed(_)
            | RoomError::NotMember { .. } => ErrorKind::NotFound,
            RoomError::RoomFull { .. } => ErrorKind::Capacity,
            RoomError::AlreadySignedIn(_) | RoomError::SessionActive => ErrorKind::Conflict,
            RoomError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Errors that end a connection or stop the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] TransportError),

}
