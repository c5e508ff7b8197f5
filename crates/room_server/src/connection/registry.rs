//! Session registry: which connection currently represents each user.

use crate::connection::ConnectionHandle;
use crate::error::RoomError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use room_protocol::UserId;
use tracing::debug;

/// Process-wide map from signed-in user to live connection.
///
/// Every operation is atomic with respect to the others; a lookup made after
/// a register or unregister returns observes it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, ConnectionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `user` to `handle`, failing if the user already has a session.
    pub fn register(&self, user: UserId, handle: ConnectionHandle) -> Result<(), RoomError> {
        match self.sessions.entry(user) {
            Entry::Occupied(_) => Err(RoomError::AlreadySignedIn(user)),
            Entry::Vacant(slot) => {
                debug!(user = %user, connection = %handle.id(), "session registered");
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Removes the user's session. Absent users are ignored.
    pub fn unregister(&self, user: UserId) -> Option<ConnectionHandle> {
        let removed = self.sessions.remove(&user).map(|(_, handle)| handle);
        if let Some(handle) = &removed {
            debug!(user = %user, connection = %handle.id(), "session unregistered");
        }
        removed
    }

    pub fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.sessions.get(&user).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
