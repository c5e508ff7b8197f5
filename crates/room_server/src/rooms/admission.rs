//! Admission locks serializing the count-check-and-write of joins.

use dashmap::DashMap;
use room_protocol::RoomId;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How widely one admission lock is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionScope {
    /// One lock for every room in the process.
    #[default]
    Global,
    /// One lock per room; unrelated rooms admit in parallel.
    PerRoom,
}

impl AdmissionScope {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionScope::Global => "global",
            AdmissionScope::PerRoom => "per_room",
        }
    }
}

impl fmt::Display for AdmissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdmissionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(AdmissionScope::Global),
            "per_room" => Ok(AdmissionScope::PerRoom),
            other => Err(format!("unknown admission scope: {other}")),
        }
    }
}

/// Hands out admission guards. A guard is released when dropped, on every
/// exit path of the holder.
#[derive(Debug)]
pub struct AdmissionControl {
    scope: AdmissionScope,
    global: Arc<Mutex<()>>,
    rooms: DashMap<RoomId, Arc<Mutex<()>>>,
}

/// Holds the admission lock for one room.
///
/// Under the per-room scope the room's lock entry is removed once the last
/// holder or waiter lets go, so ids that never name a live room leave
/// nothing behind.
#[derive(Debug)]
pub struct AdmissionGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    control: &'a AdmissionControl,
    room: Option<RoomId>,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(room) = self.room {
            // Waiters hold a clone, so a count of one means only the map is left.
            self.control
                .rooms
                .remove_if(&room, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

impl AdmissionControl {
    pub fn new(scope: AdmissionScope) -> Self {
        Self {
            scope,
            global: Arc::new(Mutex::new(())),
            rooms: DashMap::new(),
        }
    }

    pub fn scope(&self) -> AdmissionScope {
        self.scope
    }

    /// Waits for the admission lock covering `room`.
    pub async fn acquire(&self, room: RoomId) -> AdmissionGuard<'_> {
        let (lock, tracked) = match self.scope {
            AdmissionScope::Global => (self.global.clone(), None),
            // The map shard lock is released before awaiting.
            AdmissionScope::PerRoom => (self.rooms.entry(room).or_default().clone(), Some(room)),
        };
        AdmissionGuard {
            guard: Some(lock.lock_owned().await),
            control: self,
            room: tracked,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_rooms(&self) -> usize {
        self.rooms.len()
    }
}
