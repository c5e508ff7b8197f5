use chrono::{DateTime, Utc};
use room_protocol::{GameId, RoomId, RoomSummary, UserId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a room. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Active,
    Closed,
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl std::str::FromStr for RoomStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Closed" => Ok(Self::Closed),
            other => Err(format!("unknown room status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub host_id: UserId,
    pub game_id: GameId,
    pub capacity: u32,
    pub status: RoomStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Room {
    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }
}

/// One participation interval of a user in a room.
///
/// There is at most one row per (user, room); re-joining reopens it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Membership {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub join_time: DateTime<Utc>,
    pub leave_time: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.leave_time.is_none()
    }
}

/// Fields needed to create a room.
#[derive(Clone, Debug)]
pub struct NewRoom {
    pub name: String,
    pub host_id: UserId,
    pub game_id: GameId,
    pub capacity: u32,
    pub start_time: DateTime<Utc>,
}

/// An active room joined with its game, host and live member count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomListing {
    pub room_id: RoomId,
    pub room_name: String,
    pub game_id: GameId,
    pub game_name: String,
    pub host_id: UserId,
    pub host_name: String,
    pub member_count: u32,
    pub capacity: u32,
}

impl From<RoomListing> for RoomSummary {
    fn from(listing: RoomListing) -> Self {
        RoomSummary {
            room_id: listing.room_id,
            room_name: listing.room_name,
            game_name: listing.game_name,
            host_id: listing.host_id,
            host_name: listing.host_name,
            member_count: listing.member_count,
            capacity_limit: listing.capacity,
        }
    }
}

/// Account fields the server needs for sign-in and display names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub user_name: String,
    pub role: String,
    pub password: String,
}
