//! Persistence gateway for the room server.
//!
//! The server never talks to a database directly. Every logical operation runs
//! as one [`RoomStore::transaction`] against the primitive reads and writes of
//! [`RoomTx`], so room status and membership rows change together or not at all.

pub mod error;
pub mod gateway;
pub mod model;
pub mod schema;
pub mod sqlite;

pub use error::StoreError;
pub use gateway::{RoomStore, RoomTx};
pub use model::{Membership, NewRoom, Room, RoomListing, RoomStatus, UserRecord};
pub use sqlite::SqliteStore;
