//! # Room Server
//!
//! The real-time core of Together: it tracks which users are connected, lets
//! them form capacity-limited rooms, and fans chat and membership events out
//! to the other members of a room over each client's single connection.
//!
//! ## Architecture Overview
//!
//! * **Session Registry** ([`SessionRegistry`]) - signed-in user to live connection
//! * **Room Manager** ([`RoomManager`]) - create, join, leave and host cascade close
//! * **Broadcast Dispatcher** ([`BroadcastDispatcher`]) - best-effort pushes
//! * **Persistence Gateway** ([`room_store::RoomStore`]) - atomic room and membership writes
//!
//! ### Message Flow
//!
//! 1. A worker task is spawned per accepted connection
//! 2. Frames are decoded and routed by `requestType`
//! 3. Sign-in registers the connection in the session registry
//! 4. Room commands run as one store transaction each, then notify members
//! 5. The worker unregisters the session and releases its rooms on the way out
//!
//! ## Concurrency
//!
//! Joins are admitted under an admission lock (one global lock by default,
//! optionally one per room), so a room never holds more active members than
//! its capacity however joins interleave. Pushes are never awaited: each is
//! a non-blocking enqueue on the recipient's bounded outbound queue.

pub use broadcast::{BroadcastDispatcher, DeliveryReport};
pub use config::ServerConfig;
pub use connection::{ClientConnection, ConnectionHandle, SessionRegistry};
pub use error::{RoomError, ServerError};
pub use messaging::{route_client_message, Flow};
pub use rooms::{AdmissionScope, LeaveOutcome, RoomManager};
pub use server::{RoomServer, ServerContext};
pub use utils::{create_server, create_server_with_config};

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
mod gateway;
pub mod messaging;
pub mod rooms;
pub mod server;
pub mod utils;

#[cfg(test)]
mod testing;
