//! Server runtime: shared context, accept loop and per-connection workers.

pub mod context;
pub mod core;
mod handlers;

pub use context::ServerContext;
pub use self::core::RoomServer;
