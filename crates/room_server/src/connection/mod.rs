//! Connection management for client connections.
//!
//! This module handles the outbound side of every client connection and the
//! process-wide mapping from signed-in users to their live connection.

pub mod client;
pub mod handle;
pub mod registry;

pub use client::ClientConnection;
pub use handle::ConnectionHandle;
pub use registry::SessionRegistry;
