//! Request parsing and dispatch.

pub mod router;

pub use router::{route_client_message, Flow};
