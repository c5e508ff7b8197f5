//! # Room Protocol
//!
//! Wire-level building blocks shared by the Together room server and its
//! clients. A client holds exactly one TCP connection to the server and
//! exchanges JSON messages over it in both directions.
//!
//! ## Message Flow
//!
//! 1. The client sends a [`Request`] tagged by `requestType`
//! 2. The server answers with exactly one [`Response`] carrying the same tag
//! 3. At any time the server may push a [`ControlEvent`] or [`ChatEvent`]
//!
//! Pushes are not ordered relative to responses, so every outbound message
//! is wrapped in [`ServerMessage`] and tagged by `messageType`.
//!
//! ## Framing
//!
//! Every JSON document travels inside a length-prefixed frame (see
//! [`framing`]). Message boundaries never depend on read timing.

pub mod framing;
pub mod ids;
pub mod messages;

pub use framing::{
    encode, frame_payload, read_frame, receive, send, write_frame, FrameConfig, TransportError,
};
pub use ids::{ConnectionId, GameId, RoomId, UserId};
pub use messages::{
    Ack, ChatEvent, ControlEvent, ControlKind, CreatedRoom, ErrorKind, JoinedRoom, Request,
    RequestType, Response, ResponseData, RoomList, RoomSummary, ServerMessage, SignedIn, Status,
    UnknownRequestType,
};
