//! Message type definitions for client-server communication.
//!
//! Field names follow the established wire format (`userID`, `roomName`,
//! `capacityLimit`, ...), so every field carries an explicit rename.

use crate::ids::{GameId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of commands a client may issue.
///
/// The wire name of each command is its `requestType` string. Dispatch on the
/// server happens over this enum, never over raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    #[serde(rename = "exit")]
    Exit,
    #[serde(rename = "sign in")]
    SignIn,
    #[serde(rename = "create room")]
    CreateRoom,
    #[serde(rename = "join room")]
    JoinRoom,
    #[serde(rename = "leave room")]
    LeaveRoom,
    #[serde(rename = "list rooms")]
    ListRooms,
    #[serde(rename = "room chat", alias = "room communication")]
    RoomChat,
}

impl RequestType {
    /// Every command, in wire order.
    pub const ALL: [RequestType; 7] = [
        RequestType::Exit,
        RequestType::SignIn,
        RequestType::CreateRoom,
        RequestType::JoinRoom,
        RequestType::LeaveRoom,
        RequestType::ListRooms,
        RequestType::RoomChat,
    ];

    /// The `requestType` string used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Exit => "exit",
            RequestType::SignIn => "sign in",
            RequestType::CreateRoom => "create room",
            RequestType::JoinRoom => "join room",
            RequestType::LeaveRoom => "leave room",
            RequestType::ListRooms => "list rooms",
            RequestType::RoomChat => "room chat",
        }
    }

    /// Whether the command acts on behalf of a signed-in user.
    pub fn requires_session(self) -> bool {
        matches!(
            self,
            RequestType::CreateRoom
                | RequestType::JoinRoom
                | RequestType::LeaveRoom
                | RequestType::RoomChat
        )
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a `requestType` string names no known command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown request type: {0}")]
pub struct UnknownRequestType(pub String);

impl FromStr for RequestType {
    type Err = UnknownRequestType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "room communication" => Ok(RequestType::RoomChat),
            other => RequestType::ALL
                .into_iter()
                .find(|kind| kind.as_str() == other)
                .ok_or_else(|| UnknownRequestType(other.to_string())),
        }
    }
}

/// A request sent from a client to the server.
///
/// # Example
///
/// ```json
/// {
///   "requestType": "join room",
///   "userID": 3,
///   "roomID": 12
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "requestType")]
pub enum Request {
    #[serde(rename = "exit")]
    Exit {
        #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    #[serde(rename = "sign in")]
    SignIn {
        #[serde(rename = "userID")]
        user_id: UserId,
        password: String,
    },
    #[serde(rename = "create room")]
    CreateRoom {
        #[serde(rename = "hostUserID", alias = "userID")]
        host_user_id: UserId,
        #[serde(rename = "roomName")]
        room_name: String,
        #[serde(rename = "gameID")]
        game_id: GameId,
        #[serde(rename = "capacityLimit")]
        capacity_limit: u32,
    },
    #[serde(rename = "join room")]
    JoinRoom {
        #[serde(rename = "userID")]
        user_id: UserId,
        #[serde(rename = "roomID")]
        room_id: RoomId,
    },
    #[serde(rename = "leave room")]
    LeaveRoom {
        #[serde(rename = "userID")]
        user_id: UserId,
        #[serde(rename = "roomID")]
        room_id: RoomId,
    },
    #[serde(rename = "list rooms")]
    ListRooms {
        #[serde(rename = "gameID", default, skip_serializing_if = "Option::is_none")]
        game_id: Option<GameId>,
    },
    #[serde(rename = "room chat", alias = "room communication")]
    RoomChat {
        #[serde(rename = "roomID")]
        room_id: RoomId,
        #[serde(rename = "fromUserID")]
        from_user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        content: String,
    },
}

impl Request {
    /// The command tag of this request.
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Exit { .. } => RequestType::Exit,
            Request::SignIn { .. } => RequestType::SignIn,
            Request::CreateRoom { .. } => RequestType::CreateRoom,
            Request::JoinRoom { .. } => RequestType::JoinRoom,
            Request::LeaveRoom { .. } => RequestType::LeaveRoom,
            Request::ListRooms { .. } => RequestType::ListRooms,
            Request::RoomChat { .. } => RequestType::RoomChat,
        }
    }
}

/// Outcome marker of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
}

/// Category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing request fields.
    Validation,
    /// The room, user or game does not exist (or the room is closed).
    NotFound,
    /// The room is at capacity.
    Capacity,
    /// The request conflicts with live state, e.g. a second sign-in.
    Conflict,
    /// Not signed in, wrong credentials, or acting for another user.
    Unauthorized,
    /// The store failed; details are only logged server-side.
    Internal,
}

/// Payload of a successful `create room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRoom {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    #[serde(rename = "gameName")]
    pub game_name: String,
}

/// Payload of a successful `join room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedRoom {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    #[serde(rename = "roomName")]
    pub room_name: String,
    #[serde(rename = "roomHost")]
    pub room_host: String,
    #[serde(rename = "gameName")]
    pub game_name: String,
    #[serde(rename = "memberCount")]
    pub member_count: u32,
    #[serde(rename = "capacityLimit")]
    pub capacity_limit: u32,
}

/// One entry of a `list rooms` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    #[serde(rename = "roomName")]
    pub room_name: String,
    #[serde(rename = "gameName")]
    pub game_name: String,
    #[serde(rename = "hostID")]
    pub host_id: UserId,
    #[serde(rename = "hostName")]
    pub host_name: String,
    #[serde(rename = "memberCount")]
    pub member_count: u32,
    #[serde(rename = "capacityLimit")]
    pub capacity_limit: u32,
}

/// Payload of a successful `list rooms`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomList {
    pub rooms: Vec<RoomSummary>,
}

/// Payload of a successful `sign in`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedIn {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub role: String,
}

/// Empty payload for acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ack {}

/// Command-specific fields of a response, flattened into the response object.
///
/// Variants are tried in declaration order when decoding, most specific first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Joined(JoinedRoom),
    Created(CreatedRoom),
    Rooms(RoomList),
    SignedIn(SignedIn),
    Ack(Ack),
}

/// The server's answer to exactly one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// The command being answered; absent only when the tag itself was unreadable.
    #[serde(rename = "requestType", default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
    pub status: Status,
    #[serde(rename = "errorKind", default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub data: ResponseData,
}

impl Response {
    /// Builds a success response.
    pub fn ok(request_type: RequestType, data: ResponseData) -> Self {
        Self {
            request_type: Some(request_type),
            status: Status::Ok,
            error_kind: None,
            error_message: None,
            data,
        }
    }

    /// Builds a success response with no payload.
    pub fn ack(request_type: RequestType) -> Self {
        Self::ok(request_type, ResponseData::Ack(Ack::default()))
    }

    /// Builds a failure response.
    pub fn fail(
        request_type: Option<RequestType>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_type,
            status: Status::Fail,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            data: ResponseData::Ack(Ack::default()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Kind of membership change announced to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Join,
    Leave,
    Close,
}

/// Push announcing a membership change in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    #[serde(rename = "event")]
    pub kind: ControlKind,
    #[serde(rename = "subjectUserID")]
    pub subject_user_id: UserId,
    #[serde(rename = "subjectUserName")]
    pub subject_user_name: String,
}

/// Push carrying one chat line to the other members of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    #[serde(rename = "fromUserID")]
    pub from_user_id: UserId,
    #[serde(rename = "fromUserName")]
    pub from_user_name: String,
    pub timestamp: String,
    pub content: String,
}

/// Everything the server writes to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum ServerMessage {
    #[serde(rename = "response")]
    Response(Response),
    #[serde(rename = "room control")]
    RoomControl(ControlEvent),
    #[serde(rename = "room chat")]
    RoomChat(ChatEvent),
}

impl ServerMessage {
    /// Whether this message was pushed rather than sent as a reply.
    pub fn is_push(&self) -> bool {
        !matches!(self, ServerMessage::Response(_))
    }
}

impl From<Response> for ServerMessage {
    fn from(response: Response) -> Self {
        ServerMessage::Response(response)
    }
}

impl From<ControlEvent> for ServerMessage {
    fn from(event: ControlEvent) -> Self {
        ServerMessage::RoomControl(event)
    }
}

impl From<ChatEvent> for ServerMessage {
    fn from(event: ChatEvent) -> Self {
        ServerMessage::RoomChat(event)
    }
}
