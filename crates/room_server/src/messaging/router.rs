//! Message routing logic for dispatching client requests.
//!
//! Every request is answered with exactly one response carrying its
//! `requestType`. Per-request failures become failure responses here; only
//! transport errors propagate to the connection handler.

use crate::connection::ClientConnection;
use crate::error::{RoomError, ServerError};
use crate::server::ServerContext;
use room_protocol::{ErrorKind, Request, RequestType, Response, ResponseData, UserId};
use serde_json::Value;
use tracing::{debug, error, info};

/// Whether the connection should keep reading after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

enum Reply {
    Respond(Response),
    /// The handler already answered on the connection.
    Sent,
    Exit,
}

/// Routes one decoded frame from a client.
///
/// # Message Flow
///
/// 1. Read the `requestType` tag and map it onto [`RequestType`]
/// 2. Decode the full [`Request`] for that command
/// 3. Dispatch to the session, room or chat operation
/// 4. Answer with a success or failure [`Response`]
///
/// # Example Message Format
///
/// ```json
/// {
///   "requestType": "create room",
///   "hostUserID": 1,
///   "roomName": "Friday raid",
///   "gameID": 12,
///   "capacityLimit": 4
/// }
/// ```
pub async fn route_client_message(
    payload: Value,
    client: &mut ClientConnection,
    context: &ServerContext,
) -> Result<Flow, ServerError> {
    let request_type = match payload.get("requestType").and_then(Value::as_str) {
        Some(tag) => match tag.parse::<RequestType>() {
            Ok(request_type) => request_type,
            Err(e) => {
                debug!(connection = %client.handle.id(), "rejected request: {}", e);
                client
                    .handle
                    .respond(Response::fail(None, ErrorKind::Validation, e.to_string()))
                    .await?;
                return Ok(Flow::Continue);
            }
        },
        None => {
            client
                .handle
                .respond(Response::fail(
                    None,
                    ErrorKind::Validation,
                    "Missing requestType",
                ))
                .await?;
            return Ok(Flow::Continue);
        }
    };

    let request: Request = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => {
            debug!(connection = %client.handle.id(), "malformed '{}' request: {}", request_type, e);
            client
                .handle
                .respond(Response::fail(
                    Some(request_type),
                    ErrorKind::Validation,
                    format!("Invalid {request_type} request: {e}"),
                ))
                .await?;
            return Ok(Flow::Continue);
        }
    };

    debug!(
        connection = %client.handle.id(),
        user = ?client.user,
        "📨 Routing '{}' request",
        request_type
    );

    match dispatch(request, client, context).await {
        Ok(Reply::Respond(response)) => {
            client.handle.respond(response).await?;
            Ok(Flow::Continue)
        }
        Ok(Reply::Sent) => Ok(Flow::Continue),
        Ok(Reply::Exit) => {
            client.handle.respond(Response::ack(RequestType::Exit)).await?;
            Ok(Flow::Exit)
        }
        Err(err) => {
            match &err {
                RoomError::Store(source) => {
                    error!(
                        connection = %client.handle.id(),
                        "'{}' failed in the store: {}", request_type, source
                    );
                }
                other => debug!(
                    connection = %client.handle.id(),
                    "'{}' rejected: {}", request_type, other
                ),
            }
            client
                .handle
                .respond(Response::fail(Some(request_type), err.kind(), err.to_string()))
                .await?;
            Ok(Flow::Continue)
        }
    }
}

async fn dispatch(
    request: Request,
    client: &mut ClientConnection,
    context: &ServerContext,
) -> Result<Reply, RoomError> {
    if request.request_type().requires_session() && client.user.is_none() {
        return Err(RoomError::NotSignedIn);
    }

    match request {
        Request::Exit { .. } => Ok(Reply::Exit),

        Request::SignIn { user_id, password } => {
            let signed_in = context.sign_in(client, user_id, &password).await?;
            Ok(Reply::Respond(Response::ok(
                RequestType::SignIn,
                ResponseData::SignedIn(signed_in),
            )))
        }

        Request::CreateRoom {
            host_user_id,
            room_name,
            game_id,
            capacity_limit,
        } => {
            let host = acting_user(client, host_user_id)?;
            let created = context
                .rooms()
                .create_room(host, &room_name, game_id, capacity_limit)
                .await?;
            Ok(Reply::Respond(Response::ok(
                RequestType::CreateRoom,
                ResponseData::Created(created),
            )))
        }

        Request::JoinRoom { user_id, room_id } => {
            let user = acting_user(client, user_id)?;
            let joined = context.rooms().join_room(user, room_id).await?;
            Ok(Reply::Respond(Response::ok(
                RequestType::JoinRoom,
                ResponseData::Joined(joined),
            )))
        }

        Request::LeaveRoom { user_id, room_id } => {
            let user = acting_user(client, user_id)?;
            context.rooms().leave_room(user, room_id).await?;
            Ok(Reply::Respond(Response::ack(RequestType::LeaveRoom)))
        }

        Request::ListRooms { game_id } => {
            let rooms = context.rooms().list_rooms(game_id).await?;
            Ok(Reply::Respond(Response::ok(
                RequestType::ListRooms,
                ResponseData::Rooms(rooms),
            )))
        }

        Request::RoomChat {
            room_id,
            from_user_id,
            timestamp,
            content,
        } => {
            let from = acting_user(client, from_user_id)?;
            context
                .dispatcher()
                .send_chat(&client.handle, room_id, from, timestamp, content)
                .await?;
            Ok(Reply::Sent)
        }
    }
}

/// Resolves the user a room command acts for.
///
/// The connection must be signed in, and as the same user it claims to be.
fn acting_user(client: &ClientConnection, claimed: UserId) -> Result<UserId, RoomError> {
    match client.user {
        None => Err(RoomError::NotSignedIn),
        Some(signed_in) if signed_in != claimed => {
            info!(
                connection = %client.handle.id(),
                "user {} attempted to act as user {}", signed_in, claimed
            );
            Err(RoomError::UserMismatch { signed_in, claimed })
        }
        Some(signed_in) => Ok(signed_in),
    }
}
