//! Best-effort fan-out of pushes to room members.
//!
//! A push is encoded once and the frame is shared by every recipient. Each
//! delivery is a single non-blocking enqueue on the recipient's outbound
//! queue: an offline user, a closed connection or a full queue drops that one
//! delivery. Nothing is retried, queued for later or persisted.

use crate::connection::{ConnectionHandle, SessionRegistry};
use crate::error::RoomError;
use crate::gateway;
use chrono::Utc;
use room_protocol::framing::encode;
use room_protocol::{
    ChatEvent, FrameConfig, RequestType, Response, RoomId, ServerMessage, UserId,
};
use room_store::RoomStore;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Timestamp format used when a chat message arrives without one.
const CHAT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of one fan-out, for logs and tests. Never shown to the requester.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct BroadcastDispatcher {
    store: Arc<dyn RoomStore>,
    sessions: Arc<SessionRegistry>,
    frame_config: FrameConfig,
}

impl BroadcastDispatcher {
    pub fn new(
        store: Arc<dyn RoomStore>,
        sessions: Arc<SessionRegistry>,
        frame_config: FrameConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            frame_config,
        }
    }

    /// Pushes `message` to every current member of `room` except `exclude`.
    ///
    /// Only resolving the member list can fail; individual deliveries cannot.
    pub async fn broadcast(
        &self,
        room: RoomId,
        message: &ServerMessage,
        exclude: Option<UserId>,
    ) -> Result<DeliveryReport, RoomError> {
        let members =
            gateway::transaction(&self.store, move |tx| Ok(tx.active_members(room)?)).await?;
        let recipients = members.into_iter().filter(|member| Some(*member) != exclude);
        Ok(self.notify(recipients, message))
    }

    /// Pushes `message` to an explicit list of users.
    pub fn notify(
        &self,
        recipients: impl IntoIterator<Item = UserId>,
        message: &ServerMessage,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let frame = match encode(message, &self.frame_config) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                error!("Failed to encode push: {}", e);
                report.dropped = recipients.into_iter().count();
                return report;
            }
        };

        for user in recipients {
            let Some(handle) = self.sessions.lookup(user) else {
                debug!(user = %user, "push dropped: user not connected");
                report.dropped += 1;
                continue;
            };
            match handle.send_frame(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(user = %user, connection = %handle.id(), "push dropped: {}", e);
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Relays one chat line to the other members of a room.
    ///
    /// The sender is acknowledged on `sender` before the fan-out starts and
    /// never receives its own line back. Once acknowledged, nothing about the
    /// fan-out is reported to the sender: a failure to resolve the members is
    /// logged and yields an empty report.
    pub async fn send_chat(
        &self,
        sender: &ConnectionHandle,
        room: RoomId,
        from: UserId,
        timestamp: Option<String>,
        content: String,
    ) -> Result<DeliveryReport, RoomError> {
        if content.trim().is_empty() {
            return Err(RoomError::Validation("Message content must not be empty".into()));
        }

        let from_name = gateway::transaction(&self.store, move |tx| -> Result<String, RoomError> {
            let record = tx.room(room)?.ok_or(RoomError::RoomNotFound(room))?;
            if !record.is_active() {
                return Err(RoomError::RoomClosed(room));
            }
            let member = tx
                .membership(from, room)?
                .is_some_and(|membership| membership.is_active());
            if !member {
                return Err(RoomError::NotMember { user: from, room });
            }
            tx.user_name(from)?.ok_or(RoomError::UserNotFound(from))
        })
        .await?;

        if let Err(e) = sender.respond(Response::ack(RequestType::RoomChat)).await {
            debug!(user = %from, "chat ack not delivered: {}", e);
        }

        let event = ChatEvent {
            room_id: room,
            from_user_id: from,
            from_user_name: from_name,
            timestamp: timestamp
                .unwrap_or_else(|| Utc::now().format(CHAT_TIMESTAMP_FORMAT).to_string()),
            content,
        };
        let report = match self.broadcast(room, &event.into(), Some(from)).await {
            Ok(report) => report,
            Err(e) => {
                error!(room = %room, user = %from, "chat not relayed: {}", e);
                return Ok(DeliveryReport::default());
            }
        };
        debug!(
            room = %room,
            delivered = report.delivered,
            dropped = report.dropped,
            "chat relayed"
        );
        Ok(report)
    }
}
