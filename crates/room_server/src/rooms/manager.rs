//! Room lifecycle: creation, admission-controlled joins, leaves and the host
//! cascade close.
//!
//! Every operation runs as one gateway transaction, so a failure leaves the
//! room exactly as it was. Pushes go out only after the transaction commits
//! and after the admission lock is released.

use crate::broadcast::BroadcastDispatcher;
use crate::error::RoomError;
use crate::gateway;
use crate::rooms::admission::{AdmissionControl, AdmissionScope};
use chrono::Utc;
use room_protocol::{
    ControlEvent, ControlKind, CreatedRoom, GameId, JoinedRoom, RoomId, RoomList, ServerMessage,
    UserId,
};
use room_store::{NewRoom, RoomStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a successful `leave_room` did to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// A regular member left; the room stays open.
    Left,
    /// The host left; the room is now closed and every member was released.
    Closed,
}

struct Admitted {
    details: JoinedRoom,
    newly_joined: bool,
    user_name: String,
}

enum Departure {
    Left { user_name: String },
    Closed { user_name: String, notify: Vec<UserId> },
}

pub struct RoomManager {
    store: Arc<dyn RoomStore>,
    dispatcher: Arc<BroadcastDispatcher>,
    admission: AdmissionControl,
    max_capacity: u32,
}

impl RoomManager {
    pub fn new(
        store: Arc<dyn RoomStore>,
        dispatcher: Arc<BroadcastDispatcher>,
        scope: AdmissionScope,
        max_capacity: u32,
    ) -> Self {
        Self {
            store,
            dispatcher,
            admission: AdmissionControl::new(scope),
            max_capacity,
        }
    }

    pub fn admission_scope(&self) -> AdmissionScope {
        self.admission.scope()
    }

    #[cfg(test)]
    pub(crate) fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    /// Creates an active room with the host as its first member.
    pub async fn create_room(
        &self,
        host: UserId,
        name: &str,
        game: GameId,
        capacity: u32,
    ) -> Result<CreatedRoom, RoomError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomError::Validation("Room name must not be empty".into()));
        }
        if capacity == 0 || capacity > self.max_capacity {
            return Err(RoomError::Validation(format!(
                "Capacity must be between 1 and {}",
                self.max_capacity
            )));
        }

        let room_name = name.to_string();
        let created = gateway::transaction(&self.store, move |tx| -> Result<CreatedRoom, RoomError> {
            if tx.user(host)?.is_none() {
                return Err(RoomError::UserNotFound(host));
            }
            let game_name = tx.game_name(game)?.ok_or(RoomError::GameNotFound(game))?;

            let now = Utc::now();
            let room_id = tx.insert_room(&NewRoom {
                name: room_name,
                host_id: host,
                game_id: game,
                capacity,
                start_time: now,
            })?;
            tx.insert_membership(host, room_id, now)?;

            Ok(CreatedRoom { room_id, game_name })
        })
        .await?;

        info!(
            "🏠 Room {} '{}' created by user {} (capacity {})",
            created.room_id, name, host, capacity
        );
        Ok(created)
    }

    /// Admits `user` into `room` if it is active and below capacity.
    ///
    /// The count check and the membership write happen under the admission
    /// lock, so concurrent joins can never push a room over capacity. A user
    /// who is already an active member gets the room details back without
    /// consuming capacity or producing an event.
    pub async fn join_room(&self, user: UserId, room: RoomId) -> Result<JoinedRoom, RoomError> {
        let guard = self.admission.acquire(room).await;

        let admitted = gateway::transaction(&self.store, move |tx| -> Result<Admitted, RoomError> {
            let record = tx.room(room)?.ok_or(RoomError::RoomNotFound(room))?;
            if !record.is_active() {
                return Err(RoomError::RoomClosed(room));
            }

            let existing = tx.membership(user, room)?;
            let already_member = existing.as_ref().is_some_and(|m| m.is_active());
            if !already_member {
                let active = tx.active_member_count(room)?;
                if active >= record.capacity {
                    return Err(RoomError::RoomFull {
                        room,
                        capacity: record.capacity,
                    });
                }
                let now = Utc::now();
                match existing {
                    Some(_) => tx.reopen_membership(user, room, now)?,
                    None => tx.insert_membership(user, room, now)?,
                }
            }

            let user_name = tx.user_name(user)?.ok_or(RoomError::UserNotFound(user))?;
            let room_host = tx
                .user_name(record.host_id)?
                .ok_or(RoomError::UserNotFound(record.host_id))?;
            let game_name = tx
                .game_name(record.game_id)?
                .ok_or(RoomError::GameNotFound(record.game_id))?;
            let member_count = tx.active_member_count(room)?;

            Ok(Admitted {
                details: JoinedRoom {
                    room_id: room,
                    room_name: record.name,
                    room_host,
                    game_name,
                    member_count,
                    capacity_limit: record.capacity,
                },
                newly_joined: !already_member,
                user_name,
            })
        })
        .await;

        drop(guard);
        let admitted = admitted?;

        if admitted.newly_joined {
            info!(
                "👋 User {} joined room {} ({}/{})",
                user, room, admitted.details.member_count, admitted.details.capacity_limit
            );
            self.announce(room, ControlKind::Join, user, admitted.user_name).await;
        } else {
            debug!(user = %user, room = %room, "join ignored: already a member");
        }

        Ok(admitted.details)
    }

    /// Ends the caller's membership. When the caller hosts the room this
    /// closes it: every remaining member is released and notified.
    pub async fn leave_room(&self, user: UserId, room: RoomId) -> Result<LeaveOutcome, RoomError> {
        let guard = self.admission.acquire(room).await;

        let departure = gateway::transaction(&self.store, move |tx| -> Result<Departure, RoomError> {
            let record = tx.room(room)?.ok_or(RoomError::RoomNotFound(room))?;
            let member = tx
                .membership(user, room)?
                .is_some_and(|m| m.is_active());
            if !member {
                return Err(RoomError::NotMember { user, room });
            }

            let user_name = tx.user_name(user)?.ok_or(RoomError::UserNotFound(user))?;
            let now = Utc::now();

            if record.host_id == user && record.is_active() {
                let members = tx.active_members(room)?;
                for member in &members {
                    tx.end_membership(*member, room, now)?;
                }
                tx.close_room(room, now)?;
                let notify = members.into_iter().filter(|m| *m != user).collect();
                Ok(Departure::Closed { user_name, notify })
            } else {
                tx.end_membership(user, room, now)?;
                Ok(Departure::Left { user_name })
            }
        })
        .await;

        drop(guard);

        match departure? {
            Departure::Left { user_name } => {
                info!("🚪 User {} left room {}", user, room);
                self.announce(room, ControlKind::Leave, user, user_name).await;
                Ok(LeaveOutcome::Left)
            }
            Departure::Closed { user_name, notify } => {
                let event = ServerMessage::RoomControl(ControlEvent {
                    room_id: room,
                    kind: ControlKind::Close,
                    subject_user_id: user,
                    subject_user_name: user_name,
                });
                let report = self.dispatcher.notify(notify, &event);
                info!(
                    "🔒 Room {} closed by host {} ({} notified, {} dropped)",
                    room, user, report.delivered, report.dropped
                );
                Ok(LeaveOutcome::Closed)
            }
        }
    }

    /// Lists active rooms, optionally for one game only.
    pub async fn list_rooms(&self, game: Option<GameId>) -> Result<RoomList, RoomError> {
        let listings =
            gateway::transaction(&self.store, move |tx| Ok(tx.active_rooms(game)?)).await?;
        Ok(RoomList {
            rooms: listings.into_iter().map(Into::into).collect(),
        })
    }

    /// Leaves every room the user is active in, exactly as explicit leaves
    /// would. Returns the number of rooms released.
    pub async fn release_all(&self, user: UserId) -> usize {
        let lookup = gateway::transaction(&self.store, move |tx| Ok(tx.rooms_joined_by(user)?));
        let rooms = match lookup.await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(user = %user, "could not resolve rooms to release: {}", e);
                return 0;
            }
        };

        let mut released = 0;
        for room in rooms {
            match self.leave_room(user, room).await {
                Ok(_) => released += 1,
                // Lost a race with the host closing the room.
                Err(RoomError::NotMember { .. }) => {}
                Err(e) => warn!(user = %user, room = %room, "release failed: {:?}", e),
            }
        }
        released
    }

    async fn announce(&self, room: RoomId, kind: ControlKind, subject: UserId, subject_name: String) {
        let event = ServerMessage::RoomControl(ControlEvent {
            room_id: room,
            kind,
            subject_user_id: subject,
            subject_user_name: subject_name,
        });
        match self.dispatcher.broadcast(room, &event, Some(subject)).await {
            Ok(report) => debug!(
                room = %room,
                delivered = report.delivered,
                dropped = report.dropped,
                "{:?} event fanned out",
                kind
            ),
            Err(e) => warn!(room = %room, "{:?} event not sent: {:?}", kind, e),
        }
    }
}
