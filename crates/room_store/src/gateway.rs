//! The transactional gateway contract.

use chrono::{DateTime, Utc};
use room_protocol::{GameId, RoomId, UserId};

use crate::error::StoreError;
use crate::model::{Membership, NewRoom, Room, RoomListing, UserRecord};

/// Primitive reads and writes available inside one transaction.
///
/// Implementations must make every call observe the writes made earlier in
/// the same transaction.
pub trait RoomTx {
    fn user(&mut self, user: UserId) -> Result<Option<UserRecord>, StoreError>;

    fn user_name(&mut self, user: UserId) -> Result<Option<String>, StoreError> {
        Ok(self.user(user)?.map(|record| record.user_name))
    }

    fn game_name(&mut self, game: GameId) -> Result<Option<String>, StoreError>;

    /// Inserts an `Active` room and returns its id.
    fn insert_room(&mut self, room: &NewRoom) -> Result<RoomId, StoreError>;

    fn room(&mut self, room: RoomId) -> Result<Option<Room>, StoreError>;

    /// Marks the room `Closed` and stamps its end time.
    fn close_room(&mut self, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn membership(
        &mut self,
        user: UserId,
        room: RoomId,
    ) -> Result<Option<Membership>, StoreError>;

    fn insert_membership(
        &mut self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Clears the leave time of an existing row and resets its join time.
    fn reopen_membership(
        &mut self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Stamps the leave time of an active row.
    fn end_membership(
        &mut self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Users whose membership of the room has no leave time, in join order.
    fn active_members(&mut self, room: RoomId) -> Result<Vec<UserId>, StoreError>;

    fn active_member_count(&mut self, room: RoomId) -> Result<u32, StoreError>;

    /// Active rooms, optionally restricted to one game, oldest first.
    fn active_rooms(&mut self, game: Option<GameId>) -> Result<Vec<RoomListing>, StoreError>;

    /// Rooms in which the user currently holds an active membership.
    fn rooms_joined_by(&mut self, user: UserId) -> Result<Vec<RoomId>, StoreError>;
}

/// A durable store that runs bodies atomically.
pub trait RoomStore: Send + Sync {
    /// Runs `body` inside a single transaction.
    ///
    /// Commits when the body returns `Ok`. Any error from the body, or from the
    /// store itself, rolls back every write the body made.
    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn RoomTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

impl<'s> dyn RoomStore + 's {
    /// Typed wrapper over [`RoomStore::run_transaction`].
    ///
    /// The body may fail with its own error type; the transaction is rolled
    /// back and that error is returned unchanged.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn RoomTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut body = Some(f);
        let mut outcome: Option<Result<T, E>> = None;

        let result = self.run_transaction(&mut |tx: &mut dyn RoomTx| {
            let f = body
                .take()
                .ok_or_else(|| StoreError::Database("transaction body ran twice".into()))?;
            match f(tx) {
                Ok(value) => {
                    outcome = Some(Ok(value));
                    Ok(())
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    Err(StoreError::Aborted)
                }
            }
        });

        match (result, outcome) {
            (Err(StoreError::Aborted), Some(Err(err))) => Err(err),
            (Ok(()), Some(Ok(value))) => Ok(value),
            (Err(err), _) => Err(E::from(err)),
            (Ok(()), _) => Err(E::from(StoreError::Database(
                "transaction committed without running its body".into(),
            ))),
        }
    }
}
