//! Shared fixtures for unit tests.

use crate::broadcast::BroadcastDispatcher;
use crate::connection::handle::Frame;
use crate::connection::{ConnectionHandle, SessionRegistry};
use crate::rooms::{AdmissionScope, RoomManager};
use chrono::{DateTime, Utc};
use room_protocol::{FrameConfig, GameId, RoomId, ServerMessage, UserId};
use room_store::{
    Membership, NewRoom, Room, RoomListing, RoomStatus, RoomStore, RoomTx, SqliteStore,
    StoreError, UserRecord,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct Fixture {
    pub sqlite: SqliteStore,
    pub store: Arc<dyn RoomStore>,
    pub sessions: Arc<SessionRegistry>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub alice: UserId,
    pub bob: UserId,
    pub carol: UserId,
    pub game: GameId,
    queue_depth: usize,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_queue_depth(64)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        let sqlite = SqliteStore::in_memory().unwrap();
        let store: Arc<dyn RoomStore> = Arc::new(sqlite.clone());
        Self::build(sqlite, store, queue_depth)
    }

    /// A fixture whose services run on `FaultyStore` over the same database.
    pub fn faulty() -> (Self, Arc<FaultyStore>) {
        let sqlite = SqliteStore::in_memory().unwrap();
        let faulty = Arc::new(FaultyStore::new(sqlite.clone()));
        let fx = Self::build(sqlite, faulty.clone(), 64);
        (fx, faulty)
    }

    fn build(sqlite: SqliteStore, store: Arc<dyn RoomStore>, queue_depth: usize) -> Self {
        let alice = sqlite.create_user("alice", "pw-alice", "User").unwrap();
        let bob = sqlite.create_user("bob", "pw-bob", "User").unwrap();
        let carol = sqlite.create_user("carol", "pw-carol", "User").unwrap();
        let game = sqlite.create_game("Portal 2").unwrap();

        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            store.clone(),
            sessions.clone(),
            FrameConfig::default(),
        ));

        Self {
            sqlite,
            store,
            sessions,
            dispatcher,
            alice,
            bob,
            carol,
            game,
            queue_depth,
        }
    }

    pub fn manager(&self) -> RoomManager {
        self.manager_with_scope(AdmissionScope::Global)
    }

    pub fn manager_with_scope(&self, scope: AdmissionScope) -> RoomManager {
        RoomManager::new(self.store.clone(), self.dispatcher.clone(), scope, 64)
    }

    pub fn extra_users(&self, count: usize) -> Vec<UserId> {
        (0..count)
            .map(|i| self.sqlite.create_user(&format!("guest{i}"), "pw", "User").unwrap())
            .collect()
    }

    /// Opens a room hosted by alice with the given extra members, bypassing
    /// the manager so that no pushes are produced.
    pub fn room_with_members(&self, capacity: u32, members: &[UserId]) -> RoomId {
        let host = self.alice;
        let game = self.game;
        self.store
            .transaction(|tx| -> Result<RoomId, StoreError> {
                let now = Utc::now();
                let room = tx.insert_room(&NewRoom {
                    name: "Fixture room".into(),
                    host_id: host,
                    game_id: game,
                    capacity,
                    start_time: now,
                })?;
                tx.insert_membership(host, room, now)?;
                for member in members {
                    tx.insert_membership(*member, room, now)?;
                }
                Ok(room)
            })
            .unwrap()
    }

    /// Registers a live session for `user` and returns its outbound queue.
    pub fn sign_in(&self, user: UserId) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let (handle, rx) = ConnectionHandle::channel(
            "127.0.0.1:7000".parse().unwrap(),
            self.queue_depth,
            FrameConfig::default(),
        );
        self.sessions.register(user, handle.clone()).unwrap();
        (handle, rx)
    }

    pub fn room_status(&self, room: RoomId) -> RoomStatus {
        self.store
            .transaction(|tx| tx.room(room))
            .unwrap()
            .unwrap()
            .status
    }

    pub fn active_members(&self, room: RoomId) -> Vec<UserId> {
        self.store.transaction(|tx| tx.active_members(room)).unwrap()
    }
}

/// Drains every frame currently queued and decodes it.
pub(crate) fn decode_frames(rx: &mut mpsc::Receiver<Frame>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        messages.push(serde_json::from_slice(&frame[4..]).unwrap());
    }
    messages
}

/// Wraps the SQLite store and fails member lookups on demand.
pub(crate) struct FaultyStore {
    inner: SqliteStore,
    fail_member_lookup: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_member_lookup: AtomicBool::new(false),
        }
    }

    pub fn fail_member_lookup(&self, fail: bool) {
        self.fail_member_lookup.store(fail, Ordering::SeqCst);
    }
}

impl RoomStore for FaultyStore {
    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn RoomTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let fail_member_lookup = self.fail_member_lookup.load(Ordering::SeqCst);
        self.inner.run_transaction(&mut |tx: &mut dyn RoomTx| {
            body(&mut FaultyTx {
                inner: tx,
                fail_member_lookup,
            })
        })
    }
}

struct FaultyTx<'a> {
    inner: &'a mut dyn RoomTx,
    fail_member_lookup: bool,
}

impl RoomTx for FaultyTx<'_> {
    fn user(&mut self, user: UserId) -> Result<Option<UserRecord>, StoreError> {
        self.inner.user(user)
    }

    fn game_name(&mut self, game: GameId) -> Result<Option<String>, StoreError> {
        self.inner.game_name(game)
    }

    fn insert_room(&mut self, room: &NewRoom) -> Result<RoomId, StoreError> {
        self.inner.insert_room(room)
    }

    fn room(&mut self, room: RoomId) -> Result<Option<Room>, StoreError> {
        self.inner.room(room)
    }

    fn close_room(&mut self, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.close_room(room, at)
    }

    fn membership(&mut self, user: UserId, room: RoomId) -> Result<Option<Membership>, StoreError> {
        self.inner.membership(user, room)
    }

    fn insert_membership(&mut self, user: UserId, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.insert_membership(user, room, at)
    }

    fn reopen_membership(&mut self, user: UserId, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.reopen_membership(user, room, at)
    }

    fn end_membership(&mut self, user: UserId, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.end_membership(user, room, at)
    }

    fn active_members(&mut self, room: RoomId) -> Result<Vec<UserId>, StoreError> {
        if self.fail_member_lookup {
            return Err(StoreError::Io("injected member lookup failure".into()));
        }
        self.inner.active_members(room)
    }

    fn active_member_count(&mut self, room: RoomId) -> Result<u32, StoreError> {
        self.inner.active_member_count(room)
    }

    fn active_rooms(&mut self, game: Option<GameId>) -> Result<Vec<RoomListing>, StoreError> {
        self.inner.active_rooms(game)
    }

    fn rooms_joined_by(&mut self, user: UserId) -> Result<Vec<RoomId>, StoreError> {
        self.inner.rooms_joined_by(user)
    }
}
