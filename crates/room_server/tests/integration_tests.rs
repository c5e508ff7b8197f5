//! Integration tests for the room server over real TCP connections.
//!
//! Each test starts a server on an ephemeral port backed by an in-memory
//! store and drives it with framed test clients.

use chrono::{DateTime, Utc};
use room_protocol::framing::{receive, send, write_frame};
use room_protocol::{
    ControlKind, ErrorKind, FrameConfig, GameId, RequestType, Response, ResponseData, RoomId,
    RoomSummary, ServerMessage, Status, UserId,
};
use room_server::{AdmissionScope, RoomServer, ServerConfig};
use room_store::{
    Membership, NewRoom, Room, RoomListing, RoomStore, RoomTx, SqliteStore, StoreError,
    UserRecord,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

/// A client speaking the framed protocol. Responses and pushes are read by a
/// background task so that waiting for them never cuts a frame in half.
struct TestClient {
    writer: OwnedWriteHalf,
    inbox: mpsc::UnboundedReceiver<ServerMessage>,
    pushes: VecDeque<ServerMessage>,
    config: FrameConfig,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (mut reader, writer) = stream.into_split();
        let (tx, inbox) = mpsc::unbounded_channel();
        let config = FrameConfig::default();
        let read_config = config.clone();
        tokio::spawn(async move {
            while let Ok(value) = receive(&mut reader, &read_config).await {
                let message: ServerMessage =
                    serde_json::from_value(value).expect("server sent an unknown message");
                if tx.send(message).is_err() {
                    break;
                }
            }
        });
        Self {
            writer,
            inbox,
            pushes: VecDeque::new(),
            config,
        }
    }

    async fn send(&mut self, payload: Value) {
        send(&mut self.writer, &payload, &self.config).await.expect("send");
    }

    /// Sends a request and waits for its response, keeping pushes aside.
    async fn request(&mut self, payload: Value) -> Response {
        self.send(payload).await;
        loop {
            match timeout(WAIT, self.inbox.recv()).await {
                Ok(Some(ServerMessage::Response(response))) => return response,
                Ok(Some(push)) => self.pushes.push_back(push),
                Ok(None) => panic!("connection closed while awaiting a response"),
                Err(_) => panic!("timed out awaiting a response"),
            }
        }
    }

    async fn next_push(&mut self) -> ServerMessage {
        if let Some(push) = self.pushes.pop_front() {
            return push;
        }
        match timeout(WAIT, self.inbox.recv()).await {
            Ok(Some(message)) => {
                assert!(message.is_push(), "expected a push, got {message:?}");
                message
            }
            Ok(None) => panic!("connection closed while awaiting a push"),
            Err(_) => panic!("timed out awaiting a push"),
        }
    }

    async fn next_control(&mut self) -> (ControlKind, UserId) {
        match self.next_push().await {
            ServerMessage::RoomControl(event) => (event.kind, event.subject_user_id),
            other => panic!("expected a room control push, got {other:?}"),
        }
    }

    async fn assert_quiet(&mut self) {
        assert!(self.pushes.is_empty(), "unexpected pushes: {:?}", self.pushes);
        if let Ok(Some(message)) = timeout(QUIET, self.inbox.recv()).await {
            panic!("unexpected message: {message:?}");
        }
    }

    /// Waits until the server closes the connection.
    async fn assert_closed(&mut self) {
        loop {
            match timeout(WAIT, self.inbox.recv()).await {
                Ok(None) => return,
                Ok(Some(_)) => continue,
                Err(_) => panic!("server did not close the connection"),
            }
        }
    }

    async fn sign_in(&mut self, user: UserId, password: &str) -> Response {
        self.request(json!({ "requestType": "sign in", "userID": user, "password": password }))
            .await
    }

    async fn create_room(&mut self, host: UserId, name: &str, game: GameId, capacity: u32) -> Response {
        self.request(json!({
            "requestType": "create room",
            "hostUserID": host,
            "roomName": name,
            "gameID": game,
            "capacityLimit": capacity
        }))
        .await
    }

    async fn join(&mut self, user: UserId, room: RoomId) -> Response {
        self.request(json!({ "requestType": "join room", "userID": user, "roomID": room }))
            .await
    }

    async fn leave(&mut self, user: UserId, room: RoomId) -> Response {
        self.request(json!({ "requestType": "leave room", "userID": user, "roomID": room }))
            .await
    }

    async fn list(&mut self) -> Vec<RoomSummary> {
        let response = self.request(json!({ "requestType": "list rooms" })).await;
        match response.data {
            ResponseData::Rooms(list) => list.rooms,
            other => panic!("expected a room list, got {other:?}"),
        }
    }
}

fn created_room(response: &Response) -> RoomId {
    assert!(response.is_ok(), "create failed: {response:?}");
    match &response.data {
        ResponseData::Created(created) => created.room_id,
        other => panic!("expected created room, got {other:?}"),
    }
}

struct Account {
    id: UserId,
    password: String,
}

struct TestServer {
    server: Arc<RoomServer>,
    addr: SocketAddr,
    serve_task: JoinHandle<()>,
    accounts: Vec<Account>,
    game: GameId,
}

impl TestServer {
    async fn start(users: usize) -> Self {
        let sqlite = SqliteStore::in_memory().unwrap();
        Self::start_with(sqlite.clone(), Arc::new(sqlite), users, ServerConfig::default()).await
    }

    async fn start_with(
        seed: SqliteStore,
        store: Arc<dyn RoomStore>,
        users: usize,
        mut config: ServerConfig,
    ) -> Self {
        let accounts = (0..users)
            .map(|i| {
                let password = format!("secret-{i}");
                let id = seed.create_user(&format!("player{i}"), &password, "User").unwrap();
                Account { id, password }
            })
            .collect();
        let game = seed.create_game("Portal 2").unwrap();

        config.bind_address = "127.0.0.1:0".parse().unwrap();
        let server = Arc::new(RoomServer::new(config, store));
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        let serve_task = tokio::spawn(async move {
            serving.serve(listener).await.unwrap();
        });

        Self {
            server,
            addr,
            serve_task,
            accounts,
            game,
        }
    }

    fn user(&self, index: usize) -> UserId {
        self.accounts[index].id
    }

    /// Connects and signs in as account `index`.
    async fn client(&self, index: usize) -> TestClient {
        let mut client = TestClient::connect(self.addr).await;
        let account = &self.accounts[index];
        let response = client.sign_in(account.id, &account.password).await;
        assert!(response.is_ok(), "sign in failed: {response:?}");
        client
    }
}

#[tokio::test]
async fn create_then_list_shows_host_as_only_member() {
    let ts = TestServer::start(1).await;
    let mut host = ts.client(0).await;

    let response = host.create_room(ts.user(0), "Co-op night", ts.game, 4).await;
    let room = created_room(&response);
    assert!(matches!(&response.data, ResponseData::Created(c) if c.game_name == "Portal 2"));

    let rooms = host.list().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].room_id, room);
    assert_eq!(rooms[0].member_count, 1);
    assert_eq!(rooms[0].capacity_limit, 4);
    assert_eq!(rooms[0].host_id, ts.user(0));
    assert_eq!(rooms[0].host_name, "player0");
}

#[tokio::test]
async fn capacity_two_room_fills_then_closes_with_host() {
    let ts = TestServer::start(4).await;
    let mut host = ts.client(0).await;
    let mut a = ts.client(1).await;
    let mut b = ts.client(2).await;
    let mut c = ts.client(3).await;

    let room = created_room(&host.create_room(ts.user(0), "Duo", ts.game, 2).await);

    let joined = a.join(ts.user(1), room).await;
    assert!(joined.is_ok());
    match &joined.data {
        ResponseData::Joined(details) => {
            assert_eq!(details.room_host, "player0");
            assert_eq!(details.member_count, 2);
            assert_eq!(details.capacity_limit, 2);
        }
        other => panic!("expected join details, got {other:?}"),
    }
    assert_eq!(host.next_control().await, (ControlKind::Join, ts.user(1)));

    let full = b.join(ts.user(2), room).await;
    assert_eq!(full.status, Status::Fail);
    assert_eq!(full.error_kind, Some(ErrorKind::Capacity));

    assert!(host.leave(ts.user(0), room).await.is_ok());
    assert_eq!(a.next_control().await, (ControlKind::Close, ts.user(0)));
    a.assert_quiet().await;
    host.assert_quiet().await;

    let late = c.join(ts.user(3), room).await;
    assert_eq!(late.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(late.error_message.as_deref(), Some("Room is closed"));
    assert!(c.list().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_over_tcp_respect_capacity() {
    let ts = TestServer::start(9).await;
    let mut host = ts.client(0).await;
    let room = created_room(&host.create_room(ts.user(0), "Rush", ts.game, 3).await);

    let mut clients = Vec::new();
    for i in 1..9 {
        clients.push((ts.user(i), ts.client(i).await));
    }

    let attempts = clients.into_iter().map(|(user, mut client)| {
        tokio::spawn(async move { client.join(user, room).await })
    });
    let responses = futures::future::join_all(attempts).await;

    let admitted = responses
        .iter()
        .filter(|r| r.as_ref().map(|resp| resp.is_ok()).unwrap_or(false))
        .count();
    let rejected = responses
        .iter()
        .filter(|r| {
            r.as_ref()
                .map(|resp| resp.error_kind == Some(ErrorKind::Capacity))
                .unwrap_or(false)
        })
        .count();
    assert_eq!(admitted, 2);
    assert_eq!(rejected, 6);
    assert_eq!(host.list().await[0].member_count, 3);
}

#[tokio::test]
async fn member_leave_notifies_each_other_member_once() {
    let ts = TestServer::start(3).await;
    let mut host = ts.client(0).await;
    let mut a = ts.client(1).await;
    let mut b = ts.client(2).await;
    let room = created_room(&host.create_room(ts.user(0), "Trio", ts.game, 3).await);

    assert!(a.join(ts.user(1), room).await.is_ok());
    assert!(b.join(ts.user(2), room).await.is_ok());
    assert_eq!(host.next_control().await, (ControlKind::Join, ts.user(1)));
    assert_eq!(host.next_control().await, (ControlKind::Join, ts.user(2)));
    assert_eq!(a.next_control().await, (ControlKind::Join, ts.user(2)));

    assert!(a.leave(ts.user(1), room).await.is_ok());

    assert_eq!(host.next_control().await, (ControlKind::Leave, ts.user(1)));
    assert_eq!(b.next_control().await, (ControlKind::Leave, ts.user(1)));
    host.assert_quiet().await;
    b.assert_quiet().await;
    a.assert_quiet().await;
    assert_eq!(host.list().await[0].member_count, 2);
}

#[tokio::test]
async fn second_leave_is_not_found_and_never_cascades_again() {
    let ts = TestServer::start(2).await;
    let mut host = ts.client(0).await;
    let mut a = ts.client(1).await;
    let room = created_room(&host.create_room(ts.user(0), "Once", ts.game, 2).await);
    assert!(a.join(ts.user(1), room).await.is_ok());
    host.next_control().await;

    assert!(host.leave(ts.user(0), room).await.is_ok());
    assert_eq!(a.next_control().await, (ControlKind::Close, ts.user(0)));

    let again = host.leave(ts.user(0), room).await;
    assert_eq!(again.error_kind, Some(ErrorKind::NotFound));
    a.assert_quiet().await;
}

#[tokio::test]
async fn chat_reaches_others_but_not_the_sender() {
    let ts = TestServer::start(2).await;
    let mut host = ts.client(0).await;
    let mut a = ts.client(1).await;
    let room = created_room(&host.create_room(ts.user(0), "Chatty", ts.game, 2).await);
    assert!(a.join(ts.user(1), room).await.is_ok());
    host.next_control().await;

    let ack = host
        .request(json!({
            "requestType": "room chat",
            "roomID": room,
            "fromUserID": ts.user(0),
            "timestamp": "2024-03-01 20:15:00",
            "content": "ready?"
        }))
        .await;
    assert!(ack.is_ok());
    assert_eq!(ack.request_type, Some(RequestType::RoomChat));

    match a.next_push().await {
        ServerMessage::RoomChat(chat) => {
            assert_eq!(chat.room_id, room);
            assert_eq!(chat.from_user_id, ts.user(0));
            assert_eq!(chat.from_user_name, "player0");
            assert_eq!(chat.timestamp, "2024-03-01 20:15:00");
            assert_eq!(chat.content, "ready?");
        }
        other => panic!("expected chat, got {other:?}"),
    }
    host.assert_quiet().await;
}

#[tokio::test]
async fn abrupt_disconnect_is_treated_as_leave() {
    let ts = TestServer::start(3).await;
    let mut host = ts.client(0).await;
    let mut a = ts.client(1).await;
    let mut b = ts.client(2).await;
    let room = created_room(&host.create_room(ts.user(0), "Fragile", ts.game, 3).await);
    assert!(a.join(ts.user(1), room).await.is_ok());
    assert!(b.join(ts.user(2), room).await.is_ok());
    host.next_control().await;
    host.next_control().await;
    a.next_control().await;

    drop(b);
    assert_eq!(host.next_control().await, (ControlKind::Leave, ts.user(2)));
    assert_eq!(a.next_control().await, (ControlKind::Leave, ts.user(2)));

    drop(host);
    assert_eq!(a.next_control().await, (ControlKind::Close, ts.user(0)));
    assert!(a.list().await.is_empty());
}

#[tokio::test]
async fn exit_releases_the_session_for_a_new_sign_in() {
    let ts = TestServer::start(1).await;
    let mut first = ts.client(0).await;

    let mut second = TestClient::connect(ts.addr).await;
    let duplicate = second.sign_in(ts.user(0), &ts.accounts[0].password).await;
    assert_eq!(duplicate.error_kind, Some(ErrorKind::Conflict));

    let bye = first.request(json!({ "requestType": "exit", "userID": ts.user(0) })).await;
    assert!(bye.is_ok());
    first.assert_closed().await;

    let mut signed_in = false;
    for _ in 0..50 {
        if second.sign_in(ts.user(0), &ts.accounts[0].password).await.is_ok() {
            signed_in = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(signed_in, "session was never released");
}

#[tokio::test]
async fn malformed_frame_tears_down_the_connection() {
    let ts = TestServer::start(2).await;
    let mut host = ts.client(0).await;
    let room = created_room(&host.create_room(ts.user(0), "Strict", ts.game, 2).await);
    let mut a = ts.client(1).await;
    assert!(a.join(ts.user(1), room).await.is_ok());

    write_frame(&mut a.writer, b"{not json", &a.config).await.unwrap();
    a.assert_closed().await;

    assert_eq!(host.next_control().await, (ControlKind::Join, ts.user(1)));
    assert_eq!(host.next_control().await, (ControlKind::Leave, ts.user(1)));
}

#[tokio::test]
async fn bad_requests_keep_the_connection_open() {
    let ts = TestServer::start(1).await;
    let mut client = ts.client(0).await;

    let unknown = client.request(json!({ "requestType": "search games" })).await;
    assert_eq!(unknown.error_kind, Some(ErrorKind::Validation));

    let missing = client.request(json!({ "requestType": "create room", "hostUserID": ts.user(0) })).await;
    assert_eq!(missing.error_kind, Some(ErrorKind::Validation));
    assert_eq!(missing.request_type, Some(RequestType::CreateRoom));

    let no_game = client.create_room(ts.user(0), "Nowhere", GameId(404), 2).await;
    assert_eq!(no_game.error_kind, Some(ErrorKind::NotFound));

    assert!(client.list().await.is_empty());
}

#[tokio::test]
async fn per_room_admission_scope_serves_rooms_independently() {
    let sqlite = SqliteStore::in_memory().unwrap();
    let config = ServerConfig {
        admission_scope: AdmissionScope::PerRoom,
        ..ServerConfig::default()
    };
    let ts = TestServer::start_with(sqlite.clone(), Arc::new(sqlite), 4, config).await;
    let mut h1 = ts.client(0).await;
    let mut h2 = ts.client(1).await;
    let mut g1 = ts.client(2).await;
    let mut g2 = ts.client(3).await;

    let r1 = created_room(&h1.create_room(ts.user(0), "One", ts.game, 2).await);
    let r2 = created_room(&h2.create_room(ts.user(1), "Two", ts.game, 2).await);
    assert!(g1.join(ts.user(2), r1).await.is_ok());
    assert!(g2.join(ts.user(3), r2).await.is_ok());
    assert_eq!(g1.join(ts.user(2), r2).await.error_kind, Some(ErrorKind::Capacity));
}

#[tokio::test]
async fn shutdown_stops_accepting_and_ends_sessions() {
    let ts = TestServer::start(1).await;
    let mut client = ts.client(0).await;

    ts.server.shutdown().await.unwrap();
    timeout(WAIT, ts.serve_task).await.expect("serve did not stop").unwrap();
    client.assert_closed().await;
}

// ---------------------------------------------------------------------------
// Rollback under store failures
// ---------------------------------------------------------------------------

/// Wraps the SQLite store and fails selected writes on demand.
struct FaultyStore {
    inner: SqliteStore,
    fail_close: AtomicBool,
    fail_membership_insert: AtomicBool,
}

struct FaultyTx<'a> {
    inner: &'a mut dyn RoomTx,
    fail_close: bool,
    fail_membership_insert: bool,
}

fn injected() -> StoreError {
    StoreError::Io("injected failure".into())
}

impl RoomStore for FaultyStore {
    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn RoomTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let fail_close = self.fail_close.load(Ordering::SeqCst);
        let fail_membership_insert = self.fail_membership_insert.load(Ordering::SeqCst);
        self.inner.run_transaction(&mut |tx: &mut dyn RoomTx| {
            body(&mut FaultyTx {
                inner: tx,
                fail_close,
                fail_membership_insert,
            })
        })
    }
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
        if self.fail_close {
            return Err(injected());
        }
        self.inner.close_room(room, at)
    }

    fn membership(&mut self, user: UserId, room: RoomId) -> Result<Option<Membership>, StoreError> {
        self.inner.membership(user, room)
    }

    fn insert_membership(&mut self, user: UserId, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if self.fail_membership_insert {
            return Err(injected());
        }
        self.inner.insert_membership(user, room, at)
    }

    fn reopen_membership(&mut self, user: UserId, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.reopen_membership(user, room, at)
    }

    fn end_membership(&mut self, user: UserId, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.end_membership(user, room, at)
    }

    fn active_members(&mut self, room: RoomId) -> Result<Vec<UserId>, StoreError> {
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

#[tokio::test]
async fn failed_host_close_rolls_back_the_whole_cascade() {
    let sqlite = SqliteStore::in_memory().unwrap();
    let faulty = Arc::new(FaultyStore {
        inner: sqlite.clone(),
        fail_close: AtomicBool::new(false),
        fail_membership_insert: AtomicBool::new(false),
    });
    let ts = TestServer::start_with(sqlite, faulty.clone(), 2, ServerConfig::default()).await;
    let mut host = ts.client(0).await;
    let mut a = ts.client(1).await;
    let room = created_room(&host.create_room(ts.user(0), "Sturdy", ts.game, 2).await);
    assert!(a.join(ts.user(1), room).await.is_ok());
    host.next_control().await;

    faulty.fail_close.store(true, Ordering::SeqCst);
    let failed = host.leave(ts.user(0), room).await;
    assert_eq!(failed.status, Status::Fail);
    assert_eq!(failed.error_kind, Some(ErrorKind::Internal));
    assert_eq!(failed.error_message.as_deref(), Some("Unknown error"));
    a.assert_quiet().await;

    let rooms = a.list().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].member_count, 2);

    faulty.fail_close.store(false, Ordering::SeqCst);
    assert!(host.leave(ts.user(0), room).await.is_ok());
    assert_eq!(a.next_control().await, (ControlKind::Close, ts.user(0)));
}

#[tokio::test]
async fn failed_join_leaves_room_unchanged() {
    let sqlite = SqliteStore::in_memory().unwrap();
    let faulty = Arc::new(FaultyStore {
        inner: sqlite.clone(),
        fail_close: AtomicBool::new(false),
        fail_membership_insert: AtomicBool::new(false),
    });
    let ts = TestServer::start_with(sqlite, faulty.clone(), 2, ServerConfig::default()).await;
    let mut host = ts.client(0).await;
    let mut a = ts.client(1).await;

    faulty.fail_membership_insert.store(true, Ordering::SeqCst);
    let create = host.create_room(ts.user(0), "Doomed", ts.game, 2).await;
    assert_eq!(create.error_kind, Some(ErrorKind::Internal));
    assert!(host.list().await.is_empty(), "room row must roll back with its membership");

    faulty.fail_membership_insert.store(false, Ordering::SeqCst);
    let room = created_room(&host.create_room(ts.user(0), "Fine", ts.game, 2).await);

    faulty.fail_membership_insert.store(true, Ordering::SeqCst);
    let join = a.join(ts.user(1), room).await;
    assert_eq!(join.error_kind, Some(ErrorKind::Internal));
    host.assert_quiet().await;
    assert_eq!(host.list().await[0].member_count, 1);
}
