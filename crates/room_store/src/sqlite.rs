use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use room_protocol::{GameId, RoomId, UserId};

use crate::error::StoreError;
use crate::gateway::{RoomStore, RoomTx};
use crate::model::{Membership, NewRoom, Room, RoomListing, RoomStatus, UserRecord};
use crate::schema;

/// SQLite-backed [`RoomStore`].
///
/// One connection behind a mutex; transactions are `IMMEDIATE` so the write
/// lock is taken before the first read.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
            }
        }

        let conn = Connection::open(path)?;
        Self::initialize(&conn)?;

        info!(path = %path.display(), "room store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn initialize(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

        let version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        if version.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [schema::SCHEMA_VERSION],
            )
            .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a user account. Used by tooling and tests; sign-up is not a
    /// server command.
    pub fn create_user(
        &self,
        user_name: &str,
        password: &str,
        role: &str,
    ) -> Result<UserId, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (user_name, password, role, join_date) VALUES (?1, ?2, ?3, ?4)",
            params![user_name, password, role, Utc::now().to_rfc3339()],
        )?;
        Ok(UserId(conn.last_insert_rowid()))
    }

    /// Add a game to the catalog.
    pub fn create_game(&self, game_name: &str) -> Result<GameId, StoreError> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO games (game_name) VALUES (?1)", [game_name])?;
        Ok(GameId(conn.last_insert_rowid()))
    }
}

impl Clone for SqliteStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
        }
    }
}

impl RoomStore for SqliteStore {
    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn RoomTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = body(&mut SqliteTx { conn: &tx });
        match result {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "rolling back room store transaction");
                tx.rollback()?;
                Err(e)
            }
        }
    }
}

struct SqliteTx<'c> {
    conn: &'c Connection,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_time).transpose()
}

fn count_to_u32(count: i64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

impl RoomTx for SqliteTx<'_> {
    fn user(&mut self, user: UserId) -> Result<Option<UserRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT user_id, user_name, role, password FROM users WHERE user_id = ?1",
                [user.get()],
                |row| {
                    Ok(UserRecord {
                        user_id: UserId(row.get(0)?),
                        user_name: row.get(1)?,
                        role: row.get(2)?,
                        password: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn user_name(&mut self, user: UserId) -> Result<Option<String>, StoreError> {
        let name = self
            .conn
            .query_row(
                "SELECT user_name FROM users WHERE user_id = ?1",
                [user.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    fn game_name(&mut self, game: GameId) -> Result<Option<String>, StoreError> {
        let name = self
            .conn
            .query_row(
                "SELECT game_name FROM games WHERE game_id = ?1",
                [game.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    fn insert_room(&mut self, room: &NewRoom) -> Result<RoomId, StoreError> {
        self.conn.execute(
            "INSERT INTO rooms (room_name, host_id, game_id, capacity, status, start_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                room.name,
                room.host_id.get(),
                room.game_id.get(),
                room.capacity,
                RoomStatus::Active.to_string(),
                room.start_time.to_rfc3339(),
            ],
        )?;
        Ok(RoomId(self.conn.last_insert_rowid()))
    }

    fn room(&mut self, room: RoomId) -> Result<Option<Room>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT room_id, room_name, host_id, game_id, capacity, status, start_time, end_time
                 FROM rooms WHERE room_id = ?1",
                [room.get()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, host_id, game_id, capacity, status, start_time, end_time)) = row else {
            return Ok(None);
        };

        Ok(Some(Room {
            id: RoomId(id),
            name,
            host_id: UserId(host_id),
            game_id: GameId(game_id),
            capacity,
            status: status.parse().map_err(StoreError::Serialization)?,
            start_time: parse_time(&start_time)?,
            end_time: parse_opt_time(end_time)?,
        }))
    }

    fn close_room(&mut self, room: RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE rooms SET status = ?1, end_time = ?2 WHERE room_id = ?3 AND status = ?4",
            params![
                RoomStatus::Closed.to_string(),
                at.to_rfc3339(),
                room.get(),
                RoomStatus::Active.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("room {room} is not active")));
        }
        Ok(())
    }

    fn membership(
        &mut self,
        user: UserId,
        room: RoomId,
    ) -> Result<Option<Membership>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT join_time, leave_time FROM room_members WHERE user_id = ?1 AND room_id = ?2",
                [user.get(), room.get()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        let Some((join_time, leave_time)) = row else {
            return Ok(None);
        };

        Ok(Some(Membership {
            user_id: user,
            room_id: room,
            join_time: parse_time(&join_time)?,
            leave_time: parse_opt_time(leave_time)?,
        }))
    }

    fn insert_membership(
        &mut self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO room_members (user_id, room_id, join_time) VALUES (?1, ?2, ?3)",
            params![user.get(), room.get(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn reopen_membership(
        &mut self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE room_members SET join_time = ?1, leave_time = NULL
             WHERE user_id = ?2 AND room_id = ?3",
            params![at.to_rfc3339(), user.get(), room.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "membership of user {user} in room {room}"
            )));
        }
        Ok(())
    }

    fn end_membership(
        &mut self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE room_members SET leave_time = ?1
             WHERE user_id = ?2 AND room_id = ?3 AND leave_time IS NULL",
            params![at.to_rfc3339(), user.get(), room.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "active membership of user {user} in room {room}"
            )));
        }
        Ok(())
    }

    fn active_members(&mut self, room: RoomId) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM room_members
             WHERE room_id = ?1 AND leave_time IS NULL
             ORDER BY join_time, user_id",
        )?;
        let members = stmt
            .query_map([room.get()], |row| row.get::<_, i64>(0).map(UserId))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    fn active_member_count(&mut self, room: RoomId) -> Result<u32, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND leave_time IS NULL",
            [room.get()],
            |row| row.get(0),
        )?;
        Ok(count_to_u32(count))
    }

    fn active_rooms(&mut self, game: Option<GameId>) -> Result<Vec<RoomListing>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.room_id, r.room_name, g.game_id, g.game_name, u.user_id, u.user_name,
                    (SELECT COUNT(*) FROM room_members m
                     WHERE m.room_id = r.room_id AND m.leave_time IS NULL),
                    r.capacity
             FROM rooms AS r
             JOIN games AS g ON g.game_id = r.game_id
             JOIN users AS u ON u.user_id = r.host_id
             WHERE r.status = 'Active' AND (?1 IS NULL OR r.game_id = ?1)
             ORDER BY r.room_id",
        )?;
        let rooms = stmt
            .query_map([game.map(GameId::get)], |row| {
                Ok(RoomListing {
                    room_id: RoomId(row.get(0)?),
                    room_name: row.get(1)?,
                    game_id: GameId(row.get(2)?),
                    game_name: row.get(3)?,
                    host_id: UserId(row.get(4)?),
                    host_name: row.get(5)?,
                    member_count: count_to_u32(row.get(6)?),
                    capacity: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    fn rooms_joined_by(&mut self, user: UserId) -> Result<Vec<RoomId>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.room_id FROM room_members AS m
             JOIN rooms AS r ON r.room_id = m.room_id
             WHERE m.user_id = ?1 AND m.leave_time IS NULL AND r.status = 'Active'
             ORDER BY m.room_id",
        )?;
        let rooms = stmt
            .query_map([user.get()], |row| row.get::<_, i64>(0).map(RoomId))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rooms)
    }
}
