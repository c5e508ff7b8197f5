//! State shared by every connection worker.

use crate::broadcast::BroadcastDispatcher;
use crate::config::ServerConfig;
use crate::connection::{ClientConnection, SessionRegistry};
use crate::error::RoomError;
use crate::gateway;
use crate::rooms::RoomManager;
use room_protocol::{SignedIn, UserId};
use room_store::RoomStore;
use std::sync::Arc;
use tracing::info;

/// Services reachable from a connection worker.
///
/// Built once per server; workers hold it behind an `Arc`.
pub struct ServerContext {
    config: ServerConfig,
    store: Arc<dyn RoomStore>,
    sessions: Arc<SessionRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    rooms: Arc<RoomManager>,
}

impl ServerContext {
    pub fn new(config: ServerConfig, store: Arc<dyn RoomStore>) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            store.clone(),
            sessions.clone(),
            config.frame_config(),
        ));
        let rooms = Arc::new(RoomManager::new(
            store.clone(),
            dispatcher.clone(),
            config.admission_scope,
            config.max_room_capacity,
        ));

        Self {
            config,
            store,
            sessions,
            dispatcher,
            rooms,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Arc<BroadcastDispatcher> {
        &self.dispatcher
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Authenticates `user` and binds it to the client's connection.
    ///
    /// The stored credential is compared as-is; the account must exist and
    /// must not be signed in on any connection.
    pub async fn sign_in(
        &self,
        client: &mut ClientConnection,
        user: UserId,
        password: &str,
    ) -> Result<SignedIn, RoomError> {
        if client.user.is_some() {
            return Err(RoomError::SessionActive);
        }

        let record = gateway::transaction(&self.store, move |tx| Ok(tx.user(user)?))
            .await?
            .ok_or(RoomError::UserNotFound(user))?;
        if record.password != password {
            return Err(RoomError::AuthenticationFailed);
        }

        self.sessions.register(user, client.handle.clone())?;
        client.user = Some(user);

        info!(
            "🔐 User {} ({}) signed in from {}",
            user,
            record.user_name,
            client.handle.remote_addr()
        );
        Ok(SignedIn {
            user_id: user,
            user_name: record.user_name,
            role: record.role,
        })
    }

    /// Ends the client's session: releases every room membership it holds as
    /// explicit leaves would, host rooms included, then unregisters it.
    ///
    /// The user stays signed in until the release finishes, so a new session
    /// for the same user cannot start while its old memberships are ending.
    pub async fn end_session(&self, client: &mut ClientConnection) {
        let Some(user) = client.user.take() else {
            return;
        };
        let released = self.rooms.release_all(user).await;
        self.sessions.unregister(user);
        info!(
            "👋 Session of user {} ended after {:?} ({} room(s) released)",
            user,
            client.connected_at.elapsed(),
            released
        );
    }
}
