//! Core room server implementation.
//!
//! This module contains the main `RoomServer` struct: listener setup, the
//! accept loop with its connection limit, and shutdown coordination.

use crate::{
    config::ServerConfig, error::ServerError, server::context::ServerContext,
    server::handlers::handle_connection,
};
use room_store::RoomStore;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

/// The core room server structure.
///
/// `RoomServer` owns the shared [`ServerContext`] and runs one worker task per
/// accepted connection.
///
/// # Architecture
///
/// * **Session Registry**: which connection represents each signed-in user
/// * **Room Manager**: room lifecycle and admission control
/// * **Broadcast Dispatcher**: best-effort pushes to room members
/// * **Persistence Gateway**: the transactional store behind all of them
pub struct RoomServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Services shared by all connection workers
    context: Arc<ServerContext>,

    /// Caps the number of concurrently served connections
    connection_limit: Arc<Semaphore>,

    /// Channel for coordinating server shutdown
    shutdown_sender: watch::Sender<bool>,
}

impl RoomServer {
    /// Creates a new room server over the given store.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration parameters for server behavior
    /// * `store` - The persistence gateway for rooms and memberships
    pub fn new(config: ServerConfig, store: Arc<dyn RoomStore>) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        let (shutdown_sender, _) = watch::channel(false);
        let context = Arc::new(ServerContext::new(config.clone(), store));

        Self {
            config,
            context,
            connection_limit,
            shutdown_sender,
        }
    }

    /// Binds the listening socket described by the configuration.
    ///
    /// The socket is created with `SO_REUSEADDR` so a restarted server can
    /// rebind while old connections linger in `TIME_WAIT`.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::Network(format!("SO_REUSEADDR failed: {e}")))?;
        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(1024)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Non-blocking mode failed: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;

        match listener.local_addr() {
            Ok(local) => info!("✅ Listener bound on {}", local),
            Err(_) => info!("✅ Listener bound on {}", address),
        }
        Ok(listener)
    }

    /// Binds and serves until [`RoomServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting room server on {}", self.config.bind_address);
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// Connections beyond `max_connections` are closed right after accept.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        info!(
            "🧭 Accepting connections (limit {}, admission scope {})",
            self.config.max_connections, self.config.admission_scope
        );

        loop {
            if *shutdown_receiver.borrow_and_update() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let Ok(permit) = self.connection_limit.clone().try_acquire_owned() else {
                            warn!("Connection limit reached, refusing {}", addr);
                            drop(stream);
                            continue;
                        };

                        let context = self.context.clone();
                        let shutdown = self.shutdown_sender.subscribe();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = handle_connection(stream, addr, context, shutdown).await {
                                match e {
                                    ServerError::Protocol(_) => warn!("Connection {} dropped: {}", addr, e),
                                    _ => error!("Connection error for {}: {:?}", addr, e),
                                }
                            }
                        });
                    }
                    Err(e) => {
                        // Per-connection accept failures (e.g. reset before accept) are not fatal.
                        error!("Failed to accept connection: {}", e);
                    }
                },
                changed = shutdown_receiver.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown channel closed");
                    }
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }

    /// Initiates server shutdown.
    ///
    /// Stops the accept loop and asks every connection worker to finish;
    /// workers release their sessions and rooms on the way out.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        self.shutdown_sender.send_replace(true);
        Ok(())
    }

    /// Gets the shared services used by connection workers.
    pub fn context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.config.max_connections - self.connection_limit.available_permits()
    }
}
