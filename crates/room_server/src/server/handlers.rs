//! Per-connection worker.

use crate::connection::{ClientConnection, ConnectionHandle};
use crate::error::ServerError;
use crate::messaging::{route_client_message, Flow};
use crate::server::context::ServerContext;
use room_protocol::framing::receive;
use room_protocol::TransportError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long queued frames may take to flush once the reader has stopped.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves one client connection until it exits, disconnects, breaks the
/// protocol or the server shuts down.
///
/// The socket is split: this task reads and routes requests while a writer
/// task drains the connection's outbound queue. Whatever ends the loop, the
/// session is unregistered and its room memberships are released before the
/// writer is allowed to finish.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY not set for {}: {}", addr, e);
    }
    let (mut reader, mut writer) = stream.into_split();
    let frame_config = context.config().frame_config();

    let (handle, mut outbound) = ConnectionHandle::channel(
        addr,
        context.config().outbound_queue_depth,
        frame_config.clone(),
    );
    let connection_id = handle.id();
    info!("🔗 Connection {} established from {}", connection_id, addr);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!("Write to {} failed: {}", connection_id, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut client = ClientConnection::new(handle);
    let result = loop {
        if *shutdown.borrow_and_update() {
            break Ok(());
        }

        let payload = tokio::select! {
            received = receive(&mut reader, &frame_config) => received,
            _ = shutdown.changed() => break Ok(()),
        };

        match payload {
            Ok(payload) => match route_client_message(payload, &mut client, &context).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => {
                    debug!("Connection {} requested exit", connection_id);
                    break Ok(());
                }
                Err(e) => break Err(e),
            },
            Err(TransportError::ConnectionClosed) => {
                debug!("Connection {} closed by peer", connection_id);
                break Ok(());
            }
            Err(e) => {
                warn!("Protocol error on {}: {}", connection_id, e);
                break Err(ServerError::Protocol(e));
            }
        }
    };

    context.end_session(&mut client).await;
    drop(client);

    if timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
        warn!("Connection {} writer did not drain in time", connection_id);
    }
    info!("Connection {} from {} closed", connection_id, addr);

    result
}
