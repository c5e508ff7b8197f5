//! Outbound half of a client connection.

use room_protocol::framing::encode;
use room_protocol::{ConnectionId, FrameConfig, Response, ServerMessage, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// An encoded frame, shared between every recipient of a broadcast.
pub type Frame = Arc<Vec<u8>>;

/// Cheap, cloneable handle used to write to one client connection.
///
/// Frames are queued on a bounded channel drained by the connection's writer
/// task, so no caller ever blocks on another client's socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    outbound: mpsc::Sender<Frame>,
    frame_config: FrameConfig,
}

impl ConnectionHandle {
    /// Creates a handle together with the receiving end of its queue.
    ///
    /// # Arguments
    ///
    /// * `remote_addr` - The network address of the client
    /// * `queue_depth` - Number of frames that may wait for the writer
    /// * `frame_config` - Limits applied when encoding messages
    pub fn channel(
        remote_addr: SocketAddr,
        queue_depth: usize,
        frame_config: FrameConfig,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, receiver) = mpsc::channel(queue_depth.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            remote_addr,
            outbound,
            frame_config,
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queues an already encoded frame without waiting.
    pub fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backpressure,
            TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    /// Queues the answer to this connection's own request, waiting for room
    /// in the queue rather than dropping it.
    pub async fn respond(&self, response: Response) -> Result<(), TransportError> {
        let frame = encode(&ServerMessage::Response(response), &self.frame_config)?;
        self.outbound
            .send(Arc::new(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}
