//! Length-prefixed framing for TCP streams.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   JSON payload     |
//! | u32 big-endian    |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes. Readers always consume
//! exactly one prefix and exactly `length` payload bytes, so adjacent messages
//! can neither merge nor be truncated however the bytes are split in transit.

use serde::Serialize;
use std::io::ErrorKind as IoErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors raised by the message transport.
///
/// All variants except [`TransportError::Encode`] and
/// [`TransportError::Backpressure`] leave the stream in an unknown state and
/// are fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection before a complete frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u64, max: u32 },

    /// The frame payload is not a JSON document.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The connection's outbound queue is full.
    #[error("outbound queue full")]
    Backpressure,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the error means the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Encode(_) | TransportError::Backpressure)
    }
}

fn closed_on_eof(error: std::io::Error) -> TransportError {
    if error.kind() == IoErrorKind::UnexpectedEof {
        TransportError::ConnectionClosed
    } else {
        TransportError::Io(error)
    }
}

/// Read a single length-prefixed frame from the stream.
///
/// Waits until the full frame is available. EOF before or inside the frame is
/// reported as [`TransportError::ConnectionClosed`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(closed_on_eof)?;

    let payload_len = u32::from_be_bytes(len_buf);
    if payload_len > config.max_payload_size {
        return Err(TransportError::FrameTooLarge {
            size: u64::from(payload_len),
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(closed_on_eof)?;
    }

    Ok(payload)
}

/// Prepend the length prefix to an encoded payload.
///
/// Fails with [`TransportError::FrameTooLarge`] when the payload would not be
/// accepted by a reader using the same configuration.
pub fn frame_payload(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, TransportError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= config.max_payload_size)
        .ok_or(TransportError::FrameTooLarge {
            size: payload.len() as u64,
            max: config.max_payload_size,
        })?;

    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write a single length-prefixed frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), TransportError> {
    let frame = frame_payload(payload, config)?;
    writer.write_all(&frame).await.map_err(closed_on_eof)?;
    writer.flush().await?;
    Ok(())
}

/// Serialize a message into a complete frame, prefix included.
///
/// The result can be written to any number of connections as-is.
pub fn encode<T: Serialize>(message: &T, config: &FrameConfig) -> Result<Vec<u8>, TransportError> {
    let payload = serde_json::to_vec(message).map_err(TransportError::Encode)?;
    frame_payload(&payload, config)
}

/// Receive one message and decode it as JSON.
///
/// The value is returned untyped so that the caller can still answer a
/// request whose fields fail to match any command.
pub async fn receive<R: AsyncRead + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<serde_json::Value, TransportError> {
    let payload = read_frame(reader, config).await?;
    serde_json::from_slice(&payload).map_err(TransportError::MalformedPayload)
}

/// Serialize a message and write it as one frame.
pub async fn send<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    message: &T,
    config: &FrameConfig,
) -> Result<(), TransportError> {
    let frame = encode(message, config)?;
    writer.write_all(&frame).await.map_err(closed_on_eof)?;
    writer.flush().await?;
    Ok(())
}
