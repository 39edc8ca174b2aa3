//! Connection handling
//!
//! A [`Connection`] owns one byte stream and moves whole messages over it:
//! encode into a scratch buffer, frame, write; read a frame, decode.

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::protocol::{
    self, is_peer_gone, CodecError, Message, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),
}

impl ConnectionError {
    /// True when the peer closed the channel
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::Io(e) => is_peer_gone(e.kind()),
            ConnectionError::Protocol(e) => e.is_disconnect(),
        }
    }

    /// True when the peer closed the channel between two frames
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ConnectionError::Protocol(e) if e.is_clean_close())
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent, length prefixes included
    pub bytes_sent: u64,
    /// Bytes received, length prefixes included
    pub bytes_received: u64,
}

/// A framed message connection over an async byte stream
pub struct Connection<S> {
    /// The underlying stream
    stream: S,
    /// Scratch buffer for outgoing payloads
    write_buf: BytesMut,
    /// Largest payload accepted from the peer
    max_frame_size: usize,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            write_buf: BytesMut::with_capacity(256),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            stats: ConnectionStats::default(),
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Encode and send one message as a single frame
    pub async fn send<M: Message>(&mut self, message: &M) -> ConnectionResult<()> {
        self.write_buf.clear();
        message.encode_into(&mut self.write_buf);

        protocol::write_frame(&mut self.stream, &self.write_buf).await?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += (LENGTH_PREFIX_SIZE + self.write_buf.len()) as u64;

        tracing::debug!(
            "Sent {} ({} payload bytes)",
            message.name(),
            self.write_buf.len()
        );
        Ok(())
    }

    /// Read one frame and decode it as an `M`
    pub async fn recv<M: Message>(&mut self) -> ConnectionResult<M> {
        let payload = protocol::read_frame(&mut self.stream, self.max_frame_size).await?;

        self.stats.bytes_received += (LENGTH_PREFIX_SIZE + payload.len()) as u64;

        let message = M::decode(&payload)?;
        self.stats.messages_received += 1;

        tracing::debug!(
            "Received {} ({} payload bytes)",
            message.name(),
            payload.len()
        );
        Ok(message)
    }

    /// Shut down the write side of the stream
    pub async fn shutdown(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }
}
