//! Frame codec
//!
//! A frame is a little-endian `u32` payload length followed by exactly that
//! many payload bytes. The length never counts itself.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload accepted by default (16 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// The peer closed the stream before a whole frame arrived. Byte counts
    /// cover the whole frame, prefix included; `received == 0` means the
    /// stream ended cleanly between frames.
    #[error("Peer disconnected after {received} of {expected} frame bytes")]
    UnexpectedDisconnect { received: usize, expected: usize },

    #[error("Payload truncated: field needs {needed} bytes, {remaining} left")]
    TruncatedPayload { needed: usize, remaining: usize },

    #[error("Unknown {family} tag: {tag}")]
    UnknownVariant { family: &'static str, tag: i32 },

    #[error("String field is not valid UTF-16")]
    InvalidString,

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    /// The stream broke under a read or write because the peer went away
    #[error("Connection lost: {0}")]
    ConnectionLost(io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// True when the peer hung up, as opposed to sending garbage
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            CodecError::UnexpectedDisconnect { .. } | CodecError::ConnectionLost(_)
        )
    }

    /// True when the peer hung up exactly on a frame boundary
    pub fn is_clean_close(&self) -> bool {
        matches!(self, CodecError::UnexpectedDisconnect { received: 0, .. })
    }
}

/// I/O error kinds raised when the other end of the channel is gone
pub fn is_peer_gone(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero
    )
}

fn classify_io(err: io::Error) -> CodecError {
    if is_peer_gone(err.kind()) {
        CodecError::ConnectionLost(err)
    } else {
        CodecError::Io(err)
    }
}

/// Append one frame (length prefix + payload) to `buf`
pub fn encode_frame(payload: &[u8], buf: &mut BytesMut) -> Result<(), CodecError> {
    let length = u32::try_from(payload.len())
        .map_err(|_| CodecError::FrameTooLarge(payload.len(), u32::MAX as usize))?;

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32_le(length);
    buf.put_slice(payload);
    Ok(())
}

/// Write one frame and flush.
///
/// `payload` must already be fully serialized; prefix and payload go out
/// from a single buffer.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    encode_frame(payload, &mut buf)?;

    writer.write_all(&buf).await.map_err(classify_io)?;
    writer.flush().await.map_err(classify_io)?;
    Ok(())
}

/// Read exactly one frame and return its payload.
///
/// Short reads are retried until the requested count is satisfied; a read
/// of zero bytes before that is reported as
/// [`CodecError::UnexpectedDisconnect`]. Never returns a partial payload.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Bytes, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read_full(reader, &mut prefix, 0, LENGTH_PREFIX_SIZE).await?;

    let length = u32::from_le_bytes(prefix) as usize;
    if length > max_frame_size {
        return Err(CodecError::FrameTooLarge(length, max_frame_size));
    }

    let mut payload = BytesMut::zeroed(length);
    read_full(
        reader,
        &mut payload,
        LENGTH_PREFIX_SIZE,
        LENGTH_PREFIX_SIZE + length,
    )
    .await?;

    Ok(payload.freeze())
}

/// Fill `buf` completely. `offset` and `expected` position `buf` inside
/// the frame for error reporting.
async fn read_full<R>(
    reader: &mut R,
    buf: &mut [u8],
    offset: usize,
    expected: usize,
) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = match reader.read(&mut buf[filled..]).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify_io(e)),
        };

        if n == 0 {
            return Err(CodecError::UnexpectedDisconnect {
                received: offset + filled,
                expected,
            });
        }
        filled += n;
    }
    Ok(())
}
