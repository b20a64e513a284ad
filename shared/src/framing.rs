//! Length-prefixed framing for the TCP stream.
//!
//! Wire format: `[u32 length (big-endian)][payload]`
//!
//! The stream may coalesce or split writes arbitrarily, so receivers never
//! assume one `read` equals one message.

use crate::protocol::{Message, ProtocolError};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload either side will accept.
pub const MAX_FRAME_LEN: usize = 1024;

/// Encodes a message into a complete frame, prefix included.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = message.encode()?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Writes one message as a frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> io::Result<()> {
    let frame =
        encode_frame(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Reads one frame payload.
///
/// Returns `Ok(None)` when the peer closed the stream between frames. A stream
/// closed halfway through a frame is an `UnexpectedEof` error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed inside a frame header",
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
