//! Length-prefixed postcard framing.
//!
//! Each frame is a 4-byte big-endian length followed by a postcard-encoded
//! [`RpcMessage`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;
use crate::message::RpcMessage;

/// Maximum frame size: 64 MB.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, message: &RpcMessage) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = postcard::to_allocvec(message)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream at a frame
/// boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<RpcMessage>, NetError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(NetError::StreamClosed);
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetError::StreamClosed
        } else {
            NetError::Io(e)
        }
    })?;
    Ok(Some(postcard::from_bytes(&payload)?))
}
