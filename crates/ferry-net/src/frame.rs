//! Framed socket I/O — one header + payload per call.
//!
//! The codec itself is pure (`ferry_core::codec`); this module binds it to
//! async streams with exact-length reads and writes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ferry_core::codec::{build_header, parse_header, FrameHeader, MessageType, HEADER_SIZE};

use crate::error::TransferError;

/// Upper bound on a declared payload length. Generous for the largest
/// chunk size plus encryption overhead; anything bigger is a hostile or
/// corrupted frame, not a real payload.
pub const MAX_PAYLOAD_LEN: u32 = 1 << 20;

/// Write one frame: 256-byte header followed by the payload.
pub async fn send_frame<W>(
    stream: &mut W,
    message_type: MessageType,
    payload: &[u8],
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    let header = build_header(message_type, payload);
    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    Ok(())
}

/// Read one frame: exactly 256 header bytes, then exactly the declared
/// payload length. A clean EOF mid-frame maps to [`TransferError::Closed`].
pub async fn recv_frame<R>(stream: &mut R) -> Result<(FrameHeader, Vec<u8>), TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_buf).await.map_err(map_eof)?;
    let header = parse_header(&header_buf)?;

    if header.payload_len > MAX_PAYLOAD_LEN {
        return Err(TransferError::PayloadTooLarge(header.payload_len));
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    stream.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok((header, payload))
}

fn map_eof(e: std::io::Error) -> TransferError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransferError::Closed
    } else {
        TransferError::Io(e)
    }
}
