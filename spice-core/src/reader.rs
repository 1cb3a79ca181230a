//! Exact-length reads over a connected stream.
//!
//! Used wherever the protocol announces a byte count up front: the link
//! reply, the server capability blob, the auth result, and the one-shot
//! session-init message that precedes the framed main loop.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::SpiceError;

/// Fill `buf` completely from `reader`, retrying on short reads.
///
/// Returns [`SpiceError::ConnectionClosed`] if the peer shuts down before
/// `buf.len()` bytes arrived and [`SpiceError::Connection`] on any I/O
/// error. On failure the contents of `buf` are unspecified.
pub async fn read_packet<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), SpiceError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = buf.len();
    let mut filled = 0;

    while filled < len {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            trace!(filled, len, "peer closed mid-packet");
            return Err(SpiceError::ConnectionClosed);
        }
        filled += n;
        trace!(got = n, filled, len, "read_packet");
    }

    Ok(())
}

/// Read exactly `len` bytes into a fresh buffer.
pub async fn read_vec<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, SpiceError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; len];
    read_packet(reader, &mut buf).await?;
    Ok(buf)
}

// ── Tests ────────────────────────────────────────────────────────
