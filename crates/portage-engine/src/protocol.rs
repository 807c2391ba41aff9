//! Socket job kernel primitives shared by every job variant.
//!
//! Three building blocks: the length-prefix handshake (a fixed-width
//! integer announcing the post-encryption byte count), buffered transfer
//! loops that tolerate partial reads and writes, and the single-byte ACK
//! handshake that adds an at-least-once signal on top of UDP.
//!
//! Every loop here observes the shared shutdown signal and aborts promptly.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

use crate::error::EngineError;
use crate::job::Shutdown;

/// The delivery-confirmation sentinel. A protocol-level constant shared by
/// both peers; changing it is a breaking protocol change.
pub const ACK_TOKEN: u8 = 0x06;

/// Width of the length-prefix integer on the wire.
pub const LEN_PREFIX_LEN: usize = 4;

// ── Length-prefix handshake ──────────────────────────────────────────────────

/// Announce the byte count that follows. Always the *post-encryption*
/// length; the receiver sizes its buffered read from this.
pub async fn write_length_prefix<W>(stream: &mut W, len: u32) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&len.to_le_bytes()).await?;
    Ok(())
}

/// Receiving half of the handshake.
pub async fn read_length_prefix<R>(stream: &mut R) -> Result<u32, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; LEN_PREFIX_LEN];
    stream.read_exact(&mut buf).await?;
    Ok(u32::from_le_bytes(buf))
}

/// Shutdown-aware variant for replies that may never come: a peer holding
/// the stream open without answering must not pin the job past a fired
/// cancellation signal.
pub async fn read_length_prefix_or_cancel<R>(
    stream: &mut R,
    shutdown: &mut Shutdown,
) -> Result<u32, EngineError>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        _ = shutdown.fired() => Err(EngineError::Cancelled),
        len = read_length_prefix(stream) => len,
    }
}

/// Timed variant for interleaved (duplex) ticks: waits up to `wait` for the
/// first prefix byte, then reads the rest unconditionally so a slow peer
/// cannot leave the stream mid-prefix. Returns None on a quiet wire.
pub async fn read_length_prefix_timed<R>(
    stream: &mut R,
    wait: Duration,
) -> Result<Option<u32>, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; LEN_PREFIX_LEN];
    match tokio::time::timeout(wait, stream.read_exact(&mut buf[..1])).await {
        Err(_) => return Ok(None),
        Ok(read) => {
            read?;
        }
    }
    stream.read_exact(&mut buf[1..]).await?;
    Ok(Some(u32::from_le_bytes(buf)))
}

// ── Buffered transfer ────────────────────────────────────────────────────────

/// Write `data` in buffer-length chunks until fully transferred.
///
/// A single write syscall is never assumed to complete a chunk; short
/// writes loop. The shutdown signal is observed between every write.
pub async fn buffered_write<W>(
    stream: &mut W,
    data: &[u8],
    buffer_len: usize,
    shutdown: &mut Shutdown,
) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    let buffer_len = buffer_len.max(1);
    for chunk in data.chunks(buffer_len) {
        let mut written = 0;
        while written < chunk.len() {
            tokio::select! {
                _ = shutdown.fired() => return Err(EngineError::Cancelled),
                wrote = stream.write(&chunk[written..]) => {
                    let n = wrote?;
                    if n == 0 {
                        return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
                    }
                    written += n;
                }
            }
        }
    }
    stream.flush().await?;
    Ok(())
}

/// Read exactly `total` bytes in buffer-length chunks.
///
/// Short reads loop; a clean EOF before `total` is a transport error.
/// The shutdown signal is observed between every read.
pub async fn buffered_read<R>(
    stream: &mut R,
    total: usize,
    buffer_len: usize,
    shutdown: &mut Shutdown,
) -> Result<Vec<u8>, EngineError>
where
    R: AsyncRead + Unpin,
{
    let buffer_len = buffer_len.max(1);
    let mut out = vec![0u8; total];
    let mut filled = 0;
    while filled < total {
        let want = (total - filled).min(buffer_len);
        tokio::select! {
            _ = shutdown.fired() => return Err(EngineError::Cancelled),
            read = stream.read(&mut out[filled..filled + want]) => {
                let n = read?;
                if n == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                }
                filled += n;
            }
        }
    }
    Ok(out)
}

// ── ACK handshake ────────────────────────────────────────────────────────────

/// Confirm receipt of a datagram by returning the ACK token to the sender.
pub async fn send_ack(socket: &UdpSocket, peer: SocketAddr) -> Result<(), EngineError> {
    socket.send_to(&[ACK_TOKEN], peer).await?;
    Ok(())
}

/// Wait for the ACK token on a fresh socket bound to `local`.
///
/// Every failure — bind error, timeout, io error, malformed token — is
/// downgraded to `false` and logged. A missed ACK is non-fatal: the
/// caller's retry loop stays simple and tries again next tick.
pub async fn await_ack(local: SocketAddr, wait: Duration) -> bool {
    let socket = match UdpSocket::bind(local).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%local, error = %e, "could not bind ack receive socket");
            return false;
        }
    };

    let mut buf = [0u8; 8];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, from))) => {
            if n == 1 && buf[0] == ACK_TOKEN {
                tracing::debug!(%from, "ack received");
                true
            } else {
                tracing::warn!(
                    %from,
                    got = hex::encode(&buf[..n.min(buf.len())]),
                    "malformed ack token"
                );
                false
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "ack receive failed");
            false
        }
        Err(_) => {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "ack wait timed out");
            false
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
