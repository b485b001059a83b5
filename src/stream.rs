//! The half-close capability every transport's read/write halves expose to
//! the session relay, plus the copy loop that drives a pooled buffer through
//! an optional cipher on the way across.
//!
//! TCP and QUIC streams are naturally split at the transport layer already
//! (`TcpStream::into_split`, `quinn`'s separate `SendStream`/`RecvStream`),
//! so the relay never holds one combined bidirectional object — it holds one
//! boxed read half and one boxed write half per leg, each independently
//! owned by whichever copy task needs it.

use std::io;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pool::BufferPool;

/// The read half of a bidirectional stream, with the ability to cancel
/// further reads independently of the write half.
#[async_trait]
pub trait ReadSide: AsyncRead + Send + Unpin {
    /// Stops accepting further reads on this side without touching writes.
    async fn close_read(&mut self) -> io::Result<()>;
}

/// The write half of a bidirectional stream. Closing it is just a shutdown
/// of the underlying `AsyncWrite`, which already maps correctly onto both
/// TCP's `Shutdown::Write` and a QUIC send stream's `finish()`, so no extra
/// trait method is needed beyond `AsyncWriteExt::shutdown`.
pub trait WriteSide: AsyncWrite + Send + Unpin {}

impl<T: AsyncWrite + Send + Unpin> WriteSide for T {}

#[async_trait]
impl ReadSide for tokio::net::tcp::OwnedReadHalf {
    async fn close_read(&mut self) -> io::Result<()> {
        SockRef::from(self.as_ref()).shutdown(std::net::Shutdown::Read)
    }
}

/// Copies bytes from `src` to `dst` until EOF or error, passing every chunk
/// through `transform` (a no-op closure for the plaintext leg, an in-place
/// cipher application for the encrypted leg) after it is read, using buffers
/// drawn from `pool`. Returns the number of bytes copied.
///
/// This is the single relay primitive both directions of a session run
/// concurrently; each direction owns its own pooled buffer and, when
/// encrypted, its own half of the session's
/// [`Cipher`](crate::cipher::Cipher), so the two calls never contend.
pub async fn relay_copy<R, W>(
    src: &mut R,
    dst: &mut W,
    pool: &BufferPool,
    mut transform: impl FnMut(&mut [u8]) + Send,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = pool.acquire();
    let mut total: u64 = 0;

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        transform(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    dst.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;

    #[tokio::test]
    async fn relay_copy_applies_transform_and_counts_bytes() {
        let pool = BufferPool::new(64);
        let data = b"hello world".to_vec();
        let mut src = &data[..];
        let mut dst = Vec::new();

        let n = relay_copy(&mut src, &mut dst, &pool, |chunk| {
            for b in chunk {
                *b ^= 0xff;
            }
        })
        .await
        .unwrap();

        assert_eq!(n, data.len() as u64);
        let restored: Vec<u8> = dst.iter().map(|b| b ^ 0xff).collect();
        assert_eq!(restored, data);
    }

    #[tokio::test]
    async fn relay_copy_passthrough_on_empty_transform() {
        let pool = BufferPool::new(4);
        let data = b"abcdefgh".to_vec();
        let mut src = &data[..];
        let mut dst = Vec::new();

        let n = relay_copy(&mut src, &mut dst, &pool, |_| {}).await.unwrap();

        assert_eq!(n, data.len() as u64);
        assert_eq!(dst, data);
    }
}
