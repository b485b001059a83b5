//! Fixed-size byte-buffer recycler shared by every session.
//!
//! A simple mutex-guarded stack is enough here: acquire/release is never
//! on a latency-critical path relative to the socket I/O surrounding it.

use std::sync::Arc;

use parking_lot::Mutex;

/// Idle buffers beyond this count are dropped instead of recycled, to
/// reclaim memory after a burst of large sessions.
const IDLE_CAP: usize = 32;

struct Inner {
    size: usize,
    idle: Mutex<Vec<Vec<u8>>>,
}

/// A pool of fixed-capacity byte buffers, all `size` bytes long.
#[derive(Clone)]
pub struct BufferPool(Arc<Inner>);

impl BufferPool {
    pub fn new(size: usize) -> Self {
        Self(Arc::new(Inner {
            size,
            idle: Mutex::new(Vec::new()),
        }))
    }

    /// Returns a buffer of exactly `size` bytes, reused from the idle
    /// stack if one is available.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self
            .0
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.0.size]);
        PooledBuffer {
            buf,
            pool: self.clone(),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        let mut idle = self.0.idle.lock();
        if idle.len() < IDLE_CAP {
            buf.resize(self.0.size, 0);
            idle.push(buf);
        }
    }
}

/// A buffer checked out of a [`BufferPool`]. Returned to the pool when
/// dropped, so every exit path of a copy loop releases it automatically
/// even on error or early return.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: BufferPool,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_returns_buffer_of_configured_size() {
        let pool = BufferPool::new(4096);
        let buf = pool.acquire();
        assert_eq!(buf.len(), 4096);
    }

    #[test]
    fn released_buffer_is_recycled() {
        let pool = BufferPool::new(16);
        {
            let buf = pool.acquire();
            assert_eq!(buf.len(), 16);
        }
        assert_eq!(pool.0.idle.lock().len(), 1);
        let buf2 = pool.acquire();
        assert_eq!(buf2.len(), 16);
        assert_eq!(pool.0.idle.lock().len(), 0);
    }

    #[test]
    fn idle_retention_is_capped() {
        let pool = BufferPool::new(8);
        let bufs: Vec<_> = (0..IDLE_CAP + 8).map(|_| pool.acquire()).collect();
        drop(bufs);
        assert_eq!(pool.0.idle.lock().len(), IDLE_CAP);
    }
}
