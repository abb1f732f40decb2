//! Pooled byte buffers for value encoding.
//!
//! Buffers are acquired for the duration of one encode or consume call and
//! returned to the pool when the [`PooledBuffer`] guard drops.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded pool of reusable `Vec<u8>` buffers.
pub struct ByteBufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    acquired: AtomicU64,
    reused: AtomicU64,
}

impl ByteBufferPool {
    pub const DEFAULT_MAX_IDLE: usize = 64;

    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            acquired: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Take a cleared buffer with at least `capacity` bytes reserved.
    pub fn acquire(&self, capacity: usize) -> PooledBuffer<'_> {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let recycled = {
            let mut idle = self.idle.lock().expect("buffer pool lock");
            // Prefer the smallest idle buffer that already fits.
            let best = idle
                .iter()
                .enumerate()
                .filter(|(_, b)| b.capacity() >= capacity)
                .min_by_key(|(_, b)| b.capacity())
                .map(|(i, _)| i);
            match best {
                Some(i) => Some(idle.swap_remove(i)),
                None => idle.pop(),
            }
        };
        let buf = match recycled {
            Some(mut buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf.reserve(capacity);
                buf
            }
            None => Vec::with_capacity(capacity),
        };
        PooledBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut idle = match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// Buffers currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("buffer pool lock").len()
    }

    /// (acquired, reused) counters.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.acquired.load(Ordering::Relaxed),
            self.reused.load(Ordering::Relaxed),
        )
    }
}

impl Default for ByteBufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_IDLE)
    }
}

/// A buffer on loan from a [`ByteBufferPool`].
pub struct PooledBuffer<'a> {
    buf: Option<Vec<u8>>,
    pool: &'a ByteBufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_returns_to_pool_on_drop() {
        let pool = ByteBufferPool::new(4);
        {
            let mut buf = pool.acquire(16);
            buf.extend_from_slice(b"hello");
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn recycled_buffers_are_cleared() {
        let pool = ByteBufferPool::new(4);
        {
            let mut buf = pool.acquire(8);
            buf.extend_from_slice(b"stale");
        }
        let buf = pool.acquire(8);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 8);
        assert_eq!(pool.stats(), (2, 1));
    }

    #[test]
    fn pool_is_bounded() {
        let pool = ByteBufferPool::new(1);
        let a = pool.acquire(4);
        let b = pool.acquire(4);
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
    }
}
