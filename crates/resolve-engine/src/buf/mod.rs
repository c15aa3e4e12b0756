//! Reusable growable byte buffers and a pool of paired (data, errors)
//! buffers, so the resolver doesn't allocate fresh `Vec<u8>`s per request.

use bytes::BytesMut;

/// A paired `data`/`errors` byte buffer. Both halves are append-only during
/// a resolve and reset in place (`O(1)`, retaining capacity) before the pair
/// is returned to its pool.
#[derive(Debug, Default)]
pub struct BufPair {
    /// Rendered `data` bytes.
    pub data: BytesMut,
    /// Rendered `errors` bytes (individual JSON error objects, comma
    /// separated; the writer wraps them in `[...]`).
    pub errors: BytesMut,
}

impl BufPair {
    /// Create an empty pair.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset both halves to length zero without releasing their capacity.
    pub fn reset(&mut self) {
        self.data.clear();
        self.errors.clear();
    }

    /// Whether both halves are currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.errors.is_empty()
    }
}

/// A process-wide free list of [`BufPair`]s.
///
/// `acquire`/release happen under the pool's own lock only; callers never
/// hold that lock across I/O. Acquiring returns a [`PooledBufPair`] guard
/// that resets and returns its buffer to the pool on drop.
#[derive(Default)]
pub struct BufPairPool {
    free: parking_lot::Mutex<Vec<BufPair>>,
}

impl BufPairPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a buffer pair, reusing a freed one if available.
    #[must_use]
    pub fn acquire(self: &std::sync::Arc<Self>) -> PooledBufPair {
        let pair = self.free.lock().pop().unwrap_or_default();
        PooledBufPair {
            pair: Some(pair),
            pool: self.clone(),
        }
    }

    fn release(&self, mut pair: BufPair) {
        pair.reset();
        self.free.lock().push(pair);
    }
}

/// RAII guard over a pooled [`BufPair`]. Returns the pair to its pool on
/// drop; `take` can be used to extract the pair without returning it (e.g.
/// to hand ownership to a single-flight entry shared across waiters).
pub struct PooledBufPair {
    pair: Option<BufPair>,
    pool: std::sync::Arc<BufPairPool>,
}

impl PooledBufPair {
    /// Extract the buffer pair, skipping the automatic pool return.
    #[must_use]
    pub fn take(mut self) -> BufPair {
        self.pair.take().expect("pair already taken")
    }
}

impl std::ops::Deref for PooledBufPair {
    type Target = BufPair;
    fn deref(&self) -> &BufPair {
        self.pair.as_ref().expect("pair already taken")
    }
}

impl std::ops::DerefMut for PooledBufPair {
    fn deref_mut(&mut self) -> &mut BufPair {
        self.pair.as_mut().expect("pair already taken")
    }
}

impl Drop for PooledBufPair {
    fn drop(&mut self) {
        if let Some(pair) = self.pair.take() {
            self.pool.release(pair);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reset_is_noop_on_empty_pair_and_clears_nonempty() {
        let mut pair = BufPair::new();
        pair.data.extend_from_slice(b"abc");
        pair.errors.extend_from_slice(b"def");
        pair.reset();
        assert!(pair.is_empty());
    }

    #[test]
    fn pool_reuses_released_buffer() {
        let pool = Arc::new(BufPairPool::new());
        {
            let mut guard = pool.acquire();
            guard.data.extend_from_slice(b"hello");
        }
        assert_eq!(pool.free.lock().len(), 1);
        let guard = pool.acquire();
        assert!(guard.is_empty());
        assert_eq!(pool.free.lock().len(), 0);
    }

    #[test]
    fn take_skips_pool_return() {
        let pool = Arc::new(BufPairPool::new());
        let guard = pool.acquire();
        let _pair = guard.take();
        assert_eq!(pool.free.lock().len(), 0);
    }
}
