//! Size-bucketed pool of bounded circular buffers
//!
//! stdout/stderr capture needs a bounded sink that never grows unbounded
//! output into memory, and reusing those sinks across the many short-lived
//! executions a scheduler produces avoids an allocation per job firing.
//! [`CircularBuffer`] is the sink; [`BufferPool`] is the free-list.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Default buffer capacity handed out by [`BufferPool::get`].
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Hard ceiling on [`BufferPool::get_sized`] requests.
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// A fixed-capacity byte sink that discards the oldest bytes once full.
///
/// `total_written` counts every byte ever written, even ones since
/// overwritten, so callers can tell whether truncation occurred.
#[derive(Debug)]
pub struct CircularBuffer {
    capacity: usize,
    data: VecDeque<u8>,
    total_written: u64,
}

impl CircularBuffer {
    /// Allocate a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: VecDeque::with_capacity(capacity),
            total_written: 0,
        }
    }

    /// Capacity this buffer was allocated with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes ever written, including ones already discarded.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Bytes currently retained (≤ `capacity`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written (or the buffer was reset).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append bytes, discarding the oldest retained bytes if `buf` would
    /// overflow capacity.
    pub fn write(&mut self, buf: &[u8]) {
        self.total_written += buf.len() as u64;

        if buf.len() >= self.capacity {
            self.data.clear();
            let start = buf.len() - self.capacity;
            self.data.extend(&buf[start..]);
            return;
        }

        let overflow = (self.data.len() + buf.len()).saturating_sub(self.capacity);
        for _ in 0..overflow {
            self.data.pop_front();
        }
        self.data.extend(buf);
    }

    /// Snapshot the retained bytes as a `Vec<u8>`.
    pub fn contents(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    /// Snapshot the retained bytes as a lossy UTF-8 string, the form job
    /// output is normally surfaced in.
    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Clear retained bytes and reset `total_written` to zero, readying the
    /// buffer for reuse from the pool.
    pub fn reset(&mut self) {
        self.data.clear();
        self.total_written = 0;
    }
}

/// A buffer handed out of the pool together with the bucket it came from
/// (`None` for an out-of-band allocation that should not be pooled again).
pub struct PooledBuffer {
    buffer: Option<CircularBuffer>,
    bucket_size: Option<usize>,
}

impl PooledBuffer {
    fn pooled(buffer: CircularBuffer, bucket_size: usize) -> Self {
        Self {
            buffer: Some(buffer),
            bucket_size: Some(bucket_size),
        }
    }

    fn unpooled(buffer: CircularBuffer) -> Self {
        Self {
            buffer: Some(buffer),
            bucket_size: None,
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = CircularBuffer;
    fn deref(&self) -> &CircularBuffer {
        self.buffer.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut CircularBuffer {
        self.buffer.as_mut().expect("buffer taken before drop")
    }
}

/// Size-bucketed pool of [`CircularBuffer`]s.
///
/// `get` always returns [`DEFAULT_BUFFER_SIZE`] buffers from a single
/// free-list. `get_sized` serves a specific capacity from its own bucket
/// when it matches a known bucket size, or allocates fresh (and does not
/// pool the result) otherwise.
pub struct BufferPool {
    sized_free: Mutex<std::collections::HashMap<usize, Vec<CircularBuffer>>>,
    bucket_sizes: Vec<usize>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// Build a pool with the default bucket ladder
    /// (16KiB, 64KiB, 256KiB, 1MiB).
    pub fn new() -> Self {
        Self {
            sized_free: Mutex::new(std::collections::HashMap::new()),
            bucket_sizes: vec![DEFAULT_BUFFER_SIZE, 64 * 1024, 256 * 1024, 1024 * 1024],
        }
    }

    /// Borrow a buffer of [`DEFAULT_BUFFER_SIZE`], reused from the pool if
    /// one is free.
    pub fn get(&self) -> PooledBuffer {
        self.get_sized(DEFAULT_BUFFER_SIZE)
    }

    /// Borrow a buffer whose capacity is at least `n`, rounded up to the
    /// smallest matching bucket and capped at [`MAX_BUFFER_SIZE`].
    /// Requests outside the bucket ladder allocate fresh and are not
    /// returned to the pool on [`drop`](PooledBuffer).
    pub fn get_sized(&self, n: usize) -> PooledBuffer {
        let n = n.min(MAX_BUFFER_SIZE);

        if let Some(&bucket) = self.bucket_sizes.iter().find(|&&b| b >= n) {
            let mut free = self.sized_free.lock();
            let list = free.entry(bucket).or_default();
            if let Some(buf) = list.pop() {
                return PooledBuffer::pooled(buf, bucket);
            }
            drop(free);
            return PooledBuffer::pooled(CircularBuffer::new(bucket), bucket);
        }

        PooledBuffer::unpooled(CircularBuffer::new(n))
    }

    /// Return a buffer to the pool, resetting it first. No-ops for
    /// out-of-band buffers, which are simply dropped (garbage collected).
    pub fn put(&self, mut pooled: PooledBuffer) {
        let bucket = pooled.bucket_size;
        if let (Some(mut buffer), Some(bucket)) = (pooled.buffer.take(), bucket) {
            buffer.reset();
            self.sized_free.lock().entry(bucket).or_default().push(buffer);
        }
    }

    /// Number of buffers currently sitting idle in the pool, across all
    /// buckets. Exposed for tests and diagnostics.
    pub fn idle_count(&self) -> usize {
        self.sized_free.lock().values().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_overwrites_oldest_bytes_once_full() {
        let mut buf = CircularBuffer::new(4);
        buf.write(b"ab");
        buf.write(b"cdef");
        assert_eq!(buf.contents(), b"cdef");
        assert_eq!(buf.total_written(), 6);
    }

    #[test]
    fn reset_clears_contents_and_total_written() {
        let mut buf = CircularBuffer::new(4);
        buf.write(b"abcd");
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.total_written(), 0);
    }

    #[test]
    fn pool_reuses_default_sized_buffers() {
        let pool = BufferPool::new();
        let mut buf = pool.get();
        buf.write(b"hello");
        pool.put(buf);

        assert_eq!(pool.idle_count(), 1);
        let reused = pool.get();
        assert!(reused.is_empty());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn get_sized_rounds_up_to_bucket() {
        let pool = BufferPool::new();
        let buf = pool.get_sized(50_000);
        assert_eq!(buf.capacity(), 64 * 1024);
    }

    #[test]
    fn out_of_band_size_bypasses_pool_on_put() {
        let pool = BufferPool::new();
        let buf = pool.get_sized(MAX_BUFFER_SIZE * 2);
        assert_eq!(buf.capacity(), MAX_BUFFER_SIZE);
        pool.put(buf);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn put_is_idempotent_with_respect_to_total_written() {
        let pool = BufferPool::new();
        let mut buf = pool.get();
        buf.write(b"data");
        pool.put(buf);

        let reused = pool.get();
        assert_eq!(reused.total_written(), 0);
    }
}
