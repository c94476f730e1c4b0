//! Heap-backed byte ring buffer.
//!
//! # Layout
//!
//! ```text
//!            head            head + len (mod capacity)
//!             │                   │
//! ┌───────────▼───────────────────▼─────────┐
//! │  free     │ stored bytes ...  │  free   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Stored bytes may wrap past the end of the buffer, so every bulk copy is
//! split into at most two contiguous segments.

use super::{ByteQueue, QueueError};

/// Fixed-capacity FIFO of bytes over a single heap allocation.
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Index of the oldest stored byte.
    head: usize,
    /// Number of stored bytes.
    len: usize,
}

impl RingBuffer {
    /// Maps a logical offset from `head` to a physical index.
    ///
    /// Equivalent to `(head + offset) % capacity` for `offset <= capacity`,
    /// without the division.
    #[inline]
    fn wrap(&self, offset: usize) -> usize {
        let index = self.head + offset;
        if index >= self.buf.len() {
            index - self.buf.len()
        } else {
            index
        }
    }

    /// Copies `out.len()` stored bytes starting at `head` into `out`.
    ///
    /// Caller guarantees `out.len() <= self.len`.
    fn copy_out(&self, out: &mut [u8]) {
        let n = out.len();
        let first = n.min(self.buf.len() - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        out[first..].copy_from_slice(&self.buf[..n - first]);
    }
}

impl ByteQueue for RingBuffer {
    fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| QueueError::Alloc { capacity })?;
        storage.resize(capacity, 0);

        Ok(Self {
            buf: storage.into_boxed_slice(),
            head: 0,
            len: 0,
        })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn enqueue(&mut self, bytes: &[u8]) -> Result<(), QueueError> {
        let available = self.available();
        if bytes.len() > available {
            return Err(QueueError::Insufficient {
                needed: bytes.len(),
                available,
            });
        }

        let tail = self.wrap(self.len);
        let first = bytes.len().min(self.buf.len() - tail);
        self.buf[tail..tail + first].copy_from_slice(&bytes[..first]);
        self.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.len += bytes.len();
        Ok(())
    }

    fn dequeue(&mut self, out: &mut [u8]) -> Result<usize, QueueError> {
        let n = out.len().min(self.len);
        self.copy_out(&mut out[..n]);
        self.head = self.wrap(n);
        self.len -= n;
        if self.len == 0 {
            // Keep the next message contiguous when possible.
            self.head = 0;
        }
        Ok(n)
    }

    fn peek(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        self.copy_out(&mut out[..n]);
        n
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.buf.len())
            .field("head", &self.head)
            .field("len", &self.len)
            .finish()
    }
}
