//! Fixed-capacity FIFO byte storage.
//!
//! The pipe treats its storage as an external collaborator and relies only on
//! the [`ByteQueue`] contract: bulk enqueue that stores everything or nothing,
//! bulk dequeue that may return fewer bytes than requested, and
//! occupancy/free-space queries. [`RingBuffer`] is the implementation used by
//! default.
//!
//! Queues are not synchronized. Every call happens under the owning pipe's lock.

mod ring;

pub use ring::RingBuffer;

use thiserror::Error;

/// Errors reported by queue storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Backing storage could not be allocated.
    #[error("failed to allocate {capacity} bytes of queue storage")]
    Alloc { capacity: usize },
    /// A queue must hold at least one byte.
    #[error("queue capacity must be greater than 0")]
    ZeroCapacity,
    /// An enqueue did not fit in the remaining space.
    #[error("not enough space: need {needed} bytes, {available} available")]
    Insufficient { needed: usize, available: usize },
    /// The backing storage was torn down when the last session closed.
    #[error("queue storage has been released")]
    Released,
}

/// Contract for the byte storage behind a pipe.
///
/// Implementations must keep `len() <= capacity()` at all times and must
/// never perform a partial [`enqueue`](ByteQueue::enqueue).
pub trait ByteQueue: Send + 'static {
    /// Allocates storage for exactly `capacity` bytes.
    ///
    /// # Errors
    ///
    /// [`QueueError::ZeroCapacity`] or [`QueueError::Alloc`].
    fn with_capacity(capacity: usize) -> Result<Self, QueueError>
    where
        Self: Sized;

    /// Total number of bytes the queue can hold.
    fn capacity(&self) -> usize;

    /// Number of bytes currently stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes that can be enqueued right now.
    fn available(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Appends all of `bytes`, or nothing.
    ///
    /// # Errors
    ///
    /// [`QueueError::Insufficient`] if `bytes` does not fit; the queue is left unchanged.
    fn enqueue(&mut self, bytes: &[u8]) -> Result<(), QueueError>;

    /// Removes up to `out.len()` bytes from the front of the queue.
    ///
    /// Returns the number of bytes copied into `out`.
    ///
    /// # Errors
    ///
    /// Implementations backed by fallible storage may fail; [`RingBuffer`] never does.
    fn dequeue(&mut self, out: &mut [u8]) -> Result<usize, QueueError>;

    /// Copies up to `out.len()` bytes from the front without consuming them.
    fn peek(&self, out: &mut [u8]) -> usize;
}
