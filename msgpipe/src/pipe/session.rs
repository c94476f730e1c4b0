//! Open handles on a pipe.

use std::fmt;
use std::sync::Arc;

use crate::queue::{ByteQueue, RingBuffer};
use crate::sync::{CancelToken, Timeout};
use crate::trace::debug;

use super::{Pipe, PipeError};

/// Access mode fixed when a session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("read-only"),
            Self::WriteOnly => f.write_str("write-only"),
        }
    }
}

/// Non-blocking readiness report from [`Session::poll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// A read would find data.
    pub readable: bool,
    /// A write of at least one byte would find space.
    pub writable: bool,
}

/// One actor's open handle on a [`Pipe`].
///
/// Holds one of the pipe's `max_sessions` slots until it is closed or dropped.
/// Blocking calls on a session can be interrupted from another thread through
/// its [`cancel_token`](Session::cancel_token).
pub struct Session<Q: ByteQueue = RingBuffer> {
    pipe: Arc<Pipe<Q>>,
    mode: OpenMode,
    cancel: CancelToken,
}

impl<Q: ByteQueue> Session<Q> {
    /// Claims a session slot on `pipe`.
    ///
    /// # Errors
    ///
    /// [`PipeError::Busy`] when every slot is taken, [`PipeError::Io`] if the
    /// pipe's storage had been released and cannot be allocated again.
    pub fn open(pipe: &Arc<Pipe<Q>>, mode: OpenMode) -> Result<Self, PipeError> {
        pipe.try_acquire_session()?;
        debug!(%mode, "session opened");
        Ok(Self {
            pipe: Arc::clone(pipe),
            mode,
            cancel: CancelToken::new(),
        })
    }

    #[must_use]
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    #[must_use]
    pub const fn pipe(&self) -> &Arc<Pipe<Q>> {
        &self.pipe
    }

    /// Token that interrupts this session's blocking calls.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Reads up to `buf.len()` bytes, blocking until at least one is available.
    ///
    /// Returns the number of bytes copied; `0` only for an empty `buf`.
    ///
    /// # Errors
    ///
    /// [`PipeError::PermissionDenied`] on a write-only session,
    /// [`PipeError::Interrupted`] if the wait is cancelled.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        self.read_timeout(buf, Timeout::Infinite)
    }

    /// Like [`read`](Self::read), giving up with [`PipeError::TimedOut`] once
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// See [`read`](Self::read).
    pub fn read_timeout(&self, buf: &mut [u8], timeout: Timeout) -> Result<usize, PipeError> {
        self.require(OpenMode::ReadOnly)?;
        self.pipe.read(buf, &self.cancel, timeout)
    }

    /// Reads without blocking.
    ///
    /// # Errors
    ///
    /// [`PipeError::WouldBlock`] if another reader is active or the pipe is empty.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        self.require(OpenMode::ReadOnly)?;
        self.pipe.try_read(buf)
    }

    /// Writes all of `bytes` as one message, blocking until it fits.
    ///
    /// # Errors
    ///
    /// [`PipeError::PermissionDenied`] on a read-only session,
    /// [`PipeError::MessageTooLarge`] if `bytes` exceeds the pipe capacity,
    /// [`PipeError::Interrupted`] if the wait is cancelled.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, PipeError> {
        self.write_timeout(bytes, Timeout::Infinite)
    }

    /// Like [`write`](Self::write), giving up with [`PipeError::TimedOut`]
    /// once `timeout` elapses. Nothing is stored on failure.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_timeout(&self, bytes: &[u8], timeout: Timeout) -> Result<usize, PipeError> {
        self.require(OpenMode::WriteOnly)?;
        self.pipe.write(bytes, &self.cancel, timeout)
    }

    /// Writes without blocking.
    ///
    /// # Errors
    ///
    /// [`PipeError::WouldBlock`] if another writer is active or the message
    /// does not fit right now.
    pub fn try_write(&self, bytes: &[u8]) -> Result<usize, PipeError> {
        self.require(OpenMode::WriteOnly)?;
        self.pipe.try_write(bytes)
    }

    /// Reports whether this session's direction could make progress now.
    #[must_use]
    pub fn poll(&self) -> Readiness {
        let (occupancy, available) = self.pipe.levels();
        match self.mode {
            OpenMode::ReadOnly => Readiness {
                readable: occupancy > 0,
                writable: false,
            },
            OpenMode::WriteOnly => Readiness {
                readable: false,
                writable: available > 0,
            },
        }
    }

    /// Gives the session slot back. Equivalent to dropping the session.
    pub fn close(self) {}

    fn require(&self, mode: OpenMode) -> Result<(), PipeError> {
        if self.mode != mode {
            return Err(PipeError::PermissionDenied { mode: self.mode });
        }
        Ok(())
    }
}

impl<Q: ByteQueue> Drop for Session<Q> {
    fn drop(&mut self) {
        debug!(mode = %self.mode, "session closed");
        self.pipe.release_session();
    }
}

impl<Q: ByteQueue> fmt::Debug for Session<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}
