//! The pipe synchronizer: admission, direction locks and cross-direction wakeups.
//!
//! # Overview
//!
//! - [`Pipe`] - Shared state of one device: byte queue, counters, locks, signals
//! - [`Session`] - One open handle, bound to a single [`OpenMode`]
//! - [`PipeConfig`] - Capacity and admission cap, fixed at creation
//!
//! # Locking
//!
//! ```text
//!            readers gate            writers gate
//!                 │                       │
//!   read() ───────┤                       ├─────── write()
//!                 ▼                       ▼
//!        ┌─────────────────── pipe lock ───────────────────┐
//!        │ queue, reader_waiting, writer_waiting, counters │
//!        └─────────────────────────────────────────────────┘
//!            ▲ data_available           space_available ▲
//!            └──────── signalled by the other direction ─┘
//! ```
//!
//! A gate admits one actor per direction and is held across the whole
//! check-wait-transfer sequence. Readers and writers run concurrently and only
//! meet under the pipe lock. Lock order is always gate, then pipe lock; release
//! order is the reverse.
//!
//! # Per-operation state machine
//!
//! ```text
//! Idle → AcquiringGate → CheckingCondition ─┬─► Transferring → Done
//!                                 ▲         │
//!                                 └─ Waiting◄┘   (pipe lock released while blocked)
//! ```
//!
//! Reads may return fewer bytes than requested. Writes are atomic: a message
//! is stored whole once enough space is free, or not at all.

mod config;
mod session;

pub use config::{ConfigError, DEFAULT_CAPACITY, DEFAULT_MAX_SESSIONS, PipeConfig};
pub use session::{OpenMode, Readiness, Session};

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use thiserror::Error;

use crate::queue::{ByteQueue, QueueError, RingBuffer};
use crate::sync::{CancelToken, Deadline, Gate, GateGuard, Notify, Timeout, WaitError, wait};
use crate::trace::{debug, error, trace, warn};

/// Errors returned by pipe operations.
#[derive(Debug, Error)]
pub enum PipeError {
    /// Every session slot is taken. Retry after another session closes.
    #[error("pipe is busy: all {max_sessions} sessions are open")]
    Busy { max_sessions: usize },
    /// The operation does not match the session's open mode.
    #[error("operation not permitted on a {mode} session")]
    PermissionDenied { mode: OpenMode },
    /// A single write can never exceed the pipe capacity.
    #[error("message of {len} bytes exceeds pipe capacity of {capacity} bytes")]
    MessageTooLarge { len: usize, capacity: usize },
    /// A blocking wait was cancelled through the session's [`CancelToken`].
    #[error("operation interrupted")]
    Interrupted,
    /// A bounded wait ran out of time.
    #[error("operation timed out")]
    TimedOut,
    /// A non-blocking operation could not proceed immediately.
    #[error("operation would block")]
    WouldBlock,
    /// The byte queue failed.
    #[error("queue storage error: {0}")]
    Io(#[from] QueueError),
    /// The pipe configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<WaitError> for PipeError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Interrupted => Self::Interrupted,
            WaitError::TimedOut => Self::TimedOut,
        }
    }
}

/// Direction of data flow through a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Hook notified when an actor enters or leaves a direction's critical section.
///
/// Both calls happen while the direction gate is held: `on_enter` right after
/// it is taken, `on_exit` right before it is released, on every exit path.
/// Implementations must not block and must not call back into the pipe.
pub trait PipeObserver: Send + Sync {
    fn on_enter(&self, _direction: Direction) {}
    fn on_exit(&self, _direction: Direction) {}
}

/// Point-in-time view of a pipe, taken under the pipe lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    pub capacity: usize,
    pub max_sessions: usize,
    /// Bytes currently resident in the queue.
    pub occupancy: usize,
    pub active_sessions: usize,
    pub reader_waiting: bool,
    pub writer_waiting: bool,
    /// `false` after the last session closed and the storage was released.
    pub storage_live: bool,
    /// Total bytes handed to readers.
    pub bytes_read: u64,
    /// Total bytes accepted from writers.
    pub bytes_written: u64,
    /// Bytes dropped when storage was released with data still resident.
    pub bytes_discarded: u64,
    pub reads: u64,
    pub writes: u64,
}

impl PipeStats {
    /// Every byte written has been read, discarded, or is still resident.
    #[must_use]
    pub const fn is_conserved(&self) -> bool {
        self.bytes_written == self.bytes_read + self.bytes_discarded + self.occupancy as u64
    }
}

struct PipeState<Q> {
    /// `None` between the last close and the next open.
    queue: Option<Q>,
    active_sessions: usize,
    reader_waiting: bool,
    writer_waiting: bool,
    bytes_read: u64,
    bytes_written: u64,
    bytes_discarded: u64,
    reads: u64,
    writes: u64,
}

impl<Q: ByteQueue> PipeState<Q> {
    fn queue(&self) -> Result<&Q, QueueError> {
        self.queue.as_ref().ok_or(QueueError::Released)
    }

    fn queue_mut(&mut self) -> Result<&mut Q, QueueError> {
        self.queue.as_mut().ok_or(QueueError::Released)
    }

    fn occupancy(&self) -> usize {
        self.queue.as_ref().map_or(0, Q::len)
    }
}

/// Renders resident bytes for trace output.
#[cfg(feature = "tracing")]
fn dump<Q: ByteQueue>(state: &PipeState<Q>) -> String {
    let Some(queue) = state.queue.as_ref() else {
        return String::new();
    };
    let mut bytes = vec![0u8; queue.len()];
    let n = queue.peek(&mut bytes);
    String::from_utf8_lossy(&bytes[..n]).into_owned()
}

/// A bounded byte pipe shared by every session opened on it.
///
/// Created behind an [`Arc`]; sessions keep the pipe alive until they close.
///
/// # Example
///
/// ```
/// use msgpipe::{OpenMode, Pipe, PipeConfig};
///
/// let pipe = Pipe::new(PipeConfig::default()).unwrap();
/// let writer = pipe.open(OpenMode::WriteOnly).unwrap();
/// let reader = pipe.open(OpenMode::ReadOnly).unwrap();
///
/// assert_eq!(writer.write(b"hello").unwrap(), 5);
///
/// let mut buf = [0u8; 16];
/// let n = reader.read(&mut buf).unwrap();
/// assert_eq!(&buf[..n], b"hello");
/// ```
pub struct Pipe<Q: ByteQueue = RingBuffer> {
    config: PipeConfig,
    state: Mutex<PipeState<Q>>,
    /// Signalled by writers when a waiting reader may find data.
    data_available: Condvar,
    /// Signalled by readers when a waiting writer may find space.
    space_available: Condvar,
    readers: Gate,
    writers: Gate,
    observer: Option<Arc<dyn PipeObserver>>,
}

impl Pipe {
    /// Creates a ring-buffer pipe and allocates its storage.
    ///
    /// # Errors
    ///
    /// [`PipeError::Config`] for an invalid configuration, [`PipeError::Io`]
    /// if storage cannot be allocated.
    pub fn new(config: PipeConfig) -> Result<Arc<Self>, PipeError> {
        Self::build(config, None)
    }

    /// Creates a ring-buffer pipe that reports critical-section entry and exit
    /// to `observer`.
    ///
    /// # Errors
    ///
    /// See [`Pipe::new`].
    pub fn with_observer(
        config: PipeConfig,
        observer: Arc<dyn PipeObserver>,
    ) -> Result<Arc<Self>, PipeError> {
        Self::build(config, Some(observer))
    }
}

impl<Q: ByteQueue> Pipe<Q> {
    /// Creates a pipe over any [`ByteQueue`] implementation.
    ///
    /// # Errors
    ///
    /// See [`Pipe::new`].
    pub fn build(
        config: PipeConfig,
        observer: Option<Arc<dyn PipeObserver>>,
    ) -> Result<Arc<Self>, PipeError> {
        config.validate()?;
        let queue = Q::with_capacity(config.capacity).map_err(|err| {
            error!(capacity = config.capacity, error = %err, "failed to allocate pipe storage");
            err
        })?;

        debug!(
            capacity = config.capacity,
            max_sessions = config.max_sessions,
            "pipe created"
        );

        Ok(Arc::new(Self {
            config,
            state: Mutex::new(PipeState {
                queue: Some(queue),
                active_sessions: 0,
                reader_waiting: false,
                writer_waiting: false,
                bytes_read: 0,
                bytes_written: 0,
                bytes_discarded: 0,
                reads: 0,
                writes: 0,
            }),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
            readers: Gate::new(),
            writers: Gate::new(),
            observer,
        }))
    }

    /// Opens a session in `mode`.
    ///
    /// # Errors
    ///
    /// [`PipeError::Busy`] when `max_sessions` sessions are already open.
    pub fn open(self: &Arc<Self>, mode: OpenMode) -> Result<Session<Q>, PipeError> {
        Session::open(self, mode)
    }

    #[must_use]
    pub const fn config(&self) -> &PipeConfig {
        &self.config
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Takes a consistent snapshot of the pipe's counters.
    #[must_use]
    pub fn stats(&self) -> PipeStats {
        let state = self.lock_state();
        PipeStats {
            capacity: self.config.capacity,
            max_sessions: self.config.max_sessions,
            occupancy: state.occupancy(),
            active_sessions: state.active_sessions,
            reader_waiting: state.reader_waiting,
            writer_waiting: state.writer_waiting,
            storage_live: state.queue.is_some(),
            bytes_read: state.bytes_read,
            bytes_written: state.bytes_written,
            bytes_discarded: state.bytes_discarded,
            reads: state.reads,
            writes: state.writes,
        }
    }

    /// Copies resident bytes into `out` without consuming them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        self.lock_state().queue.as_ref().map_or(0, |queue| queue.peek(out))
    }

    /// Admission control: claims a session slot.
    ///
    /// Storage released by a previous last close is allocated again here, so
    /// an open never observes freed storage.
    pub(crate) fn try_acquire_session(&self) -> Result<(), PipeError> {
        let mut state = self.lock_state();
        if state.active_sessions >= self.config.max_sessions {
            debug!(
                max_sessions = self.config.max_sessions,
                "admission refused: pipe busy"
            );
            return Err(PipeError::Busy {
                max_sessions: self.config.max_sessions,
            });
        }

        if state.queue.is_none() {
            let queue = Q::with_capacity(self.config.capacity).map_err(|err| {
                error!(error = %err, "failed to reallocate pipe storage");
                err
            })?;
            state.queue = Some(queue);
            debug!(capacity = self.config.capacity, "pipe storage reallocated");
        }

        state.active_sessions += 1;
        debug!(active_sessions = state.active_sessions, "session admitted");
        Ok(())
    }

    /// Gives back a session slot; the last one out releases the storage.
    pub(crate) fn release_session(&self) {
        let mut state = self.lock_state();
        debug_assert!(state.active_sessions > 0, "release without acquire");
        state.active_sessions = state.active_sessions.saturating_sub(1);
        debug!(active_sessions = state.active_sessions, "session released");

        if state.active_sessions == 0
            && let Some(queue) = state.queue.take()
        {
            state.bytes_discarded += queue.len() as u64;
            debug!(
                discarded = queue.len(),
                "last session closed, pipe storage released"
            );
        }
    }

    /// Blocking read of up to `buf.len()` bytes.
    pub(crate) fn read(
        self: &Arc<Self>,
        buf: &mut [u8],
        cancel: &CancelToken,
        timeout: Timeout,
    ) -> Result<usize, PipeError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = Deadline::after(timeout);
        let _registration = cancel.register(Arc::clone(self) as Arc<dyn Notify>);

        let gate = self.readers.acquire(cancel, &deadline).map_err(|err| {
            trace!(error = %err, "reader gave up waiting for the reader gate");
            err
        })?;
        let _section = self.enter(Direction::Read, gate);

        let mut state = self.lock_state();
        loop {
            match state.queue().map(ByteQueue::is_empty) {
                Ok(false) => break,
                Ok(true) => {}
                Err(err) => {
                    state.reader_waiting = false;
                    return Err(err.into());
                }
            }

            state.reader_waiting = true;
            trace!("pipe empty, reader waiting");
            state = match wait(&self.data_available, state, cancel, &deadline) {
                Ok(state) => state,
                Err((mut state, err)) => {
                    state.reader_waiting = false;
                    trace!(error = %err, "reader wait aborted");
                    return Err(err.into());
                }
            };
        }

        self.drain(&mut state, buf)
    }

    /// Non-blocking read; fails with [`PipeError::WouldBlock`] instead of waiting.
    pub(crate) fn try_read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let gate = self.readers.try_acquire().ok_or(PipeError::WouldBlock)?;
        let _section = self.enter(Direction::Read, gate);

        let mut state = self.lock_state();
        if state.queue()?.is_empty() {
            return Err(PipeError::WouldBlock);
        }
        self.drain(&mut state, buf)
    }

    /// Blocking write of all of `bytes`.
    pub(crate) fn write(
        self: &Arc<Self>,
        bytes: &[u8],
        cancel: &CancelToken,
        timeout: Timeout,
    ) -> Result<usize, PipeError> {
        self.check_message_len(bytes.len())?;
        if bytes.is_empty() {
            return Ok(0);
        }

        let deadline = Deadline::after(timeout);
        let _registration = cancel.register(Arc::clone(self) as Arc<dyn Notify>);

        let gate = self.writers.acquire(cancel, &deadline).map_err(|err| {
            trace!(error = %err, "writer gave up waiting for the writer gate");
            err
        })?;
        let _section = self.enter(Direction::Write, gate);

        let mut state = self.lock_state();
        loop {
            match state.queue().map(|queue| queue.available() >= bytes.len()) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    state.writer_waiting = false;
                    return Err(err.into());
                }
            }

            state.writer_waiting = true;
            trace!(needed = bytes.len(), "pipe full, writer waiting");
            state = match wait(&self.space_available, state, cancel, &deadline) {
                Ok(state) => state,
                Err((mut state, err)) => {
                    state.writer_waiting = false;
                    trace!(error = %err, "writer wait aborted");
                    return Err(err.into());
                }
            };
        }

        self.fill(&mut state, bytes)?;
        Ok(bytes.len())
    }

    /// Non-blocking write; fails with [`PipeError::WouldBlock`] instead of waiting.
    pub(crate) fn try_write(&self, bytes: &[u8]) -> Result<usize, PipeError> {
        self.check_message_len(bytes.len())?;
        if bytes.is_empty() {
            return Ok(0);
        }

        let gate = self.writers.try_acquire().ok_or(PipeError::WouldBlock)?;
        let _section = self.enter(Direction::Write, gate);

        let mut state = self.lock_state();
        if state.queue()?.available() < bytes.len() {
            return Err(PipeError::WouldBlock);
        }
        self.fill(&mut state, bytes)?;
        Ok(bytes.len())
    }

    /// Returns `(occupancy, available)` without taking any gate.
    pub(crate) fn levels(&self) -> (usize, usize) {
        let state = self.lock_state();
        state
            .queue
            .as_ref()
            .map_or((0, 0), |queue| (queue.len(), queue.available()))
    }

    const fn check_message_len(&self, len: usize) -> Result<(), PipeError> {
        if len > self.config.capacity {
            return Err(PipeError::MessageTooLarge {
                len,
                capacity: self.config.capacity,
            });
        }
        Ok(())
    }

    /// Moves bytes from the queue into `buf` and wakes a waiting writer.
    ///
    /// Caller holds the reader gate and has checked the queue is non-empty.
    fn drain(&self, state: &mut PipeState<Q>, buf: &mut [u8]) -> Result<usize, PipeError> {
        trace!(
            occupancy = state.occupancy(),
            contents = %dump(state),
            "read-start"
        );

        let result = state.queue_mut().and_then(|queue| queue.dequeue(buf));
        if let Ok(copied) = result {
            state.bytes_read += copied as u64;
            state.reads += 1;
            self.simulate_delay();
        }

        state.reader_waiting = false;
        if state.writer_waiting {
            trace!("waking one writer");
            self.space_available.notify_one();
        }

        let copied = result.map_err(|err| {
            warn!(error = %err, "dequeue failed");
            err
        })?;

        trace!(
            copied,
            occupancy = state.occupancy(),
            contents = %dump(state),
            "read-end"
        );
        Ok(copied)
    }

    /// Stores all of `bytes` and wakes a waiting reader.
    ///
    /// Caller holds the writer gate and has checked there is room.
    fn fill(&self, state: &mut PipeState<Q>, bytes: &[u8]) -> Result<(), PipeError> {
        trace!(
            len = bytes.len(),
            occupancy = state.occupancy(),
            contents = %dump(state),
            "write-start"
        );

        let result = state.queue_mut().and_then(|queue| queue.enqueue(bytes));
        if result.is_ok() {
            state.bytes_written += bytes.len() as u64;
            state.writes += 1;
            self.simulate_delay();
        }

        state.writer_waiting = false;
        if state.reader_waiting {
            trace!("waking the reader");
            self.data_available.notify_one();
        }

        result.map_err(|err| {
            warn!(error = %err, "enqueue failed");
            err
        })?;

        trace!(
            occupancy = state.occupancy(),
            contents = %dump(state),
            "write-end"
        );
        Ok(())
    }

    fn simulate_delay(&self) {
        if !self.config.copy_delay.is_zero() {
            thread::sleep(self.config.copy_delay);
        }
    }

    fn enter<'a>(&'a self, direction: Direction, gate: GateGuard<'a>) -> Section<'a> {
        let observer = self.observer.as_deref();
        if let Some(observer) = observer {
            observer.on_enter(direction);
        }
        Section {
            direction,
            observer,
            _gate: gate,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipeState<Q>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Q: ByteQueue> Notify for Pipe<Q> {
    fn notify_all(&self) {
        self.readers.notify_all();
        self.writers.notify_all();

        let _state = self.lock_state();
        self.data_available.notify_all();
        self.space_available.notify_all();
    }
}

impl<Q: ByteQueue> fmt::Debug for Pipe<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// A held direction gate. Reports exit to the observer, then releases the gate.
struct Section<'a> {
    direction: Direction,
    observer: Option<&'a dyn PipeObserver>,
    _gate: GateGuard<'a>,
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer {
            observer.on_exit(self.direction);
        }
    }
}
