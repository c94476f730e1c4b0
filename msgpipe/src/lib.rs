//! Bounded in-process message pipes shared by many readers and writers.
//!
//! A [`Pipe`] is a fixed-capacity byte queue that any number of threads open
//! as [`Session`]s, up to a per-pipe cap. Reads block until data arrives and
//! may return fewer bytes than asked for. Writes block until the whole message
//! fits and are stored atomically, so messages never interleave. At most one
//! reader and one writer are active at a time; the two directions proceed
//! concurrently and wake each other as data and space appear.
//!
//! Every blocking call can be interrupted through the session's
//! [`CancelToken`] or bounded with a [`Timeout`].
//!
//! Named devices live in a [`Registry`].

pub mod pipe;
pub mod queue;
pub mod registry;
pub mod sync;
mod trace;

pub use pipe::{
    Direction, OpenMode, Pipe, PipeConfig, PipeError, PipeObserver, PipeStats, Readiness, Session,
};
pub use queue::{ByteQueue, QueueError, RingBuffer};
pub use registry::{DevicePath, Registry, RegistryError};
pub use sync::{CancelToken, Timeout, WaitError};
pub use trace::init_tracing;
