//! Blocking primitives with interruptible, optionally bounded waits.
//!
//! - [`CancelToken`] - Interrupts a session's blocking waits from another thread
//! - [`Timeout`] - Bound on how long a blocking operation may wait
//! - `Gate` - Single-holder admission lock for one pipe direction
//!
//! Every wait in this crate goes through the same loop discipline: re-check the
//! condition after each wakeup, and only then look at cancellation and deadline.
//! A wakeup handed to a waiter is therefore never discarded by an interrupt.

mod cancel;
mod gate;
mod wait;

pub use cancel::CancelToken;
pub use wait::{Timeout, WaitError};

pub(crate) use cancel::Notify;
pub(crate) use gate::{Gate, GateGuard};
pub(crate) use wait::{Deadline, wait};
