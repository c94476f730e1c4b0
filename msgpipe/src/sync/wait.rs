//! Condition waits that honour cancellation and deadlines.

use std::sync::{Condvar, MutexGuard, PoisonError};
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use super::CancelToken;

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most this long.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Reasons a blocking wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The session's [`CancelToken`] was triggered.
    #[error("wait interrupted")]
    Interrupted,
    /// The operation's [`Timeout`] elapsed.
    #[error("wait timed out")]
    TimedOut,
}

/// Absolute point in time after which an operation stops waiting.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Deadline {
    Never,
    At(Instant),
}

impl Deadline {
    pub(crate) fn after(timeout: Timeout) -> Self {
        match timeout {
            Timeout::Infinite => Self::Never,
            // A duration too large to represent is as good as no deadline.
            Timeout::Duration(d) => Instant::now().checked_add(d).map_or(Self::Never, Self::At),
        }
    }

    /// Time left before the deadline, or `None` when unbounded.
    fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::At(at) => {
                let now = Instant::now();
                Some(if now >= *at {
                    Duration::ZERO
                } else {
                    at.duration_since(now)
                })
            }
        }
    }
}

/// Releases `guard`, blocks on `cond` and re-acquires the lock.
///
/// Returns after one wakeup, which may be spurious; callers loop and re-check
/// their condition before calling again. Cancellation and the deadline are
/// checked before blocking, so a caller whose condition became true is never
/// failed by a late interrupt.
///
/// On failure the guard is handed back so the caller can undo its bookkeeping
/// before the lock is released.
pub(crate) fn wait<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    cancel: &CancelToken,
    deadline: &Deadline,
) -> Result<MutexGuard<'a, T>, (MutexGuard<'a, T>, WaitError)> {
    if cancel.take() {
        return Err((guard, WaitError::Interrupted));
    }

    match deadline.remaining() {
        None => Ok(cond.wait(guard).unwrap_or_else(PoisonError::into_inner)),
        Some(remaining) if remaining.is_zero() => Err((guard, WaitError::TimedOut)),
        Some(remaining) => {
            let (guard, _) = cond
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            Ok(guard)
        }
    }
}
