//! Cancellation tokens for interruptible waits.
//!
//! A [`CancelToken`] plays the role of a signal delivered to a blocked actor.
//! Triggering it wakes whatever the owning session is blocked on; the wait
//! that observes the cancellation consumes it and fails with
//! [`WaitError::Interrupted`](super::WaitError::Interrupted). A cancellation
//! raised while nothing is blocked stays pending and interrupts the next wait.
//!
//! # Wakeup protocol
//!
//! ```text
//! waiter                                canceller
//! ──────                                ─────────
//! register(target)      ┐               cancelled = true
//! lock(L)               │               snapshot registered targets
//! take() == false       │               target.notify_all()
//! cond.wait(L)  ◄───────┘                 └─ lock(L), cond.notify_all()
//! ```
//!
//! `notify_all` takes the same lock the waiter sleeps under, so the notification
//! cannot fall between the waiter's check and its wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Something that can wake every thread blocked inside it.
///
/// Implementations must acquire the lock each waiter sleeps under before
/// notifying, and must not be invoked while the caller holds that lock.
pub(crate) trait Notify: Send + Sync {
    fn notify_all(&self);
}

struct Targets {
    next_id: u64,
    entries: Vec<(u64, Arc<dyn Notify>)>,
}

struct Inner {
    cancelled: AtomicBool,
    targets: Mutex<Targets>,
}

/// Handle used to interrupt a session's blocking operations.
///
/// Clones share state: cancelling any clone interrupts the session the token
/// belongs to.
///
/// # Example
///
/// ```
/// use msgpipe::{OpenMode, PipeConfig, PipeError, Pipe};
///
/// let pipe = Pipe::new(PipeConfig::default()).unwrap();
/// let reader = pipe.open(OpenMode::ReadOnly).unwrap();
/// let token = reader.cancel_token();
///
/// let handle = std::thread::spawn(move || {
///     let mut buf = [0u8; 16];
///     reader.read(&mut buf)
/// });
///
/// token.cancel();
/// assert!(matches!(handle.join().unwrap(), Err(PipeError::Interrupted)));
/// ```
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Creates a token with no pending cancellation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                targets: Mutex::new(Targets {
                    next_id: 0,
                    entries: Vec::new(),
                }),
            }),
        }
    }

    /// Raises a cancellation and wakes any wait currently registered.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);

        let targets: Vec<Arc<dyn Notify>> = self
            .lock_targets()
            .entries
            .iter()
            .map(|(_, target)| Arc::clone(target))
            .collect();

        for target in targets {
            target.notify_all();
        }
    }

    /// Returns `true` if a cancellation is pending.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Discards a pending cancellation.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Consumes a pending cancellation.
    pub(crate) fn take(&self) -> bool {
        self.inner.cancelled.swap(false, Ordering::SeqCst)
    }

    /// Registers `target` to be woken by [`cancel`](Self::cancel) until the
    /// returned guard is dropped.
    ///
    /// Register before the first check of [`take`](Self::take).
    pub(crate) fn register(&self, target: Arc<dyn Notify>) -> Registration<'_> {
        let mut targets = self.lock_targets();
        let id = targets.next_id;
        targets.next_id += 1;
        targets.entries.push((id, target));
        Registration { token: self, id }
    }

    fn lock_targets(&self) -> std::sync::MutexGuard<'_, Targets> {
        self.inner
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Keeps a wake target registered with a [`CancelToken`].
pub(crate) struct Registration<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token
            .lock_targets()
            .entries
            .retain(|(id, _)| *id != self.id);
    }
}
