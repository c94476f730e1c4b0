//! Single-holder admission gate.
//!
//! A [`Gate`] admits one actor at a time into a critical section, like a binary
//! semaphore, but its blocking acquire can be interrupted through a
//! [`CancelToken`] or bounded by a deadline. Release happens when the
//! [`GateGuard`] is dropped, so every exit path gives the gate back.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::{CancelToken, Deadline, Notify, WaitError, wait};

pub(crate) struct Gate {
    held: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    pub(crate) const fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    /// Takes the gate if it is free, without blocking.
    pub(crate) fn try_acquire(&self) -> Option<GateGuard<'_>> {
        let mut held = self.lock();
        if *held {
            return None;
        }
        *held = true;
        Some(GateGuard { gate: self })
    }

    /// Blocks until the gate is free, then takes it.
    ///
    /// The caller must have registered a target with `cancel` that wakes this
    /// gate, otherwise a cancellation is only noticed on the next release.
    pub(crate) fn acquire(
        &self,
        cancel: &CancelToken,
        deadline: &Deadline,
    ) -> Result<GateGuard<'_>, WaitError> {
        let mut held = self.lock();
        while *held {
            held = wait(&self.released, held, cancel, deadline).map_err(|(_, err)| err)?;
        }
        *held = true;
        Ok(GateGuard { gate: self })
    }

    #[cfg(test)]
    fn is_held(&self) -> bool {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Notify for Gate {
    fn notify_all(&self) {
        let _held = self.lock();
        self.released.notify_all();
    }
}

/// Proof of holding a [`Gate`]; releases it on drop.
pub(crate) struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.gate.lock();
        *held = false;
        drop(held);
        self.gate.released.notify_one();
    }
}
