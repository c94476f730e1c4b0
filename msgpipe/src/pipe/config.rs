//! Pipe configuration, fixed at device creation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default queue capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 64;

/// Default cap on simultaneously open sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 5;

/// Configuration for one pipe.
///
/// Both limits are fixed for the lifetime of the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Total bytes the queue may hold; also the largest accepted message.
    pub capacity: usize,
    /// Maximum number of simultaneously open sessions.
    pub max_sessions: usize,
    /// Sleep performed under the pipe lock after every transfer.
    ///
    /// Zero in production. Tests raise it to widen race windows.
    pub copy_delay: Duration,
}

impl PipeConfig {
    /// Sets the queue capacity in bytes.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the admission cap.
    #[must_use]
    pub const fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Sets the post-transfer delay.
    #[must_use]
    pub const fn with_copy_delay(mut self, copy_delay: Duration) -> Self {
        self.copy_delay = copy_delay;
        self
    }

    /// Checks that the configuration describes a usable pipe.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first invalid field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::ZeroSessions);
        }
        Ok(())
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_sessions: DEFAULT_MAX_SESSIONS,
            copy_delay: Duration::ZERO,
        }
    }
}

/// Invalid [`PipeConfig`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("capacity must be greater than 0")]
    ZeroCapacity,
    #[error("max_sessions must be greater than 0")]
    ZeroSessions,
}
