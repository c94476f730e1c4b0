//! Named pipe devices.
//!
//! A [`Registry`] maps device paths such as `/shofer` to pipes, so unrelated
//! parts of a process can rendezvous on a name the way clients open a device
//! node. Removing a device only unlinks the name: sessions already open keep
//! their pipe alive until they close.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::pipe::{OpenMode, Pipe, PipeConfig, PipeError, Session};
use crate::trace::info;

/// POSIX NAME_MAX.
const NAME_MAX: usize = 255;

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid device path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("device '{0}' already exists")]
    AlreadyExists(DevicePath),
    #[error("no such device '{0}'")]
    NoSuchDevice(DevicePath),
    #[error(transparent)]
    Pipe(#[from] PipeError),
}

/// A validated device name: leading `/`, no other `/`, at most 255 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePath(String);

impl DevicePath {
    /// Validates `path` as a device name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidPath`] describing the first rule `path` breaks.
    pub fn new(path: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &'static str| RegistryError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        let Some(name) = path.strip_prefix('/') else {
            return Err(invalid("path must start with '/'"));
        };
        if name.is_empty() {
            return Err(invalid("path must name a device after '/'"));
        }
        if name.contains('/') {
            return Err(invalid("path must not contain additional '/' characters"));
        }
        if path.len() > NAME_MAX {
            return Err(invalid("path length must be <= 255 bytes"));
        }
        Ok(Self(path.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DevicePath {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DevicePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Table of named pipe devices.
#[derive(Debug, Default)]
pub struct Registry {
    devices: Mutex<HashMap<DevicePath, Arc<Pipe>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipe and publishes it under `path`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidPath`], [`RegistryError::AlreadyExists`], or a
    /// [`PipeError`] if the pipe cannot be built from `config`.
    pub fn create_device(
        &self,
        path: &str,
        config: PipeConfig,
    ) -> Result<Arc<Pipe>, RegistryError> {
        let path = DevicePath::new(path)?;
        let mut devices = self.lock();
        if devices.contains_key(&path) {
            return Err(RegistryError::AlreadyExists(path));
        }

        let pipe = Pipe::new(config)?;
        info!(
            device = %path,
            capacity = config.capacity,
            max_sessions = config.max_sessions,
            "device created"
        );
        devices.insert(path, Arc::clone(&pipe));
        Ok(pipe)
    }

    /// Opens a session on the device at `path`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NoSuchDevice`], or the pipe's admission error.
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<Session, RegistryError> {
        let pipe = self.device(path)?;
        Ok(pipe.open(mode)?)
    }

    /// Looks up the pipe behind `path`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidPath`] or [`RegistryError::NoSuchDevice`].
    pub fn device(&self, path: &str) -> Result<Arc<Pipe>, RegistryError> {
        let path = DevicePath::new(path)?;
        let devices = self.lock();
        match devices.get(&path) {
            Some(pipe) => Ok(Arc::clone(pipe)),
            None => Err(RegistryError::NoSuchDevice(path)),
        }
    }

    /// Unlinks `path`. Open sessions keep working until they close.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidPath`] or [`RegistryError::NoSuchDevice`].
    pub fn remove_device(&self, path: &str) -> Result<Arc<Pipe>, RegistryError> {
        let path = DevicePath::new(path)?;
        let removed = self.lock().remove(&path);
        match removed {
            Some(pipe) => {
                info!(device = %path, "device removed");
                Ok(pipe)
            }
            None => Err(RegistryError::NoSuchDevice(path)),
        }
    }

    /// Paths of all registered devices, sorted.
    #[must_use]
    pub fn devices(&self) -> Vec<DevicePath> {
        let mut paths: Vec<_> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Unlinks every device and returns how many were registered.
    pub fn shutdown(&self) -> usize {
        let removed = std::mem::take(&mut *self.lock());
        info!(devices = removed.len(), "registry shut down");
        removed.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DevicePath, Arc<Pipe>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
