// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named counting semaphore.
// Delegates to platform::PlatformSemaphore (POSIX `sem_open` or Win32).

use std::io;

use tracing::{debug, trace};

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::platform::PlatformSemaphore;
use crate::shm_name;

/// A named, inter-process counting semaphore.
///
/// `wait` blocks until a permit is available and takes it; `post` returns
/// permits and wakes waiters. The count lives in the kernel, so every
/// handle with the same name, in any process, sees the same permits.
pub struct IpcSemaphore {
    inner: PlatformSemaphore,
    name: String,
}

impl IpcSemaphore {
    /// Open the named semaphore, creating it with `initial` permits if it
    /// does not exist yet. An existing semaphore keeps its current count.
    pub fn open(name: &str, initial: u32) -> IpcResult<Self> {
        Self::open_with(name, initial, &IpcConfig::default())
    }

    pub fn open_with(name: &str, initial: u32, config: &IpcConfig) -> IpcResult<Self> {
        Self::open_bounded(name, initial, i32::MAX as u32, config)
    }

    /// Like [`open_with`](Self::open_with), with at most `max` permits.
    ///
    /// `initial > max` is rejected on every platform. The bound on posts is
    /// only enforced by Windows, where a post past `max` fails with
    /// [`IpcError::SyncFailed`].
    pub fn open_bounded(name: &str, initial: u32, max: u32, config: &IpcConfig) -> IpcResult<Self> {
        shm_name::validate(name, config.name_encoding).map_err(|e| IpcError::handle(name, e))?;
        if initial > max {
            return Err(IpcError::handle(
                name,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("initial count {initial} exceeds maximum {max}"),
                ),
            ));
        }
        let inner = PlatformSemaphore::open(name, initial, max).map_err(|e| IpcError::handle(name, e))?;
        debug!(name, initial, max, "opened named semaphore");
        Ok(Self {
            inner,
            name: name.to_string(),
        })
    }

    /// Open a semaphore that must already exist.
    pub fn open_existing(name: &str) -> IpcResult<Self> {
        Self::open_existing_with(name, &IpcConfig::default())
    }

    pub fn open_existing_with(name: &str, config: &IpcConfig) -> IpcResult<Self> {
        shm_name::validate(name, config.name_encoding).map_err(|e| IpcError::handle(name, e))?;
        let inner = PlatformSemaphore::open_existing(name).map_err(|e| IpcError::handle(name, e))?;
        debug!(name, "attached to named semaphore");
        Ok(Self {
            inner,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take one permit. `None` blocks indefinitely.
    /// Returns `Ok(false)` if the timeout elapsed first.
    pub fn wait(&self, timeout_ms: Option<u64>) -> IpcResult<bool> {
        trace!(name = %self.name, ?timeout_ms, "wait");
        self.inner
            .wait(timeout_ms)
            .map_err(|e| IpcError::sync(&self.name, e))
    }

    /// Return `count` permits.
    pub fn post(&self, count: u32) -> IpcResult<()> {
        trace!(name = %self.name, count, "post");
        self.inner.post(count).map_err(|e| IpcError::sync(&self.name, e))
    }

    /// Current number of permits.
    #[cfg(target_os = "linux")]
    pub fn value(&self) -> IpcResult<u32> {
        self.inner.value().map_err(|e| IpcError::sync(&self.name, e))
    }

    /// Remove a named semaphore. Open handles keep working; the next `open`
    /// creates a fresh one. No-op on Windows.
    pub fn clear_storage(name: &str) {
        PlatformSemaphore::unlink_by_name(name);
    }
}
