// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process mutex.
// Delegates to platform::PlatformMutex (POSIX or Windows).

use tracing::{debug, trace};

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::platform::PlatformMutex;

/// A named, inter-process mutex.
///
/// On POSIX this is a `pthread_mutex_t` stored in its own shared memory
/// segment with `PTHREAD_PROCESS_SHARED` and `PTHREAD_MUTEX_ROBUST`
/// attributes; a lock left behind by a dead owner is recovered on the next
/// acquisition. On Windows it is a kernel named mutex.
///
/// The lock is not reentrant. Locking it again from the thread that
/// already holds it deadlocks.
pub struct IpcMutex {
    inner: PlatformMutex,
    name: String,
}

impl IpcMutex {
    /// Open (or create) a named inter-process mutex.
    pub fn open(name: &str) -> IpcResult<Self> {
        Self::open_with(name, &IpcConfig::default())
    }

    pub fn open_with(name: &str, config: &IpcConfig) -> IpcResult<Self> {
        let inner = PlatformMutex::open(name, config)?;
        debug!(name, "opened named mutex");
        Ok(Self {
            inner,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock the mutex, blocking without timeout.
    pub fn lock(&self) -> IpcResult<()> {
        trace!(name = %self.name, "lock");
        self.inner.lock().map_err(|e| IpcError::sync(&self.name, e))
    }

    /// `Ok(true)` if the lock was acquired within `timeout_ms` milliseconds.
    pub fn lock_timeout(&self, timeout_ms: u64) -> IpcResult<bool> {
        self.inner
            .lock_timeout(timeout_ms)
            .map_err(|e| IpcError::sync(&self.name, e))
    }

    /// `Ok(true)` if acquired, `Ok(false)` if contended.
    pub fn try_lock(&self) -> IpcResult<bool> {
        self.inner.try_lock().map_err(|e| IpcError::sync(&self.name, e))
    }

    pub fn unlock(&self) -> IpcResult<()> {
        trace!(name = %self.name, "unlock");
        self.inner.unlock().map_err(|e| IpcError::sync(&self.name, e))
    }

    /// Remove the backing storage for a named mutex.
    pub fn clear_storage(name: &str) {
        PlatformMutex::clear_storage(name);
    }
}
