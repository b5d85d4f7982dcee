// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guards: a named mutex is locked for the lifetime of the guard and
// released on every exit path, including early returns, `?` and unwinding.

use std::ops::{Deref, DerefMut};

use tracing::warn;

use crate::error::IpcResult;
use crate::IpcMutex;

/// Locks `mtx` on construction, unlocks on drop.
pub struct ScopedLock<'a> {
    mtx: &'a IpcMutex,
}

impl<'a> ScopedLock<'a> {
    /// Create a new scoped lock. Blocks until `mtx` is acquired.
    pub fn new(mtx: &'a IpcMutex) -> IpcResult<Self> {
        mtx.lock()?;
        Ok(Self { mtx })
    }

    pub fn mutex(&self) -> &IpcMutex {
        self.mtx
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mtx.unlock() {
            warn!(name = %self.mtx.name(), error = %e, "failed to release scoped lock");
        }
    }
}

/// Run `f` while holding `mtx`.
pub fn with_lock<R>(mtx: &IpcMutex, f: impl FnOnce() -> R) -> IpcResult<R> {
    let _guard = ScopedLock::new(mtx)?;
    Ok(f())
}

/// Shared view of a locked shared value. The lock is held until drop.
pub struct ExclusiveRef<'a, T> {
    value: &'a T,
    _lock: ScopedLock<'a>,
}

impl<'a, T> ExclusiveRef<'a, T> {
    pub(crate) fn new(lock: ScopedLock<'a>, value: &'a T) -> Self {
        Self { value, _lock: lock }
    }
}

impl<T> Deref for ExclusiveRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

/// Mutable view of a locked shared value. The lock is held until drop.
pub struct ExclusiveMut<'a, T> {
    value: &'a mut T,
    _lock: ScopedLock<'a>,
}

impl<'a, T> ExclusiveMut<'a, T> {
    pub(crate) fn new(lock: ScopedLock<'a>, value: &'a mut T) -> Self {
        Self { value, _lock: lock }
    }
}

impl<T> Deref for ExclusiveMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> DerefMut for ExclusiveMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}
