// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A shared value whose every access is serialized by a named mutex.

use crate::cell::{CellOptions, ShmValue, TypedCell};
use crate::error::{IpcError, IpcResult};
use crate::scoped_access::{ExclusiveMut, ExclusiveRef, ScopedLock};
use crate::shm::Permission;
use crate::IpcMutex;

/// A [`TypedCell`] paired with a named inter-process mutex.
///
/// Every read and write, in every process, goes through the mutex named
/// `lock_name`, so read-modify-write sequences run in
/// [`mutex_apply`](Self::mutex_apply) never lose updates. The lock name must
/// be distinct from the region name and agreed on by all participants.
///
/// The mutex is not reentrant. While a guard from [`lock`](Self::lock) or
/// [`lock_mut`](Self::lock_mut) is alive, or inside a
/// [`mutex_apply`](Self::mutex_apply) / [`mutex_inspect`](Self::mutex_inspect)
/// closure, the same thread must not call any locking method on this cell
/// (or on another cell sharing its `lock_name`). On POSIX the nested call
/// deadlocks. Windows mutexes are recursive, so there it succeeds and
/// produces aliasing borrows of the value.
///
/// ```no_run
/// use typed_ipc::{ExclusiveTypedCell, Permission};
///
/// let counter = ExclusiveTypedCell::<u64>::open("hits", "hits_lock", Permission::CreateReadWrite)?;
/// counter.mutex_apply(|n| *n += 1)?;
/// println!("{}", counter.read()?);
/// # Ok::<(), typed_ipc::IpcError>(())
/// ```
pub struct ExclusiveTypedCell<T: ShmValue> {
    cell: TypedCell<T>,
    lock: IpcMutex,
}

// The shared value is only dereferenced while `lock` is held.
unsafe impl<T: ShmValue> Sync for ExclusiveTypedCell<T> {}

impl<T: ShmValue> ExclusiveTypedCell<T> {
    pub fn open(name: &str, lock_name: &str, permission: Permission) -> IpcResult<Self> {
        Self::open_with(name, lock_name, permission, CellOptions::default())
    }

    /// The initial value, if any, is written while the mutex is held, so no
    /// locked reader observes the region half-initialised.
    pub fn open_with(
        name: &str,
        lock_name: &str,
        permission: Permission,
        options: CellOptions<T>,
    ) -> IpcResult<Self> {
        let lock = IpcMutex::open_with(lock_name, options.ipc_config())?;
        let cell = {
            let _guard = ScopedLock::new(&lock)?;
            TypedCell::open_with(name, permission, options)?
        };
        Ok(Self { cell, lock })
    }

    fn check_writable(&self) -> IpcResult<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(IpcError::not_writable(self.name()))
        }
    }

    /// Copy of the value, taken under the lock.
    pub fn read(&self) -> IpcResult<T> {
        let _guard = ScopedLock::new(&self.lock)?;
        Ok(self.cell.read())
    }

    /// Overwrite the value under the lock. A read-only handle fails with
    /// [`IpcError::NotWritable`] without touching the lock.
    pub fn write(&self, value: T) -> IpcResult<()> {
        *self.lock_mut()? = value;
        Ok(())
    }

    /// Run `f` on the live value with the lock held for the whole call.
    ///
    /// `f` must not call back into this cell's locking methods. The mutex
    /// is not reentrant; see the type-level docs.
    pub fn mutex_apply<R>(&self, f: impl FnOnce(&mut T) -> R) -> IpcResult<R> {
        let mut guard = self.lock_mut()?;
        Ok(f(&mut guard))
    }

    /// Read-only counterpart of [`mutex_apply`](Self::mutex_apply), with
    /// the same restriction on `f`.
    pub fn mutex_inspect<R>(&self, f: impl FnOnce(&T) -> R) -> IpcResult<R> {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    /// Lock and borrow the live value. Dropping the guard unlocks.
    ///
    /// Do not call another locking method on this cell from the same thread
    /// while the guard is alive: the mutex is not reentrant.
    pub fn lock(&self) -> IpcResult<ExclusiveRef<'_, T>> {
        let guard = ScopedLock::new(&self.lock)?;
        Ok(ExclusiveRef::new(guard, unsafe { &*self.cell.as_ptr() }))
    }

    /// Lock and mutably borrow the live value. Dropping the guard unlocks.
    ///
    /// Same reentrancy restriction as [`lock`](Self::lock).
    pub fn lock_mut(&self) -> IpcResult<ExclusiveMut<'_, T>> {
        self.check_writable()?;
        let guard = ScopedLock::new(&self.lock)?;
        // Exclusive: the mutex is held for as long as the borrow lives.
        let value = unsafe { &mut *self.cell.as_ptr() };
        Ok(ExclusiveMut::new(guard, value))
    }

    pub fn name(&self) -> &str {
        self.cell.name()
    }

    pub fn lock_name(&self) -> &str {
        self.lock.name()
    }

    pub fn permission(&self) -> Permission {
        self.cell.permission()
    }

    pub fn is_writable(&self) -> bool {
        self.cell.is_writable()
    }

    pub fn is_creator(&self) -> bool {
        self.cell.is_creator()
    }

    /// Remove both the region and the mutex storage.
    pub fn clear_storage(name: &str, lock_name: &str) {
        TypedCell::<T>::clear_storage(name);
        IpcMutex::clear_storage(lock_name);
    }
}
