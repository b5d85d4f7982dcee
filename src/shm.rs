// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named, fixed-size shared memory region.
// Delegates to platform::PlatformShm (POSIX or Windows).

use std::ptr;

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::platform::{PlatformShm, ShmMode};

/// How an object is obtained and whether it may be written through this handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Exclusive create, writable. Fails if the name already exists.
    CreateReadWrite,
    /// Create if missing, otherwise attach. Read-only.
    CreateReadOnly,
    /// Attach to an existing object, writable.
    OpenReadWrite,
    /// Attach to an existing object, read-only.
    OpenReadOnly,
}

impl Permission {
    pub fn is_writable(self) -> bool {
        matches!(self, Self::CreateReadWrite | Self::OpenReadWrite)
    }

    pub fn is_create(self) -> bool {
        matches!(self, Self::CreateReadWrite | Self::CreateReadOnly)
    }

    fn shm_mode(self) -> ShmMode {
        match self {
            Self::CreateReadWrite => ShmMode::Create,
            Self::CreateReadOnly => ShmMode::CreateOrOpen,
            Self::OpenReadWrite | Self::OpenReadOnly => ShmMode::Open,
        }
    }
}

/// A named, inter-process shared memory region of fixed size.
///
/// The mapping carries a trailing reference counter shared by every handle
/// in every process; dropping the last handle removes the backing object,
/// so the name can be created afresh afterwards.
///
/// The base address is only meaningful inside this process and only while
/// the region is alive. It is never handed out as a free-standing pointer
/// by the typed wrappers.
pub struct NamedRegion {
    inner: PlatformShm,
    permission: Permission,
}

impl NamedRegion {
    /// Create or attach to the region `name` of `size` usable bytes.
    ///
    /// A freshly created region is zero-filled by the OS. An attach never
    /// revalidates the element type; it only refuses regions smaller than
    /// `size` (or of a different size when `config.debug_checks` is set).
    pub fn open(
        name: &str,
        size: usize,
        permission: Permission,
        config: &IpcConfig,
    ) -> IpcResult<Self> {
        let inner = PlatformShm::acquire(name, size, permission.shm_mode(), config)?;
        Ok(Self { inner, permission })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Name of the backing OS object.
    pub fn os_name(&self) -> &str {
        self.inner.os_name()
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn is_writable(&self) -> bool {
        self.permission.is_writable()
    }

    /// Whether this handle created the region (rather than attaching).
    pub fn is_creator(&self) -> bool {
        self.inner.created()
    }

    /// Usable size requested at construction.
    pub fn size(&self) -> usize {
        self.inner.user_size()
    }

    /// Total mapped size, including the trailing counter.
    pub fn mapped_size(&self) -> usize {
        self.inner.mapped_size()
    }

    /// Number of handles, across all processes, mapping this region.
    pub fn ref_count(&self) -> i32 {
        self.inner.ref_count()
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Usable bytes of the region.
    ///
    /// The slice is only a stable view while no other handle writes to the
    /// region. Use [`read_at`](Self::read_at) to take a copy when peers may
    /// be writing concurrently.
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.inner.as_ptr(), self.size()) }
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the region.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> IpcResult<()> {
        self.check_range(offset, buf.len())?;
        unsafe { ptr::copy_nonoverlapping(self.base().add(offset), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Copy `data` into the region starting at `offset`.
    ///
    /// Fails with [`IpcError::NotWritable`] on a read-only handle and with
    /// [`IpcError::OutOfBounds`] if the range ends past [`size`](Self::size).
    /// Nothing is written on failure.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> IpcResult<()> {
        if !self.is_writable() {
            return Err(IpcError::not_writable(self.name()));
        }
        self.check_range(offset, data.len())?;
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(offset), data.len()) };
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> IpcResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(IpcError::OutOfBounds {
                name: self.name().to_string(),
                offset,
                len,
                size: self.size(),
            }),
        }
    }

    /// Remove a named region without an open handle, e.g. storage left
    /// behind by a crashed process. No-op on Windows.
    pub fn clear_storage(name: &str) {
        PlatformShm::unlink_by_name(name);
    }
}
