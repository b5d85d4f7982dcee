// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of named shared memory, the named mutex and the
// named counting semaphore. All three are kernel objects reference-counted
// by the OS, so nothing needs unlinking.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::debug;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, FALSE, HANDLE, INVALID_HANDLE_VALUE,
    WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery,
    FILE_MAP_ALL_ACCESS, MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
    SEC_COMMIT,
};
use windows_sys::Win32::System::Threading::{
    CreateMutexW, CreateSemaphoreW, OpenSemaphoreW, ReleaseMutex, ReleaseSemaphore,
    WaitForSingleObject, INFINITE, SEMAPHORE_ALL_ACCESS,
};

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::shm_name::{self, to_wide};

const ALIGN: usize = std::mem::align_of::<AtomicI32>();

pub(crate) fn calc_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

unsafe fn acc_of<'a>(mem: *mut u8, total_size: usize) -> &'a AtomicI32 {
    let offset = total_size - std::mem::size_of::<AtomicI32>();
    &*(mem.add(offset) as *const AtomicI32)
}

// ---------------------------------------------------------------------------
// PlatformShm: pagefile-backed file mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
    CreateOrOpen,
}

pub struct PlatformShm {
    handle: HANDLE,
    mem: *mut u8,
    size: usize,
    user_size: usize,
    name: String,
    created: bool,
}

unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn acquire(
        name: &str,
        user_size: usize,
        mode: ShmMode,
        config: &IpcConfig,
    ) -> IpcResult<Self> {
        shm_name::validate(name, config.name_encoding).map_err(|e| IpcError::handle(name, e))?;
        if user_size == 0 {
            return Err(IpcError::handle(
                name,
                io::Error::new(io::ErrorKind::InvalidInput, "size is 0"),
            ));
        }

        let wide_name = to_wide(name);
        let total_size = calc_size(user_size);

        let (handle, created) = if mode == ShmMode::Open {
            let h = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
            if h.is_null() {
                return Err(IpcError::handle(name, io::Error::last_os_error()));
            }
            (h, false)
        } else {
            let h = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    ptr::null(),
                    PAGE_READWRITE | SEC_COMMIT,
                    0,
                    total_size as u32,
                    wide_name.as_ptr(),
                )
            };
            let existed = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
            if h.is_null() {
                return Err(IpcError::handle(name, io::Error::last_os_error()));
            }
            if mode == ShmMode::Create && existed {
                unsafe { CloseHandle(h) };
                return Err(IpcError::handle(
                    name,
                    io::Error::new(io::ErrorKind::AlreadyExists, "shared memory already exists"),
                ));
            }
            (h, !existed)
        };

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, total_size) };
        let mem = view.Value as *mut u8;
        if mem.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(IpcError::mapping(name, e));
        }

        if !created {
            // The view size is page-rounded, so only undersized regions are detectable.
            let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
            let ret = unsafe {
                VirtualQuery(
                    mem as *const _,
                    &mut info,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            let err = if ret == 0 {
                Some(io::Error::last_os_error())
            } else if info.RegionSize < total_size {
                Some(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "existing region is {} bytes, layout requires {total_size}",
                        info.RegionSize
                    ),
                ))
            } else {
                None
            };
            if let Some(e) = err {
                unsafe {
                    UnmapViewOfFile(view);
                    CloseHandle(handle);
                }
                return Err(IpcError::mapping(name, e));
            }
        }

        let prev = unsafe { acc_of(mem, total_size).fetch_add(1, Ordering::AcqRel) };
        debug!(name, size = total_size, created, refs = prev + 1, "mapped shared memory");

        Ok(Self {
            handle,
            mem,
            size: total_size,
            user_size,
            name: name.to_string(),
            created,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn mapped_size(&self) -> usize {
        self.size
    }

    pub fn user_size(&self) -> usize {
        self.user_size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn os_name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> bool {
        self.created
    }

    pub fn ref_count(&self) -> i32 {
        unsafe { acc_of(self.mem, self.size).load(Ordering::Acquire) }
    }

    pub fn unlink_by_name(_name: &str) {}
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        unsafe {
            acc_of(self.mem, self.size).fetch_sub(1, Ordering::AcqRel);
            UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.mem as *mut _,
            });
            CloseHandle(self.handle);
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformMutex: kernel named mutex
// ---------------------------------------------------------------------------

pub struct PlatformMutex {
    handle: HANDLE,
}

unsafe impl Send for PlatformMutex {}
unsafe impl Sync for PlatformMutex {}

impl PlatformMutex {
    pub fn open(name: &str, config: &IpcConfig) -> IpcResult<Self> {
        shm_name::validate(name, config.name_encoding).map_err(|e| IpcError::handle(name, e))?;
        let wide_name = to_wide(name);
        let h = unsafe { CreateMutexW(ptr::null(), FALSE, wide_name.as_ptr()) };
        if h.is_null() {
            return Err(IpcError::handle(name, io::Error::last_os_error()));
        }
        Ok(Self { handle: h })
    }

    fn wait(&self, ms: u32) -> io::Result<bool> {
        match unsafe { WaitForSingleObject(self.handle, ms) } {
            // An abandoned mutex is still acquired by the caller.
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn lock(&self) -> io::Result<()> {
        self.wait(INFINITE).map(|_| ())
    }

    pub fn lock_timeout(&self, timeout_ms: u64) -> io::Result<bool> {
        self.wait(timeout_ms.min(u64::from(INFINITE - 1)) as u32)
    }

    pub fn try_lock(&self) -> io::Result<bool> {
        self.wait(0)
    }

    pub fn unlock(&self) -> io::Result<()> {
        if unsafe { ReleaseMutex(self.handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn clear_storage(_name: &str) {}
}

impl Drop for PlatformMutex {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: kernel named semaphore
// ---------------------------------------------------------------------------

pub struct PlatformSemaphore {
    handle: HANDLE,
}

unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    /// Posts that would raise the count above `max` fail.
    pub fn open(name: &str, initial: u32, max: u32) -> io::Result<Self> {
        let wide_name = to_wide(name);
        let max = max.clamp(1, i32::MAX as u32) as i32;
        let h = unsafe { CreateSemaphoreW(ptr::null(), initial as i32, max, wide_name.as_ptr()) };
        if h.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle: h })
    }

    pub fn open_existing(name: &str) -> io::Result<Self> {
        let wide_name = to_wide(name);
        let h = unsafe { OpenSemaphoreW(SEMAPHORE_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
        if h.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle: h })
    }

    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        let ms = match timeout_ms {
            None => INFINITE,
            Some(ms) => ms.min(u64::from(INFINITE - 1)) as u32,
        };
        match unsafe { WaitForSingleObject(self.handle, ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn post(&self, count: u32) -> io::Result<()> {
        if count == 0 {
            return Ok(());
        }
        if unsafe { ReleaseSemaphore(self.handle, count as i32, ptr::null_mut()) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn unlink_by_name(_name: &str) {}
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.handle) };
    }
}
