// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of named shared memory, the named mutex and the
// named counting semaphore.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, trace, warn};

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::shm_name;

/// Adaptive backoff: spin, then pause hint, then yield, then sleep 1ms.
#[inline]
pub(crate) fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(std::time::Duration::from_millis(1));
        return;
    }
    *k += 1;
}

fn c_name(os_name: &str) -> io::Result<CString> {
    CString::new(os_name.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Absolute `CLOCK_REALTIME` deadline `timeout_ms` from now.
#[cfg(not(target_os = "macos"))]
fn realtime_deadline(timeout_ms: u64) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    let ns_total = ts.tv_nsec as u64 + (timeout_ms % 1000) * 1_000_000;
    ts.tv_sec += (timeout_ms / 1000) as libc::time_t + (ns_total / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;
    ts
}

// ---------------------------------------------------------------------------
// Process-local shm cache for mutex storage.
// Every handle in one process that opens the same named mutex must use the
// same mapping: macOS pthreads keep internal pointers relative to the
// address used for pthread_mutex_init, so a second mapping of the same page
// at a different address makes pthread_mutex_lock fail with EINVAL.
// ---------------------------------------------------------------------------

pub(crate) struct CachedShm {
    pub(crate) shm: PlatformShm,
    local_ref: AtomicUsize,
}

#[derive(Default)]
pub(crate) struct ShmCache {
    map: HashMap<String, Arc<CachedShm>>,
}

fn mutex_cache() -> &'static Mutex<ShmCache> {
    static CACHE: OnceLock<Mutex<ShmCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(ShmCache::default()))
}

/// Acquire or reuse a cached segment.
///
/// On the first local open of a segment this process created, `init_fn`
/// runs while the cache lock is held, so no other thread can observe the
/// segment before initialisation completes.
fn cached_shm_acquire<F>(
    cache: &Mutex<ShmCache>,
    name: &str,
    size: usize,
    config: &IpcConfig,
    init_fn: F,
) -> IpcResult<Arc<CachedShm>>
where
    F: FnOnce(*mut u8) -> io::Result<()>,
{
    let mut c = cache.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = c.map.get(name) {
        entry.local_ref.fetch_add(1, Ordering::Relaxed);
        return Ok(Arc::clone(entry));
    }
    let shm = PlatformShm::acquire(name, size, ShmMode::CreateOrOpen, config)?;
    if shm.prev_ref_count() == 0 {
        init_fn(shm.as_mut_ptr()).map_err(|e| IpcError::handle(name, e))?;
    }
    let entry = Arc::new(CachedShm {
        shm,
        local_ref: AtomicUsize::new(1),
    });
    c.map.insert(name.to_string(), Arc::clone(&entry));
    Ok(entry)
}

/// Release one local reference. The last one removes the cache entry.
fn cached_shm_release(cache: &Mutex<ShmCache>, name: &str) {
    let mut c = cache.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = c.map.get(name) {
        let prev = entry.local_ref.fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            c.map.remove(name);
        }
    }
}

/// Forget a cache entry whose storage is being removed.
fn cached_shm_purge(cache: &Mutex<ShmCache>, name: &str) {
    let mut c = cache.lock().unwrap_or_else(PoisonError::into_inner);
    c.map.remove(name);
}

// ---------------------------------------------------------------------------
// Robust mutex symbols, not exposed by `libc` on every platform.
// macOS has no robust mutexes.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
    fn pthread_mutex_timedlock(
        mutex: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// Layout: user bytes, padded to the counter alignment, then a trailing
// atomic<i32> counting the handles that map the segment.
// ---------------------------------------------------------------------------

const ALIGN: usize = std::mem::align_of::<AtomicI32>();

pub(crate) fn calc_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

/// Trailing reference counter of a mapping of `total_size` bytes at `mem`.
///
/// # Safety
/// `mem` must point to a live mapping of at least `total_size` bytes.
unsafe fn acc_of<'a>(mem: *mut u8, total_size: usize) -> &'a AtomicI32 {
    let offset = total_size - std::mem::size_of::<AtomicI32>();
    &*(mem.add(offset) as *const AtomicI32)
}

// ---------------------------------------------------------------------------
// PlatformShm
// ---------------------------------------------------------------------------

/// How a segment is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    /// Exclusive create; fails if the name exists.
    Create,
    /// Attach; fails if the name does not exist.
    Open,
    /// Create if missing, otherwise attach.
    CreateOrOpen,
}

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,      // total mapped size (including ref counter)
    user_size: usize, // user-requested size
    name: String,     // user-facing name
    os_name: String,  // POSIX name (with leading '/')
    prev_ref: i32,    // ref count before our increment (0 means we were first)
    created: bool,    // this handle created (and sized) the object
}

// Safety: the mapping is process-shared by design; access discipline is
// enforced by the owning typed wrapper.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Map the named segment of `user_size` usable bytes.
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

        let os_name = shm_name::os_name(name);
        let cname = c_name(&os_name).map_err(|e| IpcError::handle(name, e))?;
        let perms: libc::mode_t = 0o666;
        let total_size = calc_size(user_size);

        let open = |oflag: libc::c_int| {
            let fd = unsafe { libc::shm_open(cname.as_ptr(), oflag, perms as libc::c_uint) };
            if fd == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(fd)
            }
        };

        // CreateOrOpen tries an exclusive create first so only the owner of
        // a new object ever calls ftruncate; on macOS truncating an
        // already-sized object can zero it before failing with EINVAL.
        let (fd, created) = match mode {
            ShmMode::Create => (
                open(libc::O_RDWR | libc::O_CREAT | libc::O_EXCL)
                    .map_err(|e| IpcError::handle(name, e))?,
                true,
            ),
            ShmMode::Open => (open(libc::O_RDWR).map_err(|e| IpcError::handle(name, e))?, false),
            ShmMode::CreateOrOpen => match open(libc::O_RDWR | libc::O_CREAT | libc::O_EXCL) {
                Ok(fd) => (fd, true),
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                    (open(libc::O_RDWR).map_err(|e| IpcError::handle(name, e))?, false)
                }
                Err(e) => return Err(IpcError::handle(name, e)),
            },
        };

        unsafe { libc::fchmod(fd, perms) };

        let map_size = if created {
            if unsafe { libc::ftruncate(fd, total_size as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(cname.as_ptr());
                }
                return Err(IpcError::handle(name, err));
            }
            // The kernel may round the object up (macOS rounds to pages);
            // every handle places the counter relative to the real size.
            existing_size(fd, total_size, false).unwrap_or(total_size)
        } else {
            match existing_size(fd, total_size, config.debug_checks) {
                Ok(size) => size,
                Err(e) => {
                    unsafe { libc::close(fd) };
                    return Err(IpcError::mapping(name, e));
                }
            }
        };

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            if created {
                unsafe { libc::shm_unlink(cname.as_ptr()) };
            }
            return Err(IpcError::mapping(name, err));
        }

        let prev = unsafe { acc_of(mem as *mut u8, map_size).fetch_add(1, Ordering::AcqRel) };
        debug!(name, os_name = %os_name, size = map_size, created, refs = prev + 1, "mapped shared memory");

        Ok(Self {
            mem: mem as *mut u8,
            size: map_size,
            user_size,
            name: name.to_string(),
            os_name,
            prev_ref: prev,
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
        &self.os_name
    }

    pub fn created(&self) -> bool {
        self.created
    }

    pub fn prev_ref_count(&self) -> i32 {
        self.prev_ref
    }

    pub fn ref_count(&self) -> i32 {
        unsafe { acc_of(self.mem, self.size).load(Ordering::Acquire) }
    }

    /// Remove the backing object name. Existing mappings stay valid.
    pub fn unlink(&self) {
        if let Ok(cname) = c_name(&self.os_name) {
            unsafe { libc::shm_unlink(cname.as_ptr()) };
        }
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(cname) = c_name(&shm_name::os_name(name)) {
            unsafe { libc::shm_unlink(cname.as_ptr()) };
        }
    }
}

/// Size the kernel reports for an object truncated to `len` bytes.
fn object_size(len: usize) -> usize {
    if cfg!(target_os = "macos") {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(1) as usize;
        len.div_ceil(page) * page
    } else {
        len
    }
}

/// Polls of an unsized object before giving up (about 70ms in total).
const ZERO_SIZE_ATTEMPTS: u32 = 100;

/// Size of an existing object, waiting briefly for a concurrent creator
/// that has not yet called ftruncate.
///
/// A zero-length object after [`ZERO_SIZE_ATTEMPTS`] polls is reported as
/// an error: its creator died or failed before sizing it.
fn existing_size(fd: libc::c_int, required: usize, exact: bool) -> io::Result<usize> {
    let mut k = 0u32;
    let mut attempts = 0u32;
    loop {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let actual = st.st_size as usize;
        if actual == 0 && attempts < ZERO_SIZE_ATTEMPTS {
            attempts += 1;
            adaptive_yield(&mut k);
            continue;
        }
        if actual < required || (exact && actual != object_size(required)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("existing region is {actual} bytes, layout requires {required}"),
            ));
        }
        return Ok(actual);
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        let prev = unsafe { acc_of(self.mem, self.size).fetch_sub(1, Ordering::AcqRel) };
        if unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) } != 0 {
            warn!(name = %self.name, err = %io::Error::last_os_error(), "munmap failed");
        }
        if prev <= 1 {
            self.unlink();
            debug!(name = %self.name, "last handle dropped, unlinked shared memory");
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformMutex: robust process-shared pthread_mutex_t in its own segment
// ---------------------------------------------------------------------------

pub struct PlatformMutex {
    cached: Arc<CachedShm>,
    name: String,
}

impl PlatformMutex {
    pub fn open(name: &str, config: &IpcConfig) -> IpcResult<Self> {
        let shm_size = std::mem::size_of::<libc::pthread_mutex_t>();
        let cached = cached_shm_acquire(mutex_cache(), name, shm_size, config, |base| {
            let mtx_ptr = base as *mut libc::pthread_mutex_t;
            unsafe {
                ptr::write_bytes(mtx_ptr, 0, 1);

                let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
                let mut eno = libc::pthread_mutexattr_init(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }

                eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                if eno != 0 {
                    libc::pthread_mutexattr_destroy(&mut attr);
                    return Err(io::Error::from_raw_os_error(eno));
                }

                #[cfg(not(target_os = "macos"))]
                {
                    eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
                    if eno != 0 {
                        libc::pthread_mutexattr_destroy(&mut attr);
                        return Err(io::Error::from_raw_os_error(eno));
                    }
                }

                eno = libc::pthread_mutex_init(mtx_ptr, &attr);
                libc::pthread_mutexattr_destroy(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
            }
            Ok(())
        })?;

        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.cached.shm.as_mut_ptr() as *mut libc::pthread_mutex_t
    }

    /// Previous owner died holding the lock: mark it consistent and keep it.
    #[cfg(not(target_os = "macos"))]
    fn recover(&self) -> io::Result<()> {
        warn!(name = %self.name, "previous mutex owner died, recovering");
        let eno = unsafe { pthread_mutex_consistent(self.mtx_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    pub fn lock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_lock(self.mtx_ptr()) };
        match eno {
            0 => Ok(()),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => self.recover(),
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    /// `Ok(true)` if acquired within `timeout_ms`, `Ok(false)` on timeout.
    pub fn lock_timeout(&self, timeout_ms: u64) -> io::Result<bool> {
        #[cfg(target_os = "macos")]
        {
            // No pthread_mutex_timedlock: poll try_lock.
            let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
            let mut k = 0u32;
            loop {
                if self.try_lock()? {
                    return Ok(true);
                }
                if std::time::Instant::now() >= deadline {
                    return Ok(false);
                }
                adaptive_yield(&mut k);
            }
        }
        #[cfg(not(target_os = "macos"))]
        {
            let ts = realtime_deadline(timeout_ms);
            loop {
                let eno = unsafe { pthread_mutex_timedlock(self.mtx_ptr(), &ts) };
                match eno {
                    0 => return Ok(true),
                    libc::ETIMEDOUT => return Ok(false),
                    EOWNERDEAD => return self.recover().map(|()| true),
                    libc::EINTR => continue,
                    _ => return Err(io::Error::from_raw_os_error(eno)),
                }
            }
        }
    }

    pub fn try_lock(&self) -> io::Result<bool> {
        let eno = unsafe { libc::pthread_mutex_trylock(self.mtx_ptr()) };
        match eno {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => self.recover().map(|()| true),
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_unlock(self.mtx_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    pub fn clear_storage(name: &str) {
        cached_shm_purge(mutex_cache(), name);
        PlatformShm::unlink_by_name(name);
    }
}

impl Drop for PlatformMutex {
    fn drop(&mut self) {
        // No pthread_mutex_destroy: after munmap the address may be reused by
        // another segment and destroy would clobber whatever lives there.
        // Unmapping the last handle reclaims the storage.
        cached_shm_release(mutex_cache(), &self.name);
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: POSIX named semaphore (sem_open)
// ---------------------------------------------------------------------------

pub struct PlatformSemaphore {
    sem: *mut libc::sem_t,
    os_name: String,
}

// Safety: sem_t operations are thread-safe; the handle is only closed on drop.
unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    /// Create with `initial` permits, or open the existing semaphore
    /// (whose count is left untouched). POSIX semaphores have no per-object
    /// maximum, so `_max` is not enforced by the kernel here.
    pub fn open(name: &str, initial: u32, _max: u32) -> io::Result<Self> {
        Self::open_raw(name, libc::O_CREAT, initial)
    }

    /// Open a semaphore that must already exist.
    pub fn open_existing(name: &str) -> io::Result<Self> {
        Self::open_raw(name, 0, 0)
    }

    fn open_raw(name: &str, oflag: libc::c_int, initial: u32) -> io::Result<Self> {
        let os_name = shm_name::os_name(name);
        let cname = c_name(&os_name)?;
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                oflag,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem, os_name })
    }

    /// `Ok(true)` once a permit was taken, `Ok(false)` on timeout.
    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        match timeout_ms {
            None => loop {
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(err);
                }
            },
            Some(ms) => self.timed_wait(ms),
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn timed_wait(&self, timeout_ms: u64) -> io::Result<bool> {
        let ts = realtime_deadline(timeout_ms);
        loop {
            if unsafe { libc::sem_timedwait(self.sem, &ts) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    #[cfg(target_os = "macos")]
    fn timed_wait(&self, timeout_ms: u64) -> io::Result<bool> {
        // No sem_timedwait: poll sem_trywait.
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        let mut k = 0u32;
        loop {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => {}
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            adaptive_yield(&mut k);
        }
    }

    pub fn post(&self, count: u32) -> io::Result<()> {
        for _ in 0..count {
            if unsafe { libc::sem_post(self.sem) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn value(&self) -> io::Result<u32> {
        let mut v: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem, &mut v) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(v.max(0) as u32)
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(cname) = c_name(&shm_name::os_name(name)) {
            unsafe { libc::sem_unlink(cname.as_ptr()) };
        }
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        if unsafe { libc::sem_close(self.sem) } != 0 {
            warn!(os_name = %self.os_name, err = %io::Error::last_os_error(), "sem_close failed");
        } else {
            trace!(os_name = %self.os_name, "closed semaphore");
        }
    }
}
