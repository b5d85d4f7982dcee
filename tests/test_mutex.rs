// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named inter-process mutex and its scoped guard.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use typed_ipc::{with_lock, IpcMutex, ScopedLock};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_mtx_{n}")
}

#[test]
fn open_and_name() {
    let name = unique_name("open");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    assert_eq!(mtx.name(), name);
}

#[test]
fn clear_storage_then_reopen() {
    let name = unique_name("clear_storage");
    IpcMutex::clear_storage(&name);

    {
        let _mtx = IpcMutex::open(&name).expect("open");
    }
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("reopen after clear");
    mtx.lock().expect("lock");
    mtx.unlock().expect("unlock");
}

#[test]
fn lock_unlock_cycles() {
    let name = unique_name("cycles");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    for i in 0..100 {
        mtx.lock().unwrap_or_else(|e| panic!("lock failed on iteration {i}: {e}"));
        mtx.unlock().unwrap_or_else(|e| panic!("unlock failed on iteration {i}: {e}"));
    }
}

#[test]
fn try_lock_uncontended() {
    let name = unique_name("try_lock");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    assert!(mtx.try_lock().expect("try_lock"));
    mtx.unlock().expect("unlock");
}

#[test]
fn try_lock_contended() {
    let name = unique_name("try_contended");
    IpcMutex::clear_storage(&name);

    let mtx_main = IpcMutex::open(&name).expect("open main");
    mtx_main.lock().expect("lock main");

    let name_t = name.clone();
    let acquired = thread::spawn(move || {
        let mtx = IpcMutex::open(&name_t).expect("open thread");
        let got = mtx.try_lock().expect("try_lock");
        if got {
            mtx.unlock().expect("unlock");
        }
        got
    })
    .join()
    .unwrap();

    mtx_main.unlock().expect("unlock main");
    assert!(!acquired, "try_lock should fail while another handle holds the lock");
}

#[test]
fn lock_timeout_expires_while_held() {
    let name = unique_name("lock_timeout");
    IpcMutex::clear_storage(&name);

    let mtx_main = IpcMutex::open(&name).expect("open main");
    mtx_main.lock().expect("lock main");

    let name_t = name.clone();
    let acquired = thread::spawn(move || {
        let mtx = IpcMutex::open(&name_t).expect("open thread");
        mtx.lock_timeout(50).expect("lock_timeout")
    })
    .join()
    .unwrap();
    assert!(!acquired);

    mtx_main.unlock().expect("unlock main");
    assert!(mtx_main.lock_timeout(50).expect("lock_timeout after release"));
    mtx_main.unlock().expect("unlock");
}

#[test]
fn critical_section() {
    let name = unique_name("critical_section");
    IpcMutex::clear_storage(&name);

    let counter = Arc::new(AtomicI32::new(0));
    let iterations = 100;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let name = name.clone();
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let mtx = IpcMutex::open(&name).expect("open");
                for _ in 0..iterations {
                    mtx.lock().expect("lock");
                    counter.fetch_add(1, Ordering::Relaxed);
                    mtx.unlock().expect("unlock");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), iterations * 2);
}

#[test]
fn lock_contention_excludes() {
    let name = unique_name("contention");
    IpcMutex::clear_storage(&name);

    let inside = Arc::new(AtomicI32::new(0));
    let violation = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let name = name.clone();
            let inside = Arc::clone(&inside);
            let violation = Arc::clone(&violation);
            thread::spawn(move || {
                let mtx = IpcMutex::open(&name).expect("open");
                for _ in 0..50 {
                    let _guard = ScopedLock::new(&mtx).expect("lock");
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        violation.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_micros(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(!violation.load(Ordering::SeqCst), "two threads in the critical section at once");
}

#[test]
fn scoped_lock_releases_on_drop() {
    let name = unique_name("scoped_drop");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    {
        let guard = ScopedLock::new(&mtx).expect("scoped lock");
        assert_eq!(guard.mutex().name(), name);
    }
    assert!(mtx.try_lock().expect("try_lock"), "guard should have unlocked");
    mtx.unlock().expect("unlock");
}

#[test]
fn scoped_lock_releases_on_panic() {
    let name = unique_name("scoped_panic");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");

    let name_t = name.clone();
    let result = thread::spawn(move || {
        let mtx = IpcMutex::open(&name_t).expect("open thread");
        let _guard = ScopedLock::new(&mtx).expect("lock");
        panic!("inside critical section");
    })
    .join();
    assert!(result.is_err());

    assert!(mtx.lock_timeout(1000).expect("lock_timeout"), "lock leaked by a panicking holder");
    mtx.unlock().expect("unlock");
}

#[test]
fn with_lock_returns_closure_value() {
    let name = unique_name("with_lock");
    IpcMutex::clear_storage(&name);

    let mtx = IpcMutex::open(&name).expect("open");
    let value = with_lock(&mtx, || 6 * 7).expect("with_lock");
    assert_eq!(value, 42);
    assert!(mtx.try_lock().expect("try_lock"));
    mtx.unlock().expect("unlock");
}

#[test]
fn protects_non_atomic_data() {
    let name = unique_name("non_atomic");
    IpcMutex::clear_storage(&name);

    let counter = Arc::new(std::sync::Mutex::new(0i32));
    let iterations = 500;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let name = name.clone();
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let mtx = IpcMutex::open(&name).expect("open");
                for _ in 0..iterations {
                    with_lock(&mtx, || {
                        let mut c = counter.lock().unwrap();
                        *c += 1;
                    })
                    .expect("with_lock");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*counter.lock().unwrap(), iterations * 4);
}

#[test]
fn empty_name_fails() {
    assert!(IpcMutex::open("").is_err());
}

#[cfg(unix)]
#[test]
fn open_over_unsized_object_fails_and_cache_stays_usable() {
    let name = unique_name("unsized");
    IpcMutex::clear_storage(&name);
    let os_name = std::ffi::CString::new(typed_ipc::shm_name::os_name(&name)).unwrap();
    let fd = unsafe { libc::shm_open(os_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600) };
    assert!(fd >= 0);
    unsafe { libc::close(fd) };

    let (tx, rx) = std::sync::mpsc::channel();
    let name_t = name.clone();
    thread::spawn(move || {
        let _ = tx.send(IpcMutex::open(&name_t).is_err());
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));

    let other = unique_name("after_unsized");
    IpcMutex::clear_storage(&other);
    let mtx = IpcMutex::open(&other).expect("later opens are not blocked");
    mtx.lock().expect("lock");
    mtx.unlock().expect("unlock");
    IpcMutex::clear_storage(&name);
}
