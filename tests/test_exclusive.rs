// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Mutex-guarded typed cells: lost-update freedom across handles, guards and
// read-only enforcement.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use typed_ipc::{CellOptions, ExclusiveTypedCell, IpcError, IpcMutex, Permission, ShmValue};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_names(prefix: &str) -> (String, String) {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    (format!("{prefix}_xcell_{n}"), format!("{prefix}_xlock_{n}"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
struct Pair {
    a: u64,
    b: u64,
}

unsafe impl ShmValue for Pair {}

#[test]
fn initial_value_and_read() {
    let (name, lock) = unique_names("initial");
    ExclusiveTypedCell::<u32>::clear_storage(&name, &lock);

    let options = CellOptions::new().initial(41u32);
    let cell = ExclusiveTypedCell::open_with(&name, &lock, Permission::CreateReadWrite, options)
        .expect("create");
    assert!(cell.is_creator());
    assert_eq!(cell.name(), name);
    assert_eq!(cell.lock_name(), lock);
    assert_eq!(cell.read().expect("read"), 41);

    cell.write(42).expect("write");
    assert_eq!(cell.mutex_inspect(|v| *v).expect("inspect"), 42);
}

#[test]
fn two_instances_lose_no_updates() {
    let (name, lock) = unique_names("counter");
    ExclusiveTypedCell::<u64>::clear_storage(&name, &lock);

    let owner = ExclusiveTypedCell::<u64>::open(&name, &lock, Permission::CreateReadWrite).expect("create");
    let iterations = 10_000u64;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let name = name.clone();
            let lock = lock.clone();
            thread::spawn(move || {
                let cell = ExclusiveTypedCell::<u64>::open(&name, &lock, Permission::OpenReadWrite)
                    .expect("attach");
                for _ in 0..iterations {
                    cell.mutex_apply(|n| *n += 1).expect("mutex_apply");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(owner.read().expect("read"), iterations * 2);
}

#[test]
fn shared_instance_across_threads() {
    let (name, lock) = unique_names("shared");
    ExclusiveTypedCell::<Pair>::clear_storage(&name, &lock);

    let cell = Arc::new(
        ExclusiveTypedCell::<Pair>::open(&name, &lock, Permission::CreateReadWrite).expect("create"),
    );
    let iterations = 2_000u64;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..iterations {
                    cell.mutex_apply(|p| {
                        p.a += 1;
                        p.b = p.a * 2;
                    })
                    .expect("mutex_apply");
                    let snapshot = cell.read().expect("read");
                    assert_eq!(snapshot.b, snapshot.a * 2, "observed a torn update");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(cell.read().expect("read").a, iterations * 4);
}

#[test]
fn guard_holds_the_lock() {
    let (name, lock) = unique_names("guard");
    ExclusiveTypedCell::<u32>::clear_storage(&name, &lock);

    let cell = ExclusiveTypedCell::<u32>::open(&name, &lock, Permission::CreateReadWrite).expect("create");
    let same_lock = IpcMutex::open(&lock).expect("open lock");

    {
        let mut guard = cell.lock_mut().expect("lock_mut");
        *guard = 9;

        let lock_t = lock.clone();
        let contended = thread::spawn(move || {
            let mtx = IpcMutex::open(&lock_t).expect("open lock");
            let got = mtx.try_lock().expect("try_lock");
            if got {
                mtx.unlock().expect("unlock");
            }
            !got
        })
        .join()
        .unwrap();
        assert!(contended, "guard should hold the mutex");
    }

    assert!(same_lock.try_lock().expect("try_lock"), "guard should release on drop");
    same_lock.unlock().expect("unlock");
    assert_eq!(*cell.lock().expect("lock"), 9);
}

#[test]
fn writer_waits_for_guard() {
    let (name, lock) = unique_names("writer_waits");
    ExclusiveTypedCell::<u32>::clear_storage(&name, &lock);

    let cell = Arc::new(
        ExclusiveTypedCell::<u32>::open(&name, &lock, Permission::CreateReadWrite).expect("create"),
    );

    let guard = cell.lock().expect("lock");
    let cell_t = Arc::clone(&cell);
    let writer = thread::spawn(move || cell_t.write(5).expect("write"));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(*guard, 0, "write must not land while the guard is held");
    drop(guard);

    writer.join().unwrap();
    assert_eq!(cell.read().expect("read"), 5);
}

#[test]
fn read_only_instance_rejects_writes() {
    let (name, lock) = unique_names("read_only");
    ExclusiveTypedCell::<u16>::clear_storage(&name, &lock);

    let options = CellOptions::new().initial(3u16);
    let _owner = ExclusiveTypedCell::open_with(&name, &lock, Permission::CreateReadWrite, options)
        .expect("create");
    let reader = ExclusiveTypedCell::<u16>::open(&name, &lock, Permission::OpenReadOnly).expect("attach");

    assert!(!reader.is_writable());
    assert!(matches!(reader.write(4), Err(IpcError::NotWritable { .. })));
    assert!(matches!(reader.mutex_apply(|v| *v += 1), Err(IpcError::NotWritable { .. })));
    assert!(matches!(reader.lock_mut(), Err(IpcError::NotWritable { .. })));
    assert_eq!(reader.read().expect("read"), 3);

    // A rejected write must not leave the mutex held.
    assert_eq!(*reader.lock().expect("lock"), 3);
}

#[test]
fn panic_in_closure_releases_lock() {
    let (name, lock) = unique_names("panic");
    ExclusiveTypedCell::<u32>::clear_storage(&name, &lock);

    let cell = Arc::new(
        ExclusiveTypedCell::<u32>::open(&name, &lock, Permission::CreateReadWrite).expect("create"),
    );

    let cell_t = Arc::clone(&cell);
    let result = thread::spawn(move || {
        cell_t
            .mutex_apply(|v| {
                *v = 1;
                panic!("closure failed");
            })
            .ok();
    })
    .join();
    assert!(result.is_err());

    assert_eq!(cell.read().expect("read after panic"), 1);
}

#[test]
fn recreate_after_drop() {
    let (name, lock) = unique_names("recreate");
    ExclusiveTypedCell::<u64>::clear_storage(&name, &lock);

    {
        let cell = ExclusiveTypedCell::<u64>::open(&name, &lock, Permission::CreateReadWrite).expect("create");
        cell.write(123).expect("write");
    }
    let cell = ExclusiveTypedCell::<u64>::open(&name, &lock, Permission::CreateReadWrite).expect("recreate");
    assert_eq!(cell.read().expect("read"), 0);
}

// Windows mutexes are recursive, so only POSIX refuses the nested acquire.
#[cfg(unix)]
#[test]
fn lock_is_not_reentrant_inside_mutex_apply() {
    let (name, lock) = unique_names("reentrancy");
    ExclusiveTypedCell::<u32>::clear_storage(&name, &lock);

    let cell = ExclusiveTypedCell::<u32>::open(&name, &lock, Permission::CreateReadWrite).expect("create");
    let same_lock = IpcMutex::open(&lock).expect("open lock");
    let nested = cell
        .mutex_apply(|v| {
            *v = 1;
            same_lock.try_lock().expect("try_lock")
        })
        .expect("mutex_apply");
    assert!(!nested, "the cell's mutex must be held, not re-entered, inside the closure");
    assert!(same_lock.try_lock().expect("try_lock after release"));
    same_lock.unlock().expect("unlock");
    assert_eq!(cell.read().expect("read"), 1);
}

#[test]
fn accessors_usable_while_guard_is_held() {
    let (name, lock) = unique_names("accessors_guard");
    ExclusiveTypedCell::<u64>::clear_storage(&name, &lock);

    let cell = ExclusiveTypedCell::<u64>::open(&name, &lock, Permission::CreateReadWrite).expect("create");
    let mut guard = cell.lock_mut().expect("lock_mut");
    *guard = 42;
    thread::scope(|s| {
        s.spawn(|| {
            assert_eq!(cell.name(), name);
            assert_eq!(cell.lock_name(), lock);
            assert!(cell.is_writable());
            assert_eq!(cell.permission(), Permission::CreateReadWrite);
        });
    });
    drop(guard);
    assert_eq!(cell.read().expect("read"), 42);
}
