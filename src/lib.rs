// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed inter-process shared memory: named regions holding one fixed-layout
// value, the same guarded by a named mutex, and bounded SPSC ring buffers
// synchronized by named counting semaphores.

pub mod shm_name;

mod platform;

mod error;
pub use error::{IpcError, IpcResult};

mod config;
pub use config::{IpcConfig, NameEncoding, ENV_DEBUG_CHECKS, ENV_NAME_ENCODING};

mod shm;
pub use shm::{NamedRegion, Permission};

mod mutex;
pub use mutex::IpcMutex;

mod semaphore;
pub use semaphore::IpcSemaphore;

mod scoped_access;
pub use scoped_access::{with_lock, ExclusiveMut, ExclusiveRef, ScopedLock};

mod cell;
pub use cell::{CellOptions, ShmValue, TypedCell};

mod exclusive;
pub use exclusive::ExclusiveTypedCell;

mod ring;
pub use ring::{RingRole, SharedRingBuffer};

/// Install a global `tracing` subscriber filtered by `RUST_LOG`.
///
/// Intended for binaries and ad-hoc debugging; libraries embedding this
/// crate install their own subscriber instead. Calling it twice is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
