// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bounded single-producer / single-consumer FIFO of fixed-layout values in
// named shared memory.
//
// Layout: `C` contiguous slots of `T`. Two named counting semaphores carry
// the occupancy: `slots_filled` (starts at 0) and `slots_free` (starts at
// `C`). Cursors are local to each handle; the producer only advances the
// write cursor and the consumer only advances the read cursor, so both
// start at slot 0 and stay in step through the semaphores.

use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ptr;

use tracing::{debug, trace};

use crate::cell::ShmValue;
use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::semaphore::IpcSemaphore;
use crate::shm::{NamedRegion, Permission};
use crate::shm_name;

/// Which end of the ring a handle drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingRole {
    /// Writes only.
    Producer,
    /// Reads only.
    Consumer,
    /// Both, e.g. a single-process pipeline stage or a test harness.
    Duplex,
}

impl RingRole {
    pub fn can_write(self) -> bool {
        matches!(self, Self::Producer | Self::Duplex)
    }

    pub fn can_read(self) -> bool {
        matches!(self, Self::Consumer | Self::Duplex)
    }
}

/// A bounded FIFO of `C` values of `T`, shared between processes.
///
/// `write` blocks while the ring is full and `read` blocks while it is
/// empty, without busy-waiting. Exactly one producer and one consumer may
/// be live on a ring at a time; a second concurrent producer or consumer
/// corrupts the FIFO order.
///
/// The process that creates the region also creates both semaphores;
/// attachers open the existing ones, so the creator must finish
/// construction before any other participant attaches. The last handle to
/// drop removes the semaphores together with the region.
pub struct SharedRingBuffer<T: ShmValue, const C: usize> {
    region: NamedRegion,
    slots_filled: IpcSemaphore,
    slots_free: IpcSemaphore,
    read_cursor: usize,
    write_cursor: usize,
    role: RingRole,
    _marker: PhantomData<T>,
}

impl<T: ShmValue, const C: usize> SharedRingBuffer<T, C> {
    const VALID_LAYOUT: () = {
        assert!(C > 0, "ring capacity must be at least one slot");
        assert!(C <= i32::MAX as usize, "ring capacity exceeds the semaphore range");
        assert!(mem::size_of::<T>() > 0, "zero-sized values cannot be shared");
    };

    /// Number of slots.
    pub const CAPACITY: usize = C;

    pub fn open(name: &str, permission: Permission, role: RingRole) -> IpcResult<Self> {
        Self::open_with(name, permission, role, &IpcConfig::default())
    }

    pub fn open_with(
        name: &str,
        permission: Permission,
        role: RingRole,
        config: &IpcConfig,
    ) -> IpcResult<Self> {
        let () = Self::VALID_LAYOUT;

        let size = mem::size_of::<T>().checked_mul(C).ok_or_else(|| {
            IpcError::handle(
                name,
                io::Error::new(io::ErrorKind::InvalidInput, "ring size overflows usize"),
            )
        })?;
        let region = NamedRegion::open(name, size, permission, config)?;

        let (filled_name, free_name) = shm_name::ring_semaphore_names(name);
        let semaphores = if region.is_creator() {
            Self::create_semaphores(&filled_name, &free_name, config)
        } else {
            IpcSemaphore::open_existing_with(&filled_name, config).and_then(|filled| {
                Ok((filled, IpcSemaphore::open_existing_with(&free_name, config)?))
            })
        };
        let (slots_filled, slots_free) = semaphores?;

        debug!(
            name,
            capacity = C,
            ?role,
            creator = region.is_creator(),
            "opened ring buffer"
        );
        Ok(Self {
            region,
            slots_filled,
            slots_free,
            read_cursor: 0,
            write_cursor: 0,
            role,
            _marker: PhantomData,
        })
    }

    fn create_semaphores(
        filled_name: &str,
        free_name: &str,
        config: &IpcConfig,
    ) -> IpcResult<(IpcSemaphore, IpcSemaphore)> {
        // Leftovers from a crashed session would carry stale counts.
        IpcSemaphore::clear_storage(filled_name);
        IpcSemaphore::clear_storage(free_name);

        let created = IpcSemaphore::open_bounded(filled_name, 0, C as u32, config).and_then(|filled| {
            Ok((filled, IpcSemaphore::open_bounded(free_name, C as u32, C as u32, config)?))
        });
        if created.is_err() {
            IpcSemaphore::clear_storage(filled_name);
            IpcSemaphore::clear_storage(free_name);
        }
        created
    }

    fn check_role(&self, allowed: bool, operation: &'static str) -> IpcResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(IpcError::WrongRole {
                name: self.name().to_string(),
                role: self.role,
                operation,
            })
        }
    }

    fn slot(&self, index: usize) -> *mut T {
        debug_assert!(index < C);
        unsafe { (self.region.base() as *mut T).add(index) }
    }

    /// Append `value`, blocking while all `C` slots are occupied.
    pub fn write(&mut self, value: T) -> IpcResult<()> {
        if !self.region.is_writable() {
            return Err(IpcError::not_writable(self.name()));
        }
        self.check_role(self.role.can_write(), "write")?;

        self.slots_free.wait(None)?;
        unsafe { ptr::write(self.slot(self.write_cursor), value) };
        trace!(name = %self.name(), slot = self.write_cursor, "ring write");
        self.write_cursor = (self.write_cursor + 1) % C;
        self.slots_filled.post(1)
    }

    /// Remove and return the oldest value, blocking while the ring is empty.
    pub fn read(&mut self) -> IpcResult<T> {
        self.check_role(self.role.can_read(), "read")?;

        self.slots_filled.wait(None)?;
        let value = unsafe { ptr::read(self.slot(self.read_cursor)) };
        trace!(name = %self.name(), slot = self.read_cursor, "ring read");
        self.read_cursor = (self.read_cursor + 1) % C;
        self.slots_free.post(1)?;
        Ok(value)
    }

    /// [`read`](Self::read) into caller-provided storage.
    pub fn read_into(&mut self, out: &mut T) -> IpcResult<()> {
        *out = self.read()?;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        C
    }

    /// Values written but not yet read, as seen by the kernel semaphore.
    #[cfg(target_os = "linux")]
    pub fn pending(&self) -> IpcResult<usize> {
        Ok(self.slots_filled.value()? as usize)
    }

    pub fn role(&self) -> RingRole {
        self.role
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn permission(&self) -> Permission {
        self.region.permission()
    }

    pub fn is_writable(&self) -> bool {
        self.region.is_writable()
    }

    pub fn is_creator(&self) -> bool {
        self.region.is_creator()
    }

    /// Remove the region and both semaphores left behind under `name`.
    pub fn clear_storage(name: &str) {
        let (filled_name, free_name) = shm_name::ring_semaphore_names(name);
        NamedRegion::clear_storage(name);
        IpcSemaphore::clear_storage(&filled_name);
        IpcSemaphore::clear_storage(&free_name);
    }
}

impl<T: ShmValue, const C: usize> Drop for SharedRingBuffer<T, C> {
    fn drop(&mut self) {
        if self.region.ref_count() <= 1 {
            IpcSemaphore::clear_storage(self.slots_filled.name());
            IpcSemaphore::clear_storage(self.slots_free.name());
            debug!(name = %self.region.name(), "last ring handle, removed semaphores");
        }
    }
}
