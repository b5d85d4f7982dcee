// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A named shared memory region holding exactly one fixed-layout value.

use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ptr;

use tracing::{debug, warn};

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::shm::{NamedRegion, Permission};

/// Values that can be shared between processes by bitwise copy.
///
/// # Safety
///
/// Implementers guarantee that:
/// - the layout is fixed (`#[repr(C)]`, `#[repr(transparent)]` or a
///   primitive) and every cooperating process uses the same definition;
/// - the type holds no pointers, references or handles, nothing whose
///   meaning is local to one address space;
/// - the all-zero bit pattern is a valid value (fresh regions are
///   zero-filled).
///
/// ```
/// use typed_ipc::ShmValue;
///
/// #[derive(Clone, Copy, Debug, Default, PartialEq)]
/// #[repr(C)]
/// struct Pose {
///     x: f64,
///     y: f64,
///     yaw: f32,
///     seq: u32,
/// }
///
/// unsafe impl ShmValue for Pose {}
/// ```
pub unsafe trait ShmValue: Copy + Send + 'static {}

macro_rules! impl_shm_value {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl ShmValue for $t {})*
    };
}

impl_shm_value! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool,
}

unsafe impl<T: ShmValue, const N: usize> ShmValue for [T; N] {}

/// Construction options for [`TypedCell`] and [`ExclusiveTypedCell`](crate::ExclusiveTypedCell).
#[derive(Debug, Clone, Copy)]
pub struct CellOptions<T> {
    initial: Option<T>,
    require_initial: bool,
    config: IpcConfig,
}

impl<T: ShmValue> Default for CellOptions<T> {
    fn default() -> Self {
        Self {
            initial: None,
            require_initial: false,
            config: IpcConfig::default(),
        }
    }
}

impl<T: ShmValue> CellOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value written into a freshly created region before the handle is
    /// returned. Ignored when the region already existed.
    pub fn initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Make a `Create*` permission without an initial value an error
    /// ([`IpcError::NullInitialValue`]).
    pub fn require_initial(mut self, required: bool) -> Self {
        self.require_initial = required;
        self
    }

    pub fn config(mut self, config: IpcConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn ipc_config(&self) -> &IpcConfig {
        &self.config
    }
}

/// One `T` in a named shared memory region, with no synchronization.
///
/// Any process may write the value at any time; use
/// [`ExclusiveTypedCell`](crate::ExclusiveTypedCell) when updates from
/// several processes must not interleave.
pub struct TypedCell<T: ShmValue> {
    region: NamedRegion,
    _marker: PhantomData<T>,
}

impl<T: ShmValue> TypedCell<T> {
    const NON_ZERO_SIZED: () = assert!(mem::size_of::<T>() > 0, "zero-sized values cannot be shared");

    pub fn open(name: &str, permission: Permission) -> IpcResult<Self> {
        Self::open_with(name, permission, CellOptions::default())
    }

    pub fn open_with(name: &str, permission: Permission, options: CellOptions<T>) -> IpcResult<Self> {
        let () = Self::NON_ZERO_SIZED;

        if permission.is_create() && options.require_initial && options.initial.is_none() {
            return Err(IpcError::NullInitialValue {
                name: name.to_string(),
            });
        }

        let region = NamedRegion::open(name, mem::size_of::<T>(), permission, &options.config)?;

        if options.config.debug_checks && region.base() as usize % mem::align_of::<T>() != 0 {
            return Err(IpcError::mapping(
                name,
                io::Error::new(io::ErrorKind::InvalidData, "mapping is misaligned for the value type"),
            ));
        }

        let cell = Self {
            region,
            _marker: PhantomData,
        };

        match options.initial {
            Some(value) if cell.region.is_creator() => {
                unsafe { ptr::write(cell.as_ptr(), value) };
                debug!(name, "initialised shared value");
            }
            Some(_) => warn!(name, ?permission, "region already exists, initial value ignored"),
            None => {}
        }

        Ok(cell)
    }

    /// Address of the live value in this process's mapping.
    pub(crate) fn as_ptr(&self) -> *mut T {
        self.region.base() as *mut T
    }

    /// Copy of the current value.
    pub fn read(&self) -> T {
        unsafe { ptr::read(self.as_ptr()) }
    }

    /// Overwrite the shared value. Fails with [`IpcError::NotWritable`] on a
    /// read-only handle, leaving the region untouched.
    pub fn write(&mut self, value: T) -> IpcResult<()> {
        *self.get_mut()? = value;
        Ok(())
    }

    /// Borrow the live value in place.
    ///
    /// The borrow is only stable while no other handle writes the region.
    /// When peers may write concurrently, take a copy with
    /// [`read`](Self::read) or serialize access through an
    /// [`ExclusiveTypedCell`](crate::ExclusiveTypedCell).
    pub fn get(&self) -> &T {
        unsafe { &*self.as_ptr() }
    }

    /// Mutably borrow the live value in place.
    pub fn get_mut(&mut self) -> IpcResult<&mut T> {
        if !self.region.is_writable() {
            return Err(IpcError::not_writable(self.region.name()));
        }
        Ok(unsafe { &mut *self.as_ptr() })
    }

    /// Run `f` on the live value without copying it.
    pub fn with_exclusive_access<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> IpcResult<R> {
        Ok(f(self.get_mut()?))
    }

    /// Run `f` on a shared borrow of the live value, e.g. to read part of a
    /// large value without copying all of it. The same caveat as
    /// [`get`](Self::get) applies to concurrent writers.
    pub fn inspect<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(self.get())
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

    pub fn region(&self) -> &NamedRegion {
        &self.region
    }

    pub fn clear_storage(name: &str) {
        NamedRegion::clear_storage(name);
    }
}
