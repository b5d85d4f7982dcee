// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for named regions, locks, semaphores and the typed
// primitives built on them.

use std::io;

use thiserror::Error;

use crate::ring::RingRole;

/// Errors produced by the shared memory primitives.
#[derive(Error, Debug)]
pub enum IpcError {
    /// The OS refused to create or open the named object.
    #[error("failed to create or open named object `{name}`: {source}")]
    HandleCreationFailed {
        /// User-facing object name
        name: String,
        #[source]
        source: io::Error,
    },

    /// A handle was obtained but the region could not be mapped.
    #[error("failed to map shared memory `{name}`: {source}")]
    MappingFailed {
        /// User-facing region name
        name: String,
        #[source]
        source: io::Error,
    },

    /// An initial value was required to create the object but none was given.
    #[error("an initial value is required to create `{name}`")]
    NullInitialValue {
        /// User-facing region name
        name: String,
    },

    /// A write was attempted on an instance opened read-only.
    #[error("`{name}` was opened read-only")]
    NotWritable {
        /// User-facing region name
        name: String,
    },

    /// A byte range reaching past the end of a region.
    #[error("range {offset}+{len} exceeds the {size} bytes of `{name}`")]
    OutOfBounds {
        /// User-facing region name
        name: String,
        offset: usize,
        len: usize,
        size: usize,
    },

    /// A ring buffer operation the handle's role does not permit.
    #[error("ring buffer `{name}` opened as {role:?} cannot {operation}")]
    WrongRole {
        /// User-facing ring buffer name
        name: String,
        /// Role chosen at construction
        role: RingRole,
        /// Rejected operation
        operation: &'static str,
    },

    /// A lock, wait or post on an already-open primitive failed.
    #[error("synchronization on `{name}` failed: {source}")]
    SyncFailed {
        /// User-facing object name
        name: String,
        #[source]
        source: io::Error,
    },
}

impl IpcError {
    pub(crate) fn handle(name: &str, source: io::Error) -> Self {
        Self::HandleCreationFailed {
            name: name.to_string(),
            source,
        }
    }

    pub(crate) fn mapping(name: &str, source: io::Error) -> Self {
        Self::MappingFailed {
            name: name.to_string(),
            source,
        }
    }

    pub(crate) fn sync(name: &str, source: io::Error) -> Self {
        Self::SyncFailed {
            name: name.to_string(),
            source,
        }
    }

    pub(crate) fn not_writable(name: &str) -> Self {
        Self::NotWritable {
            name: name.to_string(),
        }
    }

    /// Per-call conditions that leave the object usable.
    /// Everything else is fatal to construction or to the IPC session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotWritable { .. } | Self::OutOfBounds { .. } | Self::WrongRole { .. }
        )
    }

    /// Underlying OS error, if any.
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            Self::HandleCreationFailed { source, .. }
            | Self::MappingFailed { source, .. }
            | Self::SyncFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for shared memory operations.
pub type IpcResult<T> = Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_per_call_errors_are_recoverable() {
        assert!(IpcError::not_writable("x").is_recoverable());
        assert!(IpcError::WrongRole {
            name: "x".into(),
            role: RingRole::Consumer,
            operation: "write",
        }
        .is_recoverable());
        assert!(IpcError::OutOfBounds {
            name: "x".into(),
            offset: 8,
            len: 4,
            size: 10,
        }
        .is_recoverable());
        assert!(!IpcError::NullInitialValue { name: "x".into() }.is_recoverable());
        assert!(!IpcError::handle("x", io::Error::from(io::ErrorKind::NotFound)).is_recoverable());
    }

    #[test]
    fn os_error_is_exposed() {
        let err = IpcError::mapping("x", io::Error::from(io::ErrorKind::OutOfMemory));
        assert_eq!(err.os_error().map(io::Error::kind), Some(io::ErrorKind::OutOfMemory));
        assert!(IpcError::not_writable("x").os_error().is_none());
    }

    #[test]
    fn messages_name_the_object() {
        let msg = IpcError::not_writable("sensor").to_string();
        assert!(msg.contains("sensor"));
    }
}
