// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Name derivation for the named OS objects backing cells and ring buffers.
// Every cooperating process must derive the same OS names from the same
// user-facing names, so everything here is pure and deterministic.

use std::io;

use crate::config::NameEncoding;

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum length for POSIX shm/semaphore names. 0 disables truncation.
///
/// On macOS `PSHMNAMLEN` and `PSEMNAMLEN` are 31. On Linux the limit is
/// `NAME_MAX` (255), well past anything worth truncating.
#[cfg(target_os = "macos")]
pub const OS_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const OS_NAME_MAX: usize = 0;

/// Suffix of the semaphore counting filled ring slots (the reader waits on it).
pub const RING_FILLED_SUFFIX: &str = "_RING_FILLED_";

/// Suffix of the semaphore counting free ring slots (the writer waits on it).
pub const RING_FREE_SUFFIX: &str = "_RING_FREE_";

/// Check a user-facing name against the configured encoding.
///
/// Empty names and names with interior NUL bytes are never valid.
/// [`NameEncoding::Narrow`] additionally restricts names to ASCII.
pub fn validate(name: &str, encoding: NameEncoding) -> io::Result<()> {
    if name.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
    }
    if name.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "name contains a NUL byte",
        ));
    }
    if encoding == NameEncoding::Narrow && !name.is_ascii() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "narrow name encoding requires an ASCII name",
        ));
    }
    Ok(())
}

/// Produce a POSIX-safe object name (with leading '/').
///
/// When [`OS_NAME_MAX`] is non-zero, names longer than the limit are
/// shortened to `/<prefix>_<16-hex-FNV-1a-hash>` where `<prefix>` keeps as
/// much of the given name as fits.
pub fn os_name(name: &str) -> String {
    let result = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if OS_NAME_MAX == 0 || result.len() <= OS_NAME_MAX {
        return result;
    }

    // '/' + '_' + 16 hex digits
    const FIXED: usize = 1 + 1 + 16;
    let prefix_len = OS_NAME_MAX.saturating_sub(FIXED);

    let mut shortened = String::with_capacity(OS_NAME_MAX);
    shortened.push('/');
    let body = &result[1..];
    let mut take = prefix_len.min(body.len());
    while !body.is_char_boundary(take) {
        take -= 1;
    }
    shortened.push_str(&body[..take]);
    shortened.push('_');
    shortened.push_str(&format!("{:016x}", fnv1a_64(result.as_bytes())));
    shortened
}

/// Names of the `(slots_filled, slots_free)` semaphores of a ring buffer.
pub fn ring_semaphore_names(base: &str) -> (String, String) {
    (
        format!("{base}{RING_FILLED_SUFFIX}"),
        format!("{base}{RING_FREE_SUFFIX}"),
    )
}

/// Null-terminated UTF-16 form of a name for the Win32 `W` entry points.
#[cfg(windows)]
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn os_name_prepends_slash() {
        let name = os_name("foo");
        assert!(name.starts_with('/'));
        assert!(name.contains("foo"));
    }

    #[test]
    fn os_name_keeps_existing_slash() {
        assert_eq!(&os_name("/bar")[..4], "/bar");
    }

    #[test]
    fn os_name_is_deterministic() {
        let long = "a_rather_long_region_name_that_exceeds_short_platform_limits";
        assert_eq!(os_name(long), os_name(long));
        if OS_NAME_MAX > 0 {
            assert!(os_name(long).len() <= OS_NAME_MAX);
        }
    }

    #[test]
    fn ring_names_use_fixed_suffixes() {
        let (filled, free) = ring_semaphore_names("telemetry");
        assert_eq!(filled, "telemetry_RING_FILLED_");
        assert_eq!(free, "telemetry_RING_FREE_");
        assert_ne!(os_name(&filled), os_name(&free));
    }

    #[test]
    fn validate_rejects_empty_and_nul() {
        assert!(validate("", NameEncoding::Wide).is_err());
        assert!(validate("a\0b", NameEncoding::Wide).is_err());
        assert!(validate("ok", NameEncoding::Wide).is_ok());
    }

    #[test]
    fn narrow_encoding_requires_ascii() {
        assert!(validate("température", NameEncoding::Narrow).is_err());
        assert!(validate("température", NameEncoding::Wide).is_ok());
        assert!(validate("temperature", NameEncoding::Narrow).is_ok());
    }
}
