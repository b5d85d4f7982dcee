// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Construction-time configuration shared by every primitive.

use std::env;

/// Environment variable selecting the [`NameEncoding`] (`narrow` / `wide`).
pub const ENV_NAME_ENCODING: &str = "TYPED_IPC_NAME_ENCODING";

/// Environment variable toggling [`IpcConfig::debug_checks`].
pub const ENV_DEBUG_CHECKS: &str = "TYPED_IPC_DEBUG_CHECKS";

/// Character width that all cooperating processes use for object names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameEncoding {
    /// Names are restricted to ASCII, so peers naming objects with single-byte
    /// characters derive byte-identical OS names.
    Narrow,
    /// Any UTF-8 name is accepted.
    #[default]
    Wide,
}

impl NameEncoding {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "narrow" => Some(Self::Narrow),
            "wide" => Some(Self::Wide),
            _ => None,
        }
    }
}

/// Options applied when a region, mutex or semaphore is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcConfig {
    /// Which names are accepted.
    pub name_encoding: NameEncoding,
    /// Extra layout checks: attached regions must match the requested size
    /// exactly and the mapping must satisfy the value's alignment.
    pub debug_checks: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            name_encoding: NameEncoding::default(),
            debug_checks: cfg!(debug_assertions),
        }
    }
}

impl IpcConfig {
    /// Defaults overridden by [`ENV_NAME_ENCODING`] and [`ENV_DEBUG_CHECKS`].
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(encoding) = env::var(ENV_NAME_ENCODING)
            .ok()
            .and_then(|v| NameEncoding::parse(&v))
        {
            config.name_encoding = encoding;
        }
        if let Some(checks) = env::var(ENV_DEBUG_CHECKS).ok().and_then(|v| parse_flag(&v)) {
            config.debug_checks = checks;
        }
        config
    }

    pub fn with_name_encoding(mut self, name_encoding: NameEncoding) -> Self {
        self.name_encoding = name_encoding;
        self
    }

    pub fn with_debug_checks(mut self, debug_checks: bool) -> Self {
        self.debug_checks = debug_checks;
        self
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
