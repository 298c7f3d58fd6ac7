//! Subsystem configuration.
//!
//! Defaults are chosen per platform; every field can be overridden from the
//! environment with [`FileOpsConfig::from_env`].

use crate::backend::{MappingBackend, PortableBackend};
use crate::handle::DEFAULT_FILE_PERMISSIONS;
use std::env;

/// Permissions applied to shared-memory segments created by an owner.
pub const DEFAULT_SEGMENT_PERMISSIONS: u32 = 0o600;

/// Selects the mapping backend (`posix` or `portable`).
pub const BACKEND_VAR: &str = "FILEOPS_BACKEND";

/// Octal permissions for newly created files, e.g. `0644`.
pub const FILE_MODE_VAR: &str = "FILEOPS_FILE_MODE";

/// Octal permissions for newly created segments, e.g. `0600`.
pub const SEGMENT_MODE_VAR: &str = "FILEOPS_SHM_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Direct `mmap`/`munmap` calls. Unix only.
    Posix,
    /// memmap2 mapping objects. Available everywhere.
    Portable,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Posix => "posix",
            BackendKind::Portable => "portable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "posix" | "mmap" => Some(BackendKind::Posix),
            "portable" | "memmap" | "memmap2" => Some(BackendKind::Portable),
            _ => None,
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(unix) {
            BackendKind::Posix
        } else {
            BackendKind::Portable
        }
    }

    pub(crate) fn instantiate(self) -> Box<dyn MappingBackend> {
        match self {
            #[cfg(unix)]
            BackendKind::Posix => Box::new(crate::backend::PosixBackend),
            #[cfg(not(unix))]
            BackendKind::Posix => {
                tracing::warn!("posix backend unavailable on this platform, using portable");
                Box::new(PortableBackend)
            }
            BackendKind::Portable => Box::new(PortableBackend),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOpsConfig {
    pub backend: BackendKind,
    pub file_permissions: u32,
    pub segment_permissions: u32,
}

impl Default for FileOpsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::platform_default(),
            file_permissions: DEFAULT_FILE_PERMISSIONS,
            segment_permissions: DEFAULT_SEGMENT_PERMISSIONS,
        }
    }
}

impl FileOpsConfig {
    /// Load configuration from environment variables with platform defaults.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = read_var(BACKEND_VAR, BackendKind::parse).unwrap_or(defaults.backend);
        let file_permissions =
            read_var(FILE_MODE_VAR, parse_permissions).unwrap_or(defaults.file_permissions);
        let segment_permissions =
            read_var(SEGMENT_MODE_VAR, parse_permissions).unwrap_or(defaults.segment_permissions);

        Self {
            backend,
            file_permissions,
            segment_permissions,
        }
    }
}

fn read_var<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let value = env::var(name).ok()?;
    let parsed = parse(&value);
    if parsed.is_none() {
        tracing::warn!(var = name, value = %value, "Ignoring invalid configuration value");
    }
    parsed
}

/// Parse octal permission bits such as `644`, `0644` or `0o644`.
pub fn parse_permissions(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value.strip_prefix("0o").unwrap_or(value);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
}
