use std::fmt::Display;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FileOpsError>;

/// Flat classification of [`FileOpsError`] for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PathNotFound,
    AlreadyExists,
    PermissionDenied,
    InvalidSize,
    InvalidHandle,
    InvalidName,
    MappingFailed,
    NotMapped,
    SegmentNotFound,
    SizeMismatch,
    Io,
}

#[derive(Error, Debug)]
pub enum FileOpsError {
    #[error("Path not found: {target}: {source}")]
    PathNotFound {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Path already exists: {target}: {source}")]
    AlreadyExists {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied: {target}: {source}")]
    PermissionDenied {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid size for {target}: {reason}")]
    InvalidSize { target: String, reason: String },

    #[error("Native handle is closed")]
    InvalidHandle,

    #[error("Invalid shared memory name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Failed to map {target}: {source}")]
    MappingFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Address {addr:#x} is not a live mapping")]
    NotMapped { addr: usize },

    #[error("Shared memory segment `{name}` not found")]
    SegmentNotFound { name: String },

    #[error("Shared memory segment `{name}` size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: u64,
    },

    #[error("{op} failed for {target}: {source}")]
    Io {
        op: &'static str,
        target: String,
        #[source]
        source: io::Error,
    },
}

impl FileOpsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileOpsError::PathNotFound { .. } => ErrorKind::PathNotFound,
            FileOpsError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            FileOpsError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            FileOpsError::InvalidSize { .. } => ErrorKind::InvalidSize,
            FileOpsError::InvalidHandle => ErrorKind::InvalidHandle,
            FileOpsError::InvalidName { .. } => ErrorKind::InvalidName,
            FileOpsError::MappingFailed { .. } => ErrorKind::MappingFailed,
            FileOpsError::NotMapped { .. } => ErrorKind::NotMapped,
            FileOpsError::SegmentNotFound { .. } => ErrorKind::SegmentNotFound,
            FileOpsError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            FileOpsError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Classify a platform error raised while operating on `target`.
    pub(crate) fn from_io(op: &'static str, target: impl Display, source: io::Error) -> Self {
        let target = target.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => FileOpsError::PathNotFound { target, source },
            io::ErrorKind::AlreadyExists => FileOpsError::AlreadyExists { target, source },
            io::ErrorKind::PermissionDenied => FileOpsError::PermissionDenied { target, source },
            _ => FileOpsError::Io { op, target, source },
        }
    }

    /// Classify a failure of the platform mapping call itself.
    pub(crate) fn mapping(target: impl Display, source: io::Error) -> Self {
        let target = target.to_string();
        match source.kind() {
            io::ErrorKind::PermissionDenied => FileOpsError::PermissionDenied { target, source },
            _ => FileOpsError::MappingFailed { target, source },
        }
    }

    pub(crate) fn invalid_size(target: impl Display, reason: impl Into<String>) -> Self {
        FileOpsError::InvalidSize {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_mapped(ptr: *const u8) -> Self {
        FileOpsError::NotMapped { addr: ptr as usize }
    }
}
