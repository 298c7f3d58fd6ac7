//! Native file handles with portable open semantics.

use crate::errors::{FileOpsError, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Permissions applied to files created through [`NativeHandle::open`].
pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;

#[cfg(unix)]
pub type RawHandle = std::os::fd::RawFd;
#[cfg(unix)]
pub const INVALID_RAW_HANDLE: RawHandle = -1;

#[cfg(windows)]
pub type RawHandle = std::os::windows::io::RawHandle;
#[cfg(windows)]
pub const INVALID_RAW_HANDLE: RawHandle = usize::MAX as RawHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    pub fn is_readable(self) -> bool {
        matches!(self, FileAccess::Read | FileAccess::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, FileAccess::Write | FileAccess::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Fails if the file doesn't exist.
    OpenExisting,
    /// Opens if the file exists, creates it otherwise.
    OpenAlways,
    /// Fails if the file exists.
    CreateNew,
    /// Creates the file, truncating any existing content.
    CreateAlways,
    /// Opens an existing file and clears it.
    TruncateExisting,
}

/// An exclusively owned platform file handle.
///
/// A closed handle is the invalid sentinel: [`NativeHandle::invalid`],
/// [`NativeHandle::default`] and any handle after [`NativeHandle::close`]
/// all report `is_valid() == false`.
#[derive(Debug, Default)]
pub struct NativeHandle {
    file: Option<File>,
    access: Option<FileAccess>,
    origin: String,
}

impl NativeHandle {
    /// Open `path` with the given access and creation disposition.
    ///
    /// `permissions` only affects files created by this call.
    pub fn open(
        path: impl AsRef<Path>,
        access: FileAccess,
        mode: FileMode,
        permissions: u32,
    ) -> Result<Self> {
        let path = path.as_ref();

        let mut options = OpenOptions::new();
        options.read(access.is_readable()).write(access.is_writable());
        apply_mode(&mut options, mode, permissions);

        let file = options
            .open(path)
            .map_err(|e| FileOpsError::from_io("open", path.display(), e))?;

        tracing::debug!(path = %path.display(), ?access, ?mode, "Opened native handle");

        Ok(Self::from_file(file, access, path.display()))
    }

    pub(crate) fn from_file(file: File, access: FileAccess, origin: impl ToString) -> Self {
        Self {
            file: Some(file),
            access: Some(access),
            origin: origin.to_string(),
        }
    }

    pub const fn invalid() -> Self {
        Self {
            file: None,
            access: None,
            origin: String::new(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    /// Access the handle was opened with, `None` once closed.
    #[inline]
    pub fn access(&self) -> Option<FileAccess> {
        self.file.as_ref().and(self.access)
    }

    /// Path or segment name the handle was opened from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Borrow the underlying file, e.g. to hand it to a stream reader.
    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    pub(crate) fn require(&self) -> Result<&File> {
        self.file.as_ref().ok_or(FileOpsError::InvalidHandle)
    }

    /// Current size of the backing object in bytes.
    pub fn file_len(&self) -> Result<u64> {
        let metadata = self
            .require()?
            .metadata()
            .map_err(|e| FileOpsError::from_io("stat", &self.origin, e))?;
        Ok(metadata.len())
    }

    /// Resize the backing object, zero-filling any growth.
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.require()?
            .set_len(len)
            .map_err(|e| FileOpsError::from_io("resize", &self.origin, e))
    }

    #[cfg(unix)]
    pub fn raw(&self) -> RawHandle {
        use std::os::fd::AsRawFd;
        self.file.as_ref().map_or(INVALID_RAW_HANDLE, |f| f.as_raw_fd())
    }

    #[cfg(windows)]
    pub fn raw(&self) -> RawHandle {
        use std::os::windows::io::AsRawHandle;
        self.file
            .as_ref()
            .map_or(INVALID_RAW_HANDLE, |f| f.as_raw_handle())
    }

    /// Close the handle. Calling this on a closed handle does nothing.
    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            tracing::trace!(origin = %self.origin, "Closed native handle");
        }
    }
}

#[cfg(unix)]
fn apply_mode(options: &mut OpenOptions, mode: FileMode, permissions: u32) {
    use std::os::unix::fs::OpenOptionsExt;

    // Raw flags keep O_CREAT/O_TRUNC available to read-only handles, which
    // the portable builder rejects.
    let flags = match mode {
        FileMode::OpenExisting => 0,
        FileMode::OpenAlways => libc::O_CREAT,
        FileMode::CreateNew => libc::O_CREAT | libc::O_EXCL,
        FileMode::CreateAlways => libc::O_CREAT | libc::O_TRUNC,
        FileMode::TruncateExisting => libc::O_TRUNC,
    };
    options.custom_flags(flags).mode(permissions);
}

#[cfg(not(unix))]
fn apply_mode(options: &mut OpenOptions, mode: FileMode, _permissions: u32) {
    match mode {
        FileMode::OpenExisting => {}
        FileMode::OpenAlways => {
            options.create(true);
        }
        FileMode::CreateNew => {
            options.create_new(true);
        }
        FileMode::CreateAlways => {
            options.create(true).truncate(true);
        }
        FileMode::TruncateExisting => {
            options.truncate(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    #[test]
    fn test_open_existing_fails_for_missing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        let err = NativeHandle::open(
            &path,
            FileAccess::Read,
            FileMode::OpenExisting,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PathNotFound);
        assert!(
            err.to_string().contains("missing.bin"),
            "Error should name the path: {err}"
        );
    }

    #[test]
    fn test_create_new_fails_if_path_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exists.bin");
        std::fs::write(&path, b"x").unwrap();

        let err = NativeHandle::open(
            &path,
            FileAccess::ReadWrite,
            FileMode::CreateNew,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_create_new_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.bin");

        let handle = NativeHandle::open(
            &path,
            FileAccess::Write,
            FileMode::CreateNew,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap();

        assert!(handle.is_valid());
        assert!(path.exists());
    }

    #[test]
    fn test_open_always_never_fails_on_existence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("always.bin");

        // Absent: created
        let first = NativeHandle::open(
            &path,
            FileAccess::ReadWrite,
            FileMode::OpenAlways,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap();
        first.file().unwrap().write_all(b"keep me").unwrap();
        drop(first);

        // Present: opened without truncation
        let second = NativeHandle::open(
            &path,
            FileAccess::Read,
            FileMode::OpenAlways,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap();
        assert_eq!(second.file_len().unwrap(), 7, "OpenAlways must not truncate");
    }

    #[test]
    fn test_create_always_truncates_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overwrite.bin");
        std::fs::write(&path, b"old content").unwrap();

        let handle = NativeHandle::open(
            &path,
            FileAccess::Write,
            FileMode::CreateAlways,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap();

        assert_eq!(handle.file_len().unwrap(), 0);
    }

    #[test]
    fn test_truncate_existing_yields_empty_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncate.bin");
        std::fs::write(&path, b"some bytes").unwrap();

        let handle = NativeHandle::open(
            &path,
            FileAccess::ReadWrite,
            FileMode::TruncateExisting,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap();

        let mut contents = Vec::new();
        let read = handle.file().unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(read, 0, "Truncated file should read back zero bytes");
    }

    #[test]
    fn test_truncate_existing_requires_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nothing.bin");

        let err = NativeHandle::open(
            &path,
            FileAccess::ReadWrite,
            FileMode::TruncateExisting,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PathNotFound);
        assert!(!path.exists(), "TruncateExisting must not create the file");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_handle_can_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readonly_create.bin");

        let handle = NativeHandle::open(
            &path,
            FileAccess::Read,
            FileMode::CreateAlways,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap();

        assert_eq!(handle.access(), Some(FileAccess::Read));
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_apply_to_new_files_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("perms.bin");

        NativeHandle::open(&path, FileAccess::Write, FileMode::CreateNew, 0o600).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        NativeHandle::open(&path, FileAccess::Write, FileMode::OpenAlways, 0o666).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "Existing file permissions must be left alone");
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("close.bin");

        let mut handle = NativeHandle::open(
            &path,
            FileAccess::ReadWrite,
            FileMode::CreateNew,
            DEFAULT_FILE_PERMISSIONS,
        )
        .unwrap();
        assert!(handle.is_valid());
        assert_ne!(handle.raw(), INVALID_RAW_HANDLE);

        handle.close();
        assert!(!handle.is_valid());
        assert_eq!(handle.raw(), INVALID_RAW_HANDLE);
        assert_eq!(handle.access(), None);

        handle.close();
        assert!(!handle.is_valid());
    }

    #[test]
    fn test_invalid_sentinel() {
        let mut handle = NativeHandle::invalid();
        assert!(!handle.is_valid());
        handle.close();

        assert!(matches!(
            handle.file_len(),
            Err(FileOpsError::InvalidHandle)
        ));
        assert!(!NativeHandle::default().is_valid());
    }
}
