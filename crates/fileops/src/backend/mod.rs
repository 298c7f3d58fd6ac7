//! Platform mapping backends.
//!
//! A backend turns an open [`NativeHandle`] into an address-space view. The
//! view owns whatever platform resources the mapping needs (a bare
//! `mmap` range, or a mapping object plus view) and releases them in
//! [`MappedView::unmap`].

use crate::errors::Result;
use crate::handle::{FileAccess, FileMode, NativeHandle};
use std::io;
use std::path::Path;

#[cfg(unix)]
pub mod posix;
pub mod portable;

#[cfg(unix)]
pub use posix::PosixBackend;
pub use portable::PortableBackend;

pub trait MappingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a native handle for later mapping.
    ///
    /// Default implementation delegates to [`NativeHandle::open`].
    fn open(
        &self,
        path: &Path,
        access: FileAccess,
        mode: FileMode,
        permissions: u32,
    ) -> Result<NativeHandle> {
        NativeHandle::open(path, access, mode, permissions)
    }

    /// Map `len` bytes of `handle` starting at `offset`.
    ///
    /// Callers validate the handle and range beforehand. Any intermediate
    /// resource created here must be released before an error is returned.
    fn map(
        &self,
        handle: &NativeHandle,
        offset: u64,
        len: usize,
    ) -> io::Result<Box<dyn MappedView>>;
}

/// A live address-space view produced by a [`MappingBackend`].
pub trait MappedView: Send {
    /// Address of the first requested byte (not necessarily page aligned).
    fn as_ptr(&self) -> *mut u8;

    fn len(&self) -> usize;

    fn is_writable(&self) -> bool;

    /// Synchronously write dirty pages back to the backing object.
    fn flush(&self) -> io::Result<()>;

    /// Release the view and any mapping object behind it.
    fn unmap(self: Box<Self>) -> io::Result<()>;
}

/// Protection for a view backed by a handle opened with `access`.
pub(crate) fn view_is_writable(access: Option<FileAccess>) -> bool {
    matches!(access, Some(FileAccess::Write | FileAccess::ReadWrite))
}

pub(crate) fn closed_handle() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "native handle is closed")
}
