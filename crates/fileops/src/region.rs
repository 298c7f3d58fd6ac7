use crate::backend::MappedView;
use crate::errors::{FileOpsError, Result};
use crate::handle::NativeHandle;
use crate::registry::{MappingRecord, Ownership};
use crate::subsystem::Subsystem;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

/// Base address and length of a mapping released through the pointer-only
/// API (`FileOps::unmap`).
///
/// Carries no ownership: copying it does not duplicate the mapping, and any
/// copy becomes dangling once the mapping is unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedPtr {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: a MappedPtr is an address plus a length; dereferencing it is
// already `unsafe` and subject to the caller's own synchronization.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// The mapping must stay live for `'a` and nothing may write to it
    /// through another alias while the slice exists.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// # Safety
    ///
    /// As [`MappedPtr::as_slice`], plus the mapping must be writable and the
    /// returned slice must be the only live reference into it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// One mapped view of a file or segment, unmapped when dropped.
///
/// Regions are move-only. [`MemoryMappedRegion::take`] moves the mapping out
/// of a region in place, leaving that region invalid.
pub struct MemoryMappedRegion {
    ptr: Option<NonNull<u8>>,
    size: usize,
    writable: bool,
    subsystem: Arc<Subsystem>,
}

// SAFETY: the region exclusively owns its registry entry; shared access only
// hands out `&[u8]` and registry-locked flushes.
unsafe impl Send for MemoryMappedRegion {}
unsafe impl Sync for MemoryMappedRegion {}

impl std::fmt::Debug for MemoryMappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMappedRegion")
            .field("ptr", &self.as_ptr())
            .field("size", &self.size)
            .field("writable", &self.writable)
            .finish()
    }
}

impl MemoryMappedRegion {
    pub(crate) fn new(subsystem: Arc<Subsystem>) -> Self {
        Self {
            ptr: None,
            size: 0,
            writable: false,
            subsystem,
        }
    }

    /// Map `size` bytes of `handle` starting at `offset`.
    ///
    /// The handle stays with the caller and may be closed once this returns.
    /// Any mapping the region already holds is released first.
    pub fn map(&mut self, handle: &NativeHandle, offset: u64, size: usize) -> Result<()> {
        let view = self.create_view(handle, offset, size)?;
        self.adopt(MappingRecord::new(view, None, handle.origin()))
    }

    /// Like [`MemoryMappedRegion::map`], but the handle is closed together
    /// with the mapping (or right away if mapping fails).
    pub(crate) fn map_owned(
        &mut self,
        handle: NativeHandle,
        offset: u64,
        size: usize,
    ) -> Result<()> {
        let view = self.create_view(&handle, offset, size)?;
        let origin = handle.origin().to_string();
        self.adopt(MappingRecord::new(view, Some(handle), origin))
    }

    fn create_view(
        &mut self,
        handle: &NativeHandle,
        offset: u64,
        size: usize,
    ) -> Result<Box<dyn MappedView>> {
        if size == 0 {
            return Err(FileOpsError::invalid_size(
                handle.origin(),
                "mapping size must be greater than zero",
            ));
        }
        if !handle.is_valid() {
            return Err(FileOpsError::InvalidHandle);
        }

        self.unmap()?;

        let end = offset.checked_add(size as u64).ok_or_else(|| {
            FileOpsError::invalid_size(
                handle.origin(),
                format!("offset {offset} + size {size} overflows"),
            )
        })?;
        let object_len = handle.file_len()?;
        if end > object_len {
            return Err(FileOpsError::invalid_size(
                handle.origin(),
                format!("range {offset}..{end} exceeds object length {object_len}"),
            ));
        }

        self.subsystem
            .backend
            .map(handle, offset, size)
            .map_err(|e| FileOpsError::mapping(handle.origin(), e))
    }

    fn adopt(&mut self, record: MappingRecord) -> Result<()> {
        let size = record.size();
        let writable = record.is_writable();
        let ptr = self.subsystem.registry.register(record)?;

        self.ptr = Some(ptr);
        self.size = size;
        self.writable = writable;

        tracing::debug!(
            ptr = ?ptr,
            size,
            writable,
            backend = self.subsystem.backend.name(),
            "Mapped region"
        );
        Ok(())
    }

    /// Release the mapping. Does nothing if the region holds none.
    pub fn unmap(&mut self) -> Result<()> {
        let Some(ptr) = self.ptr.take() else {
            return Ok(());
        };
        self.size = 0;
        self.writable = false;

        self.subsystem
            .registry
            .lookup_and_remove(ptr.as_ptr(), Ownership::Region)?
            .release()?;

        tracing::debug!(ptr = ?ptr, "Unmapped region");
        Ok(())
    }

    /// Synchronously write dirty pages back to the backing object.
    pub fn flush(&self) -> Result<()> {
        let ptr = self.ptr.ok_or(FileOpsError::NotMapped { addr: 0 })?;
        self.subsystem.registry.flush(ptr.as_ptr())
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.ptr.is_some()
    }

    /// Base address, null when the region is invalid.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.ptr {
            // SAFETY: the registry entry for `ptr` lives until this region
            // unmaps it, which needs `&mut self`.
            Some(ptr) => unsafe { slice::from_raw_parts(ptr.as_ptr(), self.size) },
            None => &[],
        }
    }

    /// Mutable view of the mapping, `None` if it is invalid or read-only.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self.ptr {
            Some(ptr) if self.writable => {
                Some(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.size) })
            }
            _ => None,
        }
    }

    /// Move the mapping into a new region, leaving `self` invalid.
    pub fn take(&mut self) -> Self {
        Self {
            ptr: self.ptr.take(),
            size: mem::take(&mut self.size),
            writable: mem::take(&mut self.writable),
            subsystem: Arc::clone(&self.subsystem),
        }
    }

    /// Give up RAII ownership; the mapping must then be released with
    /// `FileOps::unmap`.
    pub fn into_raw(mut self) -> Result<MappedPtr> {
        let ptr = self.ptr.ok_or(FileOpsError::NotMapped { addr: 0 })?;
        self.subsystem.registry.release_to_caller(ptr.as_ptr())?;

        self.ptr = None;
        Ok(MappedPtr {
            ptr,
            len: mem::take(&mut self.size),
        })
    }
}

impl Drop for MemoryMappedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            tracing::warn!(error = %e, "Failed to unmap region on drop");
        }
    }
}
