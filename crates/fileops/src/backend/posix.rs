//! Direct address-space mapping through `mmap`/`munmap`/`msync`.

use super::{MappedView, MappingBackend, closed_handle, view_is_writable};
use crate::handle::NativeHandle;
use nix::sys::mman::{self, MapFlags, MsFlags, ProtFlags};
use nix::unistd::{SysconfVar, sysconf};
use std::ffi::c_void;
use std::io;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::OnceLock;

const FALLBACK_PAGE_SIZE: usize = 4096;

pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        sysconf(SysconfVar::PAGE_SIZE)
            .ok()
            .flatten()
            .and_then(|value| usize::try_from(value).ok())
            .filter(|size| size.is_power_of_two())
            .unwrap_or(FALLBACK_PAGE_SIZE)
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PosixBackend;

impl MappingBackend for PosixBackend {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn map(
        &self,
        handle: &NativeHandle,
        offset: u64,
        len: usize,
    ) -> io::Result<Box<dyn MappedView>> {
        let file = handle.file().ok_or_else(closed_handle)?;

        // mmap offsets must be page aligned; map from the enclosing page.
        let lead = (offset % page_size() as u64) as usize;
        let aligned_offset = libc::off_t::try_from(offset - lead as u64)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let map_len = len
            .checked_add(lead)
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid mapping length"))?;

        let writable = view_is_writable(handle.access());
        let prot = if writable {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        } else {
            ProtFlags::PROT_READ
        };

        let base = unsafe {
            mman::mmap(
                None,
                map_len,
                prot,
                MapFlags::MAP_SHARED,
                file,
                aligned_offset,
            )?
        };

        Ok(Box::new(PosixView {
            base,
            map_len: map_len.get(),
            lead,
            len,
            writable,
            mapped: true,
        }))
    }
}

struct PosixView {
    base: NonNull<c_void>,
    map_len: usize,
    lead: usize,
    len: usize,
    writable: bool,
    mapped: bool,
}

// SAFETY: the view exclusively owns its mapping; the address is only
// dereferenced by whoever holds the view or the registry entry wrapping it.
unsafe impl Send for PosixView {}

impl PosixView {
    fn release(&mut self) -> io::Result<()> {
        if !self.mapped {
            return Ok(());
        }
        self.mapped = false;
        unsafe { mman::munmap(self.base, self.map_len)? };
        Ok(())
    }
}

impl MappedView for PosixView {
    fn as_ptr(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().cast::<u8>().add(self.lead) }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn flush(&self) -> io::Result<()> {
        unsafe { mman::msync(self.base, self.map_len, MsFlags::MS_SYNC)? };
        Ok(())
    }

    fn unmap(mut self: Box<Self>) -> io::Result<()> {
        self.release()
    }
}

impl Drop for PosixView {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "munmap failed while dropping view");
        }
    }
}
