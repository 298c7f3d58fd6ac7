//! Mapping through `memmap2`, which drives the native mapping-object API on
//! every platform it supports.

use super::{MappedView, MappingBackend, closed_handle, view_is_writable};
use crate::handle::NativeHandle;
use memmap2::{MmapOptions, MmapRaw};
use std::io;

#[derive(Debug, Default, Clone, Copy)]
pub struct PortableBackend;

impl MappingBackend for PortableBackend {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn map(
        &self,
        handle: &NativeHandle,
        offset: u64,
        len: usize,
    ) -> io::Result<Box<dyn MappedView>> {
        let file = handle.file().ok_or_else(closed_handle)?;
        let writable = view_is_writable(handle.access());

        let mut options = MmapOptions::new();
        options.offset(offset).len(len);

        let raw = if writable {
            options.map_raw(file)?
        } else {
            options.map_raw_read_only(file)?
        };

        Ok(Box::new(PortableView { raw, writable }))
    }
}

struct PortableView {
    raw: MmapRaw,
    writable: bool,
}

impl MappedView for PortableView {
    fn as_ptr(&self) -> *mut u8 {
        self.raw.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.raw.len()
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn flush(&self) -> io::Result<()> {
        self.raw.flush()
    }

    fn unmap(self: Box<Self>) -> io::Result<()> {
        // MmapRaw releases the view (and mapping object) when dropped.
        let PortableView { raw, .. } = *self;
        drop(raw);
        Ok(())
    }
}
