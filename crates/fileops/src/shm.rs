//! Named shared-memory segments.
//!
//! An owner creates a segment and sizes it; attachers open an existing one
//! and never resize it. Names outlive every mapping: a segment stays
//! attachable until [`unlink`] removes its name, and unlinking does not
//! invalidate mappings that are already attached.
//!
//! On unix segments are POSIX shared-memory objects (`shm_open`). Elsewhere
//! they are emulated with files in the temp directory.

use crate::errors::{FileOpsError, Result};
use crate::handle::{FileAccess, NativeHandle};
use crate::region::{MappedPtr, MemoryMappedRegion};
use crate::subsystem::Subsystem;
use std::io;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    /// Creates the segment and sets its size.
    Owner,
    /// Opens an existing segment as-is.
    Attacher,
}

impl SegmentRole {
    pub fn from_owner_flag(is_owner: bool) -> Self {
        if is_owner {
            SegmentRole::Owner
        } else {
            SegmentRole::Attacher
        }
    }
}

/// A mapped shared-memory segment. Unmapped on drop; the name survives.
#[derive(Debug)]
pub struct SharedMemorySegment {
    name: String,
    role: SegmentRole,
    region: MemoryMappedRegion,
}

impl SharedMemorySegment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> SegmentRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.region.is_valid()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.region.as_slice()
    }

    /// Segments are always mapped read-write; empty once unmapped.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.region.as_mut_slice().unwrap_or_default()
    }

    pub fn flush(&self) -> Result<()> {
        self.region.flush()
    }

    pub fn unmap(&mut self) -> Result<()> {
        self.region.unmap()
    }

    pub fn region(&self) -> &MemoryMappedRegion {
        &self.region
    }

    pub fn into_region(self) -> MemoryMappedRegion {
        self.region
    }

    pub fn into_raw(self) -> Result<MappedPtr> {
        self.region.into_raw()
    }
}

/// Translate a caller-supplied name to the platform's object name.
///
/// POSIX wants a single leading slash and no other; a missing one is added.
pub(crate) fn native_name(name: &str) -> Result<String> {
    let invalid = |reason| FileOpsError::InvalidName {
        name: name.to_string(),
        reason,
    };

    let bare = name.strip_prefix('/').unwrap_or(name);
    if bare.is_empty() {
        return Err(invalid("name is empty"));
    }
    if bare.contains('/') {
        return Err(invalid("name contains an interior '/'"));
    }
    if bare.contains('\0') {
        return Err(invalid("name contains a NUL byte"));
    }

    Ok(format!("/{bare}"))
}

pub(crate) fn open_or_create(
    subsystem: &Arc<Subsystem>,
    name: &str,
    size: usize,
    is_owner: bool,
) -> Result<SharedMemorySegment> {
    let role = SegmentRole::from_owner_flag(is_owner);
    if size == 0 {
        return Err(FileOpsError::invalid_size(
            name,
            "segment size must be greater than zero",
        ));
    }
    let native = native_name(name)?;

    let (handle, created) = match role {
        SegmentRole::Owner => create(&native, size, subsystem.config.segment_permissions)?,
        SegmentRole::Attacher => (attach(&native, size)?, false),
    };

    let mut region = MemoryMappedRegion::new(Arc::clone(subsystem));
    if let Err(e) = region.map_owned(handle, 0, size) {
        if created {
            discard_created(&native);
        }
        return Err(e);
    }

    tracing::debug!(name = %native, size, ?role, created, "Opened shared memory segment");

    Ok(SharedMemorySegment {
        name: native,
        role,
        region,
    })
}

fn create(native: &str, size: usize, permissions: u32) -> Result<(NativeHandle, bool)> {
    let (file, created) = match sys::open(native, true, permissions) {
        Ok(file) => (file, true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let file = sys::open(native, false, permissions)
                .map_err(|e| FileOpsError::from_io("shm_open", native, e))?;
            (file, false)
        }
        Err(e) => return Err(FileOpsError::from_io("shm_open", native, e)),
    };

    let handle = NativeHandle::from_file(file, FileAccess::ReadWrite, native);
    // Some platforms only allow sizing a shared-memory object once.
    let resized = match handle.file_len() {
        Ok(len) if len == size as u64 => Ok(()),
        _ => handle.set_len(size as u64),
    };
    if let Err(e) = resized {
        if created {
            discard_created(native);
        }
        return Err(e);
    }

    Ok((handle, created))
}

fn attach(native: &str, size: usize) -> Result<NativeHandle> {
    let file = sys::open(native, false, 0).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => FileOpsError::SegmentNotFound {
            name: native.to_string(),
        },
        _ => FileOpsError::from_io("shm_open", native, e),
    })?;

    let handle = NativeHandle::from_file(file, FileAccess::ReadWrite, native);
    let actual = handle.file_len()?;
    if actual != size as u64 {
        return Err(FileOpsError::SizeMismatch {
            name: native.to_string(),
            expected: size,
            actual,
        });
    }

    Ok(handle)
}

/// Roll back a name this call created.
fn discard_created(native: &str) {
    if let Err(e) = sys::unlink(native) {
        tracing::warn!(name = %native, error = %e, "Failed to unlink segment after error");
    }
}

/// Remove `name` so later attaches fail. Unknown names are not an error.
pub(crate) fn unlink(name: &str) -> Result<()> {
    let native = native_name(name)?;
    match sys::unlink(&native) {
        Ok(()) => {
            tracing::debug!(name = %native, "Unlinked shared memory segment");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FileOpsError::from_io("shm_unlink", native, e)),
    }
}

#[cfg(unix)]
mod sys {
    use nix::fcntl::OFlag;
    use nix::sys::mman;
    use nix::sys::stat::Mode;
    use std::fs::File;
    use std::io;

    pub(super) fn open(native: &str, exclusive: bool, permissions: u32) -> io::Result<File> {
        let mut flags = OFlag::O_RDWR;
        if exclusive {
            flags |= OFlag::O_CREAT | OFlag::O_EXCL;
        }
        let mode = Mode::from_bits_truncate(permissions as libc::mode_t);

        let fd = mman::shm_open(native, flags, mode)?;
        Ok(File::from(fd))
    }

    pub(super) fn unlink(native: &str) -> io::Result<()> {
        mman::shm_unlink(native)?;
        Ok(())
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::{self, File, OpenOptions};
    use std::io;
    use std::path::PathBuf;

    fn backing_path(native: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fileops-shm-{}", native.trim_start_matches('/')))
    }

    pub(super) fn open(native: &str, exclusive: bool, _permissions: u32) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if exclusive {
            options.create_new(true);
        }
        options.open(backing_path(native))
    }

    pub(super) fn unlink(native: &str) -> io::Result<()> {
        fs::remove_file(backing_path(native))
    }
}
