use crate::backend::MappingBackend;
use crate::config::FileOpsConfig;
use crate::errors::{FileOpsError, Result};
use crate::handle::{FileAccess, FileMode, NativeHandle};
use crate::region::{MappedPtr, MemoryMappedRegion};
use crate::registry::{MappedFileRegistry, Ownership};
use crate::shm::{self, SharedMemorySegment};
use std::path::Path;
use std::sync::Arc;

/// State shared by a [`FileOps`] instance and every region it creates.
pub(crate) struct Subsystem {
    pub(crate) registry: MappedFileRegistry,
    pub(crate) backend: Box<dyn MappingBackend>,
    pub(crate) config: FileOpsConfig,
}

impl Drop for Subsystem {
    fn drop(&mut self) {
        let leaked = self.registry.drain();
        if leaked.is_empty() {
            return;
        }

        tracing::warn!(
            count = leaked.len(),
            "Releasing mappings that were never unmapped"
        );
        for record in leaked {
            if let Err(e) = record.release() {
                tracing::warn!(error = %e, "Failed to release leaked mapping");
            }
        }
    }
}

/// Entry point of the file and mapping layer.
///
/// Owns the registry of live mappings and the platform backend. Cloning is
/// cheap and shares both. Mappings still registered when the last clone and
/// the last region are dropped are released at that point, so pointers from
/// [`FileOps::map_file`] and [`FileOps::map_shared_memory`] must not outlive
/// the instance that produced them.
#[derive(Clone)]
pub struct FileOps {
    inner: Arc<Subsystem>,
}

impl std::fmt::Debug for FileOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOps")
            .field("backend", &self.inner.backend.name())
            .field("config", &self.inner.config)
            .field("live_mappings", &self.live_mappings())
            .finish()
    }
}

impl Default for FileOps {
    fn default() -> Self {
        Self::new()
    }
}

impl FileOps {
    /// Subsystem with platform defaults.
    pub fn new() -> Self {
        Self::with_config(FileOpsConfig::default())
    }

    /// Subsystem configured from `FILEOPS_*` environment variables.
    pub fn from_env() -> Self {
        Self::with_config(FileOpsConfig::from_env())
    }

    pub fn with_config(config: FileOpsConfig) -> Self {
        let backend = config.backend.instantiate();
        Self::build(backend, config)
    }

    /// Subsystem driving a caller-supplied backend.
    pub fn with_backend(backend: impl MappingBackend + 'static) -> Self {
        Self::build(Box::new(backend), FileOpsConfig::default())
    }

    fn build(backend: Box<dyn MappingBackend>, config: FileOpsConfig) -> Self {
        tracing::debug!(backend = backend.name(), "Initialising file operations");
        Self {
            inner: Arc::new(Subsystem {
                registry: MappedFileRegistry::default(),
                backend,
                config,
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn config(&self) -> &FileOpsConfig {
        &self.inner.config
    }

    /// Open `path` through the backend using the configured file permissions.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        access: FileAccess,
        mode: FileMode,
    ) -> Result<NativeHandle> {
        self.inner.backend.open(
            path.as_ref(),
            access,
            mode,
            self.inner.config.file_permissions,
        )
    }

    /// An empty region bound to this subsystem.
    pub fn region(&self) -> MemoryMappedRegion {
        MemoryMappedRegion::new(Arc::clone(&self.inner))
    }

    /// Map `size` bytes of `handle` at `offset` into a new region.
    pub fn map_region(
        &self,
        handle: &NativeHandle,
        offset: u64,
        size: usize,
    ) -> Result<MemoryMappedRegion> {
        let mut region = self.region();
        region.map(handle, offset, size)?;
        Ok(region)
    }

    /// Map an entire existing file read-only.
    ///
    /// The file is kept open until [`FileOps::unmap`] releases the mapping.
    pub fn map_file(&self, path: impl AsRef<Path>) -> Result<MappedPtr> {
        let path = path.as_ref();
        let handle = self.open(path, FileAccess::Read, FileMode::OpenExisting)?;

        let len = handle.file_len()?;
        let size = usize::try_from(len).map_err(|_| {
            FileOpsError::invalid_size(
                path.display(),
                format!("{len} bytes exceeds the address space"),
            )
        })?;

        let mut region = self.region();
        region.map_owned(handle, 0, size)?;
        region.into_raw()
    }

    /// Release a mapping given only its base pointer.
    ///
    /// Fails with `NotMapped` for pointers this instance never returned,
    /// pointers already unmapped, and pointers owned by a live region.
    pub fn unmap(&self, ptr: *const u8) -> Result<()> {
        self.inner
            .registry
            .lookup_and_remove(ptr, Ownership::Caller)?
            .release()?;

        tracing::debug!(ptr = ?ptr, "Unmapped by pointer");
        Ok(())
    }

    /// Flush the mapping whose base pointer is `ptr`.
    pub fn flush(&self, ptr: *const u8) -> Result<()> {
        self.inner.registry.flush(ptr)
    }

    /// Whether `ptr` is the base of a live mapping.
    pub fn is_mapped(&self, ptr: *const u8) -> bool {
        self.inner.registry.contains(ptr)
    }

    /// Length of the live mapping at `ptr`.
    pub fn mapping_len(&self, ptr: *const u8) -> Option<usize> {
        self.inner.registry.size_of(ptr)
    }

    pub fn live_mappings(&self) -> usize {
        self.inner.registry.len()
    }

    /// Create (`is_owner`) or attach to the named segment and map it.
    ///
    /// An owner reopening an existing name resizes it to `size`, even while
    /// other mappings are attached. Shrinking leaves those mappings with
    /// their old length but only the new length backed: touching bytes past
    /// the new end raises `SIGBUS` on unix.
    pub fn open_or_create(
        &self,
        name: &str,
        size: usize,
        is_owner: bool,
    ) -> Result<SharedMemorySegment> {
        shm::open_or_create(&self.inner, name, size, is_owner)
    }

    /// Pointer-only variant of [`FileOps::open_or_create`].
    pub fn map_shared_memory(&self, name: &str, size: usize, is_owner: bool) -> Result<MappedPtr> {
        self.open_or_create(name, size, is_owner)?.into_raw()
    }

    /// Remove the segment name. Existing mappings stay valid.
    pub fn unlink_shared_memory(&self, name: &str) -> Result<()> {
        shm::unlink(name)
    }
}
