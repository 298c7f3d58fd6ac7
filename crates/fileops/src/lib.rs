//! Native file handles, memory-mapped regions and named shared-memory
//! segments behind one platform-neutral API.
//!
//! [`FileOps`] is the entry point. It owns the registry of live mappings, so
//! a mapping can be released from its base pointer alone
//! ([`FileOps::unmap`]), and the [`MappingBackend`] that performs the
//! platform calls.

pub mod backend;
pub mod config;
pub mod errors;
pub mod handle;
pub mod region;
mod registry;
pub mod shm;
mod subsystem;

pub use backend::{MappedView, MappingBackend, PortableBackend};
#[cfg(unix)]
pub use backend::PosixBackend;
pub use config::{BackendKind, FileOpsConfig};
pub use errors::{ErrorKind, FileOpsError, Result};
pub use handle::{FileAccess, FileMode, NativeHandle};
pub use region::{MappedPtr, MemoryMappedRegion};
pub use shm::{SegmentRole, SharedMemorySegment};
pub use subsystem::FileOps;
