//! Index from a mapping's base address to the resources needed to release it.

use crate::backend::MappedView;
use crate::errors::{FileOpsError, Result};
use crate::handle::NativeHandle;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Who is allowed to release a registered mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ownership {
    /// A live `MemoryMappedRegion` releases it.
    Region,
    /// Released through the pointer-only API.
    Caller,
}

pub(crate) struct MappingRecord {
    view: Box<dyn MappedView>,
    handle: Option<NativeHandle>,
    origin: String,
    ownership: Ownership,
}

impl MappingRecord {
    pub(crate) fn new(
        view: Box<dyn MappedView>,
        handle: Option<NativeHandle>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            view,
            handle,
            origin: origin.into(),
            ownership: Ownership::Region,
        }
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.view.as_ptr()
    }

    pub(crate) fn size(&self) -> usize {
        self.view.len()
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.view.is_writable()
    }

    fn flush(&self) -> Result<()> {
        self.view
            .flush()
            .map_err(|e| FileOpsError::from_io("flush", &self.origin, e))
    }

    /// Unmap the view, then close the handle if the mapping owns one.
    pub(crate) fn release(self) -> Result<()> {
        let MappingRecord {
            view,
            handle,
            origin,
            ..
        } = self;

        let unmapped = view.unmap();
        if let Some(mut handle) = handle {
            handle.close();
        }

        tracing::debug!(origin = %origin, "Released mapping");
        unmapped.map_err(|e| FileOpsError::from_io("unmap", origin, e))
    }
}

/// Process-local, subsystem-scoped map of live mappings.
///
/// Every operation takes the single registry lock, so a pointer registered
/// by a returned `map` call is visible to any later lookup on any thread.
#[derive(Default)]
pub(crate) struct MappedFileRegistry {
    entries: Mutex<HashMap<usize, MappingRecord>>,
}

impl MappedFileRegistry {
    fn entries(&self) -> MutexGuard<'_, HashMap<usize, MappingRecord>> {
        // Every critical section is a single map operation, so a poisoned
        // lock still guards a consistent map.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `record` under its base address.
    ///
    /// A duplicate address means a mapping was released behind the
    /// registry's back; the new record is released and an error returned.
    pub(crate) fn register(&self, record: MappingRecord) -> Result<NonNull<u8>> {
        let Some(base) = NonNull::new(record.base()) else {
            let origin = record.origin.clone();
            record.release()?;
            return Err(FileOpsError::MappingFailed {
                target: origin,
                source: io::Error::other("platform returned a null mapping"),
            });
        };

        let mut entries = self.entries();
        match entries.entry(base.as_ptr() as usize) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(base)
            }
            Entry::Occupied(_) => {
                drop(entries);
                debug_assert!(false, "mapping {base:p} registered twice");
                let origin = record.origin.clone();
                record.release()?;
                Err(FileOpsError::MappingFailed {
                    target: origin,
                    source: io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "address already registered",
                    ),
                })
            }
        }
    }

    /// Remove and return the record for `ptr` if `ownership` matches.
    pub(crate) fn lookup_and_remove(
        &self,
        ptr: *const u8,
        ownership: Ownership,
    ) -> Result<MappingRecord> {
        let mut entries = self.entries();
        match entries.entry(ptr as usize) {
            Entry::Occupied(entry) if entry.get().ownership == ownership => Ok(entry.remove()),
            _ => Err(FileOpsError::not_mapped(ptr)),
        }
    }

    /// Hand a region-owned mapping over to the pointer-only API.
    pub(crate) fn release_to_caller(&self, ptr: *const u8) -> Result<()> {
        let mut entries = self.entries();
        match entries.get_mut(&(ptr as usize)) {
            Some(record) if record.ownership == Ownership::Region => {
                record.ownership = Ownership::Caller;
                Ok(())
            }
            _ => Err(FileOpsError::not_mapped(ptr)),
        }
    }

    /// Flush the mapping at `ptr` while holding the lock, so it cannot be
    /// unmapped mid-flush.
    pub(crate) fn flush(&self, ptr: *const u8) -> Result<()> {
        let entries = self.entries();
        entries
            .get(&(ptr as usize))
            .ok_or_else(|| FileOpsError::not_mapped(ptr))?
            .flush()
    }

    /// Size of the mapping at `ptr`.
    pub(crate) fn size_of(&self, ptr: *const u8) -> Option<usize> {
        self.entries().get(&(ptr as usize)).map(MappingRecord::size)
    }

    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        self.entries().contains_key(&(ptr as usize))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    /// Remove every record, e.g. at subsystem shutdown.
    pub(crate) fn drain(&self) -> Vec<MappingRecord> {
        self.entries().drain().map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MappingBackend, PortableBackend, test_support};
    use crate::errors::ErrorKind;
    use crate::handle::FileAccess;
    use std::sync::Arc;
    use std::thread;

    fn record_for(file: &tempfile::NamedTempFile, len: usize) -> MappingRecord {
        let handle = test_support::open(file, FileAccess::ReadWrite);
        let view = PortableBackend.map(&handle, 0, len).unwrap();
        MappingRecord::new(view, Some(handle), file.path().display().to_string())
    }

    #[test]
    fn test_register_then_remove_leaves_registry_empty() {
        let file = test_support::file_with(&[7u8; 128]);
        let registry = MappedFileRegistry::default();

        let ptr = registry.register(record_for(&file, 128)).unwrap();
        assert!(registry.contains(ptr.as_ptr()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.size_of(ptr.as_ptr()), Some(128));

        let record = registry
            .lookup_and_remove(ptr.as_ptr(), Ownership::Region)
            .unwrap();
        record.release().unwrap();

        assert_eq!(registry.len(), 0);
        assert!(!registry.contains(ptr.as_ptr()));
    }

    #[test]
    fn test_second_remove_reports_not_mapped() {
        let file = test_support::file_with(&[1u8; 64]);
        let registry = MappedFileRegistry::default();
        let ptr = registry.register(record_for(&file, 64)).unwrap();

        registry
            .lookup_and_remove(ptr.as_ptr(), Ownership::Region)
            .unwrap()
            .release()
            .unwrap();

        let err = registry
            .lookup_and_remove(ptr.as_ptr(), Ownership::Region)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotMapped);
    }

    #[test]
    fn test_foreign_pointer_is_not_mapped() {
        let registry = MappedFileRegistry::default();
        let local = 0u8;

        let err = registry
            .lookup_and_remove(&local as *const u8, Ownership::Caller)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotMapped);
        assert_eq!(
            registry.flush(&local as *const u8).unwrap_err().kind(),
            ErrorKind::NotMapped
        );
    }

    #[test]
    fn test_ownership_guards_removal() {
        let file = test_support::file_with(&[0u8; 32]);
        let registry = MappedFileRegistry::default();
        let ptr = registry.register(record_for(&file, 32)).unwrap();

        assert!(
            registry
                .lookup_and_remove(ptr.as_ptr(), Ownership::Caller)
                .is_err(),
            "Pointer API must not release a region-owned mapping"
        );

        registry.release_to_caller(ptr.as_ptr()).unwrap();
        assert!(registry.release_to_caller(ptr.as_ptr()).is_err());

        registry
            .lookup_and_remove(ptr.as_ptr(), Ownership::Caller)
            .unwrap()
            .release()
            .unwrap();
    }

    #[test]
    fn test_release_closes_owned_handle() {
        let file = test_support::file_with(&[0u8; 16]);
        let record = record_for(&file, 16);
        assert!(record.handle.as_ref().is_some_and(NativeHandle::is_valid));
        record.release().unwrap();
    }

    #[test]
    fn test_concurrent_register_and_remove() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 25;

        let file = Arc::new(test_support::file_with(&[3u8; 4096]));
        let registry = Arc::new(MappedFileRegistry::default());

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let file = Arc::clone(&file);
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let ptr = registry.register(record_for(&file, 4096)).unwrap();
                        registry.flush(ptr.as_ptr()).unwrap();
                        registry
                            .lookup_and_remove(ptr.as_ptr(), Ownership::Region)
                            .unwrap()
                            .release()
                            .unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().expect("Registry worker panicked");
        }

        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_drain_returns_all_records() {
        let file = test_support::file_with(&[0u8; 256]);
        let registry = MappedFileRegistry::default();

        registry.register(record_for(&file, 256)).unwrap();
        registry.register(record_for(&file, 128)).unwrap();

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.len(), 0);

        for record in drained {
            record.release().unwrap();
        }
    }
}
