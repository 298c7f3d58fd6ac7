use fileops::{ErrorKind, FileOps, PortableBackend, SegmentRole};
use std::thread;

fn segment_name(tag: &str) -> String {
    format!("fileops-it-{tag}-{}", std::process::id())
}

/// Owner and attacher see each other's writes at the same offset
#[test]
fn test_owner_writes_visible_to_attacher() {
    common::init_test_logging();
    let ops = FileOps::new();
    let name = segment_name("seg1");

    let mut owner = ops.open_or_create(&name, 4096, true).unwrap();
    let mut attacher = ops.open_or_create(&name, 4096, false).unwrap();

    owner.as_mut_slice()[..4].copy_from_slice(b"ping");
    assert_eq!(&attacher.as_slice()[..4], b"ping");

    attacher.as_mut_slice()[4000..4004].copy_from_slice(b"pong");
    assert_eq!(&owner.as_slice()[4000..4004], b"pong");

    drop(attacher);
    drop(owner);
    ops.unlink_shared_memory(&name).unwrap();
}

/// Unlink stops future attaches but leaves live mappings usable
#[test]
fn test_unlink_keeps_existing_mappings_alive() {
    common::init_test_logging();
    let ops = FileOps::new();
    let name = segment_name("unlinked");

    let mut owner = ops.open_or_create(&name, 4096, true).unwrap();
    let attacher = ops.open_or_create(&name, 4096, false).unwrap();

    ops.unlink_shared_memory(&name).unwrap();

    let err = ops.open_or_create(&name, 4096, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SegmentNotFound);

    owner.as_mut_slice()[0] = 42;
    assert_eq!(attacher.as_slice()[0], 42, "Old binding must keep working");

    owner.unmap().unwrap();
    assert!(!owner.is_valid());
    assert_eq!(attacher.as_slice()[0], 42);
}

#[test]
fn test_attach_without_owner_fails() {
    let ops = FileOps::new();
    let err = ops
        .open_or_create(&segment_name("orphan"), 4096, false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SegmentNotFound);
    assert_eq!(ops.live_mappings(), 0);
}

#[test]
fn test_pointer_api_for_shared_memory() {
    common::init_test_logging();
    let ops = FileOps::with_backend(PortableBackend);
    let name = segment_name("pointer");

    let owner = ops.map_shared_memory(&name, 8192, true).unwrap();
    let attacher = ops.map_shared_memory(&name, 8192, false).unwrap();
    assert_eq!(ops.live_mappings(), 2);

    unsafe { owner.as_mut_slice()[8191] = 7 };
    assert_eq!(unsafe { attacher.as_slice()[8191] }, 7);

    ops.unmap(owner.as_ptr()).unwrap();
    ops.unmap(attacher.as_ptr()).unwrap();
    assert_eq!(ops.live_mappings(), 0);

    ops.unlink_shared_memory(&name).unwrap();
}

#[test]
fn test_segment_metadata() {
    let ops = FileOps::new();
    let name = segment_name("meta");

    let segment = ops.open_or_create(&name, 4096, true).unwrap();
    assert_eq!(segment.role(), SegmentRole::Owner);
    assert_eq!(segment.len(), 4096);
    assert!(segment.name().starts_with('/'));
    assert!(segment.name().ends_with(&name));
    segment.flush().unwrap();

    let region = segment.into_region();
    assert!(region.is_valid());
    drop(region);

    ops.unlink_shared_memory(&name).unwrap();
}

/// Disjoint segment names created, attached and unlinked concurrently
#[test]
fn test_concurrent_segments_with_disjoint_names() {
    const THREADS: usize = 6;

    common::init_test_logging();
    let ops = FileOps::new();

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let ops = ops.clone();
            thread::spawn(move || {
                let name = segment_name(&format!("worker{worker}"));
                let mut owner = ops.open_or_create(&name, 4096, true).unwrap();
                let attacher = ops.open_or_create(&name, 4096, false).unwrap();

                owner.as_mut_slice()[worker] = worker as u8 + 1;
                assert_eq!(attacher.as_slice()[worker], worker as u8 + 1);

                drop(attacher);
                drop(owner);
                ops.unlink_shared_memory(&name).unwrap();
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("Segment worker panicked");
    }

    assert_eq!(ops.live_mappings(), 0);
}
