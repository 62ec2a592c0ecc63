/*!
 * Growth Tests
 * In-place and copying growth, resize handlers, update handles and cross-unit refresh
 */

use pretty_assertions::assert_eq;
use shared_heap::memory::{HandleId, HeapResult, UpdateHandle};
use shared_heap::{Allocator, HeapAllocator32, HeapConfig, HeapError, Segment, SharedHeap, NULL};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn growable(bytes: usize) -> HeapAllocator32 {
    let config = HeapConfig::growable().with_grow_size(4096).with_seed(31);
    HeapAllocator32::new(Segment::new(bytes).unwrap(), config).unwrap()
}

fn counting_handle() -> (Arc<AtomicUsize>, UpdateHandle) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handle: UpdateHandle = Arc::new(move |_: &Arc<Segment>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (calls, handle)
}

#[test]
fn test_growth_preserves_data_and_addresses() {
    let mut heap = growable(4096);
    let access = heap.accessor();

    let blocks: Vec<_> = [100, 200, 300]
        .iter()
        .map(|size| heap.allocate(*size).unwrap())
        .collect();
    for (i, block) in blocks.iter().enumerate() {
        access.memset(*block, i as u8 + 1, heap.size_of(*block));
    }

    let old_length = heap.heap_length();
    let old_segment = Arc::clone(heap.segment());
    let big = heap.allocate(10_000).unwrap();

    assert!(heap.heap_length() >= old_length + 10_000);
    assert!(!Arc::ptr_eq(&old_segment, heap.segment()));
    assert!(big > blocks[2]);

    for (i, block) in blocks.iter().enumerate() {
        let size = heap.size_of(*block);
        let mut bytes = vec![0u8; size];
        access.read_bytes(*block, &mut bytes);
        assert!(bytes.iter().all(|b| *b == i as u8 + 1));
        assert!(heap.is_alloc(*block));
    }
    heap.check_integrity().unwrap();
}

#[test]
fn test_grown_tail_merges_back() {
    let mut heap = growable(4096);
    let blocks: Vec<_> = (0..8).map(|_| heap.allocate(1024).unwrap()).collect();

    for block in blocks {
        heap.free(block);
    }
    let report = heap.inspect().unwrap();
    assert_eq!(report.free_blocks(), 1);
    assert_eq!(report.used, 0);
}

#[test]
fn test_fixed_heap_does_not_grow() {
    let mut heap = HeapAllocator32::new(Segment::new(4096).unwrap(), HeapConfig::fixed()).unwrap();
    let length = heap.heap_length();

    assert_eq!(heap.malloc(10_000), NULL);
    assert_eq!(heap.heap_length(), length);
}

#[test]
fn test_growth_ceiling() {
    let config = HeapConfig::growable()
        .with_grow_size(4096)
        .with_max_heap_size(8192);
    let mut heap = HeapAllocator32::new(Segment::new(4096).unwrap(), config).unwrap();

    assert_eq!(heap.malloc(16 * 1024), NULL);
    assert!(matches!(
        heap.allocate(16 * 1024),
        Err(HeapError::GrowthRefused { max_heap_size: 8192, .. })
    ));
    assert_ne!(heap.malloc(2048), NULL);
}

#[test]
fn test_refused_growth_in_realloc_keeps_block() {
    let config = HeapConfig::growable()
        .with_grow_size(4096)
        .with_max_heap_size(8192);
    let mut heap = HeapAllocator32::new(Segment::new(4096).unwrap(), config).unwrap();
    let access = heap.accessor();

    let a = heap.malloc(128);
    access.memset(a, 0x3c, 128);

    assert_eq!(heap.realloc(a, 32 * 1024), NULL);
    assert!(heap.is_alloc(a));
    assert_eq!(heap.size_of(a), 128);
    let mut bytes = [0u8; 128];
    access.read_bytes(a, &mut bytes);
    assert_eq!(bytes, [0x3c; 128]);

    heap.free(a);
    assert_eq!(heap.inspect().unwrap().used, 0);
}

#[test]
fn test_resize_handler_supplies_segments() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut heap = growable(4096).with_resize_handler(
        move |current: &Arc<Segment>, required: usize| -> HeapResult<Arc<Segment>> {
            counter.fetch_add(1, Ordering::SeqCst);
            // hand out more than asked for
            Ok(Arc::new(current.grown(required + 4096)?))
        },
    );

    let a = heap.allocate(64).unwrap();
    let old_length = heap.heap_length();
    heap.allocate(8000).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(heap.heap_length() >= old_length + 8000 + 4096);
    assert!(heap.is_alloc(a));
    heap.check_integrity().unwrap();
}

#[test]
fn test_resize_handler_failure_is_exhaustion() {
    let mut heap = growable(4096).with_resize_handler(
        |_: &Arc<Segment>, _: usize| -> HeapResult<Arc<Segment>> {
            Err(HeapError::ResizeFailed("host refused".into()))
        },
    );
    let length = heap.heap_length();

    assert!(matches!(heap.allocate(10_000), Err(HeapError::ResizeFailed(_))));
    assert_eq!(heap.malloc(10_000), NULL);
    assert_eq!(heap.heap_length(), length);
    assert_ne!(heap.malloc(64), NULL);
    heap.check_integrity().unwrap();
}

#[test]
fn test_resize_handler_segments_are_validated() {
    // region moved to a different offset
    let mut moved = growable(4096).with_resize_handler(
        |_: &Arc<Segment>, required: usize| -> HeapResult<Arc<Segment>> {
            Ok(Arc::new(Segment::with_region(required + 64, 64, required)?))
        },
    );
    assert!(matches!(moved.allocate(10_000), Err(HeapError::ResizeFailed(_))));

    // right shape, but the heap contents were not carried over
    let mut blank = growable(4096).with_resize_handler(
        |_: &Arc<Segment>, required: usize| -> HeapResult<Arc<Segment>> {
            Ok(Arc::new(Segment::new(required)?))
        },
    );
    assert!(matches!(blank.allocate(10_000), Err(HeapError::ResizeFailed(_))));
    blank.check_integrity().unwrap();
}

#[test]
fn test_update_handles() {
    let mut heap = growable(4096);
    let (calls, handle) = counting_handle();

    let id: HandleId = heap.add_update_handle(Arc::clone(&handle));
    // registering the same handle twice keeps one entry
    assert_eq!(heap.add_update_handle(handle), id);

    heap.allocate(8000).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(heap.remove_update_handle(id));
    assert!(!heap.remove_update_handle(id));

    heap.allocate(8000).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_second_unit_refreshes_after_growth() {
    let shared = SharedHeap::new(Segment::reserved(4096, 64 * 1024).unwrap());
    let config = HeapConfig::growable().with_grow_size(4096);
    let mut first = HeapAllocator32::attach(Arc::clone(&shared), config.clone()).unwrap();
    let mut second = HeapAllocator32::attach(Arc::clone(&shared), config).unwrap();

    let (calls, handle) = counting_handle();
    second.add_update_handle(handle);
    let reader = second.accessor();

    let a = first.allocate(64).unwrap();
    first.accessor().memset(a, 0x5a, 64);
    first.allocate(8000).unwrap();

    // grown in place: one segment, but the second unit still has the old extent
    assert!(Arc::ptr_eq(first.segment(), &shared.segment()));
    assert!(Arc::ptr_eq(second.segment(), &shared.segment()));
    assert!(second.heap_length() < first.heap_length());

    // any locked operation picks up the longer region
    assert!(second.is_alloc(a));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.heap_length(), first.heap_length());

    let mut bytes = [0u8; 64];
    reader.read_bytes(a, &mut bytes);
    assert_eq!(bytes, [0x5a; 64]);

    second.free(a);
    assert!(!first.is_alloc(a));
    first.check_integrity().unwrap();
}

#[test]
fn test_writes_after_peer_growth_reach_every_unit() {
    let shared = SharedHeap::new(Segment::reserved(4096, 64 * 1024).unwrap());
    let config = HeapConfig::growable().with_grow_size(4096);
    let mut writer = HeapAllocator32::attach(Arc::clone(&shared), config.clone()).unwrap();
    let mut grower = HeapAllocator32::attach(Arc::clone(&shared), config).unwrap();

    let x = writer.allocate(16).unwrap();
    let access = writer.accessor();
    access.write(x, 0x11u8);

    grower.allocate(8000).unwrap();

    // no locked operation on the writer since the growth
    access.write(x, 0x22u8);
    assert_eq!(grower.accessor().read::<u8>(x), 0x22);
    assert_eq!(access.read::<u8>(x), 0x22);

    let mut byte = [0u8; 1];
    shared.segment().read_bytes(x, &mut byte);
    assert_eq!(byte[0], 0x22);
    grower.check_integrity().unwrap();
}

#[test]
fn test_shared_segment_without_room_is_not_copied() {
    let shared = SharedHeap::new(Segment::new(4096).unwrap());
    let config = HeapConfig::growable().with_grow_size(4096);
    let mut owner = HeapAllocator32::attach(Arc::clone(&shared), config.clone()).unwrap();
    let peer = HeapAllocator32::attach(Arc::clone(&shared), config).unwrap();
    let segment = shared.segment();

    assert!(matches!(
        owner.allocate(8000),
        Err(HeapError::ReservationExhausted { units: 2, .. })
    ));
    assert_eq!(owner.malloc(8000), NULL);
    assert!(Arc::ptr_eq(&segment, &shared.segment()));

    // alone on the heap, the owner may move it to a larger copy
    drop(peer);
    assert_ne!(owner.malloc(8000), NULL);
    assert!(!Arc::ptr_eq(&segment, &shared.segment()));
    owner.check_integrity().unwrap();
}

#[test]
fn test_heap_inside_larger_region() {
    let segment = Segment::with_region(16 * 1024, 256, 4096).unwrap();
    let config = HeapConfig::growable().with_grow_size(4096);
    let mut heap = HeapAllocator32::new(segment, config).unwrap();

    // scratch area (32 words) sits between the region start and the body
    assert_eq!(heap.heap_offset(), 256 + 128);
    let a = heap.allocate(16).unwrap();
    assert_eq!(a, heap.heap_offset() + 68 * 4);

    heap.allocate(8000).unwrap();
    assert_eq!(heap.geometry().byte_offset, 256);
    assert_eq!(heap.heap_offset(), 256 + 128);
    assert!(heap.is_alloc(a));
    heap.check_integrity().unwrap();
}
