/*!
 * Allocation Tests
 * malloc / calloc / realloc / free semantics on a fixed heap
 */

use pretty_assertions::assert_eq;
use shared_heap::memory::{DoubleFreePolicy, HeapAllocator64, HeapError};
use shared_heap::{Allocator, HeapAllocator32, HeapConfig, Segment, NULL};

fn fixed_heap(bytes: usize) -> HeapAllocator32 {
    HeapAllocator32::new(Segment::new(bytes).unwrap(), HeapConfig::fixed().with_seed(11)).unwrap()
}

#[test]
fn test_first_allocation_follows_header() {
    let mut heap = fixed_heap(64 * 1024);
    let address = heap.allocate(32).unwrap();

    // 68 words of Header and tags precede the first payload
    assert_eq!(address, heap.heap_offset() + 68 * 4);
}

#[test]
fn test_addresses_are_aligned_and_disjoint() {
    let mut heap = fixed_heap(64 * 1024);
    let mut blocks: Vec<_> = [1, 7, 8, 9, 100, 1000, 3]
        .iter()
        .map(|size| heap.allocate(*size).unwrap())
        .collect();

    blocks.sort_unstable();
    for pair in blocks.windows(2) {
        assert_eq!(pair[0] % 8, 0);
        assert!(pair[0] + heap.size_of(pair[0]) + 8 <= pair[1]);
    }
    heap.check_integrity().unwrap();
}

#[test]
fn test_size_of_rounds_to_alignment() {
    let mut heap = fixed_heap(64 * 1024);

    let tiny = heap.allocate(1).unwrap();
    let odd = heap.allocate(17).unwrap();
    let exact = heap.allocate(24).unwrap();

    assert_eq!(heap.size_of(tiny), 16);
    assert_eq!(heap.size_of(odd), 24);
    assert_eq!(heap.size_of(exact), 24);
    assert_eq!(heap.size_of(NULL), 0);
}

#[test]
fn test_exhaustion_returns_null_and_heap_stays_usable() {
    let mut heap = fixed_heap(4096);

    assert_eq!(heap.malloc(8192), NULL);
    assert!(matches!(heap.allocate(8192), Err(HeapError::OutOfMemory { .. })));

    let mut live = vec![];
    let err = loop {
        match heap.allocate(64) {
            Ok(address) => live.push(address),
            Err(err) => break err,
        }
    };
    assert!(err.is_exhaustion());
    assert!(!live.is_empty());

    for address in live {
        heap.deallocate(address);
    }
    let report = heap.inspect().unwrap();
    assert_eq!(report.free_blocks(), 1);
    assert_eq!(report.used, 0);
    assert_ne!(heap.malloc(2048), NULL);
}

#[test]
fn test_calloc_zeroes_recycled_memory() {
    let mut heap = fixed_heap(64 * 1024);
    let access = heap.accessor();

    let dirty = heap.allocate(64).unwrap();
    access.memset(dirty, 0xab, 64);
    heap.deallocate(dirty);

    let clean = heap.calloc(8, 8);
    assert_eq!(clean, dirty);

    let mut bytes = [0xffu8; 64];
    access.read_bytes(clean, &mut bytes);
    assert_eq!(bytes, [0u8; 64]);
}

#[test]
fn test_calloc_overflow() {
    let mut heap = fixed_heap(4096);

    assert_eq!(heap.calloc(usize::MAX, 2), NULL);
    assert!(matches!(
        heap.zero_allocate(usize::MAX, 2),
        Err(HeapError::SizeOverflow { .. })
    ));
}

#[test]
fn test_realloc_semantics() {
    let mut heap = fixed_heap(64 * 1024);
    let access = heap.accessor();

    let a = heap.realloc(NULL, 32);
    assert_ne!(a, NULL);
    let pattern: Vec<u8> = (1..=32).collect();
    access.write_bytes(a, &pattern);

    // shrinking keeps the block
    assert_eq!(heap.realloc(a, 16), a);

    // a neighbour stops in-place reuse, so growing moves the data
    let guard = heap.allocate(16).unwrap();
    let b = heap.realloc(a, 256);
    assert_ne!(b, a);
    assert!(heap.size_of(b) >= 256);
    assert!(!heap.is_alloc(a));

    let mut moved = [0u8; 32];
    access.read_bytes(b, &mut moved);
    assert_eq!(moved.to_vec(), pattern);

    assert_eq!(heap.realloc(b, 0), NULL);
    assert!(!heap.is_alloc(b));
    assert!(heap.is_alloc(guard));
    heap.check_integrity().unwrap();
}

#[test]
fn test_failed_realloc_keeps_original() {
    let mut heap = fixed_heap(4096);
    let a = heap.allocate(64).unwrap();

    assert_eq!(heap.realloc(a, 1 << 20), NULL);
    assert!(heap.is_alloc(a));
    assert_eq!(heap.size_of(a), 64);
}

#[test]
fn test_free_null_is_noop() {
    let mut heap = fixed_heap(4096);
    let before = heap.inspect().unwrap();

    heap.free(NULL);
    assert_eq!(heap.inspect().unwrap(), before);
}

#[test]
fn test_double_free_is_ignored_by_default() {
    let mut heap = fixed_heap(64 * 1024);
    let a = heap.allocate(32).unwrap();
    let b = heap.allocate(32).unwrap();
    let c = heap.allocate(32).unwrap();

    heap.free(b);
    heap.free(b);

    // `b` merged into the free block before it
    heap.free(a);
    heap.free(a);
    heap.free(b);

    assert!(heap.is_alloc(c));
    heap.check_integrity().unwrap();
}

#[test]
#[should_panic(expected = "Double free")]
fn test_double_free_fatal_policy() {
    let config = HeapConfig::fixed().with_double_free(DoubleFreePolicy::Fatal);
    let mut heap = HeapAllocator32::new(Segment::new(4096).unwrap(), config).unwrap();
    let a = heap.allocate(32).unwrap();

    heap.free(a);
    heap.free(a);
}

#[test]
#[should_panic(expected = "outside the heap body")]
fn test_foreign_address_is_fatal() {
    let mut heap = fixed_heap(4096);
    heap.free(8);
}

#[test]
#[should_panic(expected = "is not a multiple of 8")]
fn test_misaligned_address_is_fatal() {
    let mut heap = fixed_heap(4096);
    let a = heap.allocate(32).unwrap();
    heap.free(a + 4);
}

#[test]
fn test_is_alloc() {
    let mut heap = fixed_heap(4096);
    let a = heap.allocate(32).unwrap();

    assert!(heap.is_alloc(a));
    assert!(heap.is_alloc(a + 16));
    assert!(!heap.is_alloc(NULL));
    assert!(!heap.is_alloc(usize::MAX / 2));

    heap.free(a);
    assert!(!heap.is_alloc(a));
}

#[test]
fn test_allocator_trait_object() {
    fn churn(allocator: &mut dyn Allocator<Memory = Segment>) -> usize {
        let blocks: Vec<_> = (1..=16).map(|i| allocator.malloc(i * 24)).collect();
        let live = blocks.iter().filter(|b| **b != NULL).count();
        for block in blocks {
            allocator.free(block);
        }
        live
    }

    let mut heap = fixed_heap(64 * 1024);
    assert_eq!(churn(&mut heap), 16);
    assert_eq!(heap.inspect().unwrap().free_blocks(), 1);
}

#[test]
fn test_wide_words() {
    let mut heap =
        HeapAllocator64::new(Segment::new(64 * 1024).unwrap(), HeapConfig::fixed()).unwrap();

    let a = heap.allocate(1).unwrap();
    let b = heap.allocate(40).unwrap();
    assert_eq!(a % 16, 0);
    assert_eq!(b % 16, 0);
    assert_eq!(heap.size_of(a), 32);
    assert_eq!(heap.size_of(b), 48);

    heap.free(a);
    heap.free(b);
    assert_eq!(heap.inspect().unwrap().free_blocks(), 1);
}
