/*!
 * Coalescing Tests
 * Free-block merging, best-fit selection and inspection
 */

use pretty_assertions::assert_eq;
use shared_heap::memory::{BlockRecord, Inspection};
use shared_heap::{HeapAllocator32, HeapConfig, Segment};

/// (offset, size, free) per block; node heights are random and left out
fn layout(report: &Inspection) -> Vec<(usize, usize, bool)> {
    report
        .blocks
        .iter()
        .map(|block| (block.offset(), block.size(), block.is_free()))
        .collect()
}

fn heap() -> HeapAllocator32 {
    HeapAllocator32::new(Segment::new(64 * 1024).unwrap(), HeapConfig::fixed().with_seed(23)).unwrap()
}

#[test]
fn test_freeing_everything_restores_initial_block() {
    let mut heap = heap();
    let initial = heap.inspect().unwrap();
    assert_eq!(initial.free_blocks(), 1);

    let blocks: Vec<_> = [48, 16, 200, 8, 1024, 72, 16, 512, 96, 40]
        .iter()
        .map(|size| heap.allocate(*size).unwrap())
        .collect();

    for index in [3, 7, 0, 9, 1, 5, 2, 8, 4, 6] {
        heap.deallocate(blocks[index]);
        assert!(!heap.inspect().unwrap().has_adjacent_free());
    }

    assert_eq!(layout(&heap.inspect().unwrap()), layout(&initial));
}

#[test]
fn test_merge_with_both_neighbours() {
    let mut heap = heap();
    let a = heap.allocate(32).unwrap();
    let b = heap.allocate(32).unwrap();
    let c = heap.allocate(32).unwrap();
    let _guard = heap.allocate(32).unwrap();

    heap.deallocate(a);
    heap.deallocate(c);
    assert_eq!(heap.inspect().unwrap().free_blocks(), 3);

    heap.deallocate(b);
    let report = heap.inspect().unwrap();
    assert_eq!(report.free_blocks(), 2);

    let merged = report.blocks.iter().find(|block| block.offset() == a).unwrap();
    assert!(merged.is_free());
    // three payloads plus the two tag pairs swallowed between them
    assert_eq!(merged.size(), 3 * 32 + 2 * 8);
}

#[test]
fn test_best_fit_picks_smallest_sufficient_block() {
    let mut heap = heap();
    let a = heap.allocate(64).unwrap();
    heap.allocate(16).unwrap();
    let b = heap.allocate(256).unwrap();
    heap.allocate(16).unwrap();
    let c = heap.allocate(128).unwrap();
    heap.allocate(16).unwrap();

    heap.deallocate(a);
    heap.deallocate(b);
    heap.deallocate(c);

    assert_eq!(heap.allocate(100).unwrap(), c);
    assert_eq!(heap.allocate(200).unwrap(), b);
    assert_eq!(heap.allocate(60).unwrap(), a);
    heap.check_integrity().unwrap();
}

#[test]
fn test_small_remainder_is_not_split_off() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap();
    heap.allocate(16).unwrap();
    heap.deallocate(a);

    // 40 bytes free, 32 requested: an 8 byte remainder cannot hold a block
    assert_eq!(heap.allocate(32).unwrap(), a);
    assert_eq!(heap.size_of(a), 40);
}

#[test]
fn test_inspection_reports_layout() {
    let mut heap = heap();
    let a = heap.allocate(24).unwrap();
    let b = heap.allocate(80).unwrap();
    heap.deallocate(a);

    let report = heap.inspect().unwrap();
    assert_eq!(report.used, 80);
    assert_eq!(report.used_blocks(), 1);
    assert_eq!(report.total, heap.heap_length());
    assert_eq!(report.header.height, report.header.pointers.len());

    match &report.blocks[0] {
        BlockRecord::Free { offset, size, node, .. } => {
            assert_eq!(*offset, a);
            assert_eq!(*size, 24);
            assert!(node.height >= 1);
        }
        other => panic!("expected a free block, got {other:?}"),
    }
    assert!(matches!(report.blocks[1], BlockRecord::Used { offset, size: 80, .. } if offset == b));

    let json = report.to_json().unwrap();
    assert!(json.contains(r#""type": "free""#));
    assert!(json.contains(r#""type": "used""#));
}
