/*!
 * Property Tests
 * Random operation sequences checked against a model of live allocations
 */

use proptest::prelude::*;
use shared_heap::{HeapAccessor, HeapAllocator32, HeapConfig, Segment};

#[derive(Debug, Clone)]
enum Op {
    Malloc(usize),
    Calloc(usize, usize),
    Aligned(u32, usize),
    Realloc(usize, usize),
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..2048).prop_map(Op::Malloc),
        1 => (1usize..32, 1usize..64).prop_map(|(count, size)| Op::Calloc(count, size)),
        1 => (3u32..10, 0usize..512).prop_map(|(shift, size)| Op::Aligned(shift, size)),
        2 => (any::<usize>(), 0usize..4096).prop_map(|(pick, size)| Op::Realloc(pick, size)),
        3 => any::<usize>().prop_map(Op::Free),
    ]
}

/// A live allocation and the byte it was filled with
#[derive(Debug, Clone, Copy)]
struct Live {
    address: usize,
    size: usize,
    fill: u8,
}

fn check_contents(access: &HeapAccessor<i32>, live: &[Live]) {
    for block in live {
        let mut bytes = vec![0u8; block.size];
        access.read_bytes(block.address, &mut bytes);
        assert!(
            bytes.iter().all(|b| *b == block.fill),
            "contents of 0x{:x} changed",
            block.address
        );
    }
}

fn check_disjoint(live: &[Live]) {
    let mut spans: Vec<_> = live
        .iter()
        .filter(|block| block.size > 0)
        .map(|block| (block.address, block.address + block.size))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping blocks {pair:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_heap_stays_consistent(ops in prop::collection::vec(op(), 1..80), seed in any::<u64>()) {
        let config = HeapConfig::fixed().with_seed(seed);
        let mut heap = HeapAllocator32::new(Segment::new(256 * 1024).unwrap(), config).unwrap();
        let access = heap.accessor();
        let mut live: Vec<Live> = vec![];
        let mut next_fill = 1u8;

        for op in ops {
            let fill = next_fill;
            next_fill = next_fill.wrapping_add(1).max(1);

            match op {
                Op::Malloc(size) => {
                    if let Ok(address) = heap.allocate(size) {
                        prop_assert_eq!(address % 8, 0);
                        access.memset(address, fill, size);
                        live.push(Live { address, size, fill });
                    }
                }
                Op::Calloc(count, size) => {
                    if let Ok(address) = heap.zero_allocate(count, size) {
                        let mut bytes = vec![0xffu8; count * size];
                        access.read_bytes(address, &mut bytes);
                        prop_assert!(bytes.iter().all(|b| *b == 0));
                        access.memset(address, fill, count * size);
                        live.push(Live { address, size: count * size, fill });
                    }
                }
                Op::Aligned(shift, size) => {
                    let alignment = 1usize << shift;
                    if let Ok(address) = heap.aligned_allocate(alignment, size) {
                        prop_assert_eq!(address % alignment, 0);
                        if size > 0 {
                            access.memset(address, fill, size);
                        }
                        live.push(Live { address, size, fill });
                    }
                }
                Op::Realloc(pick, size) if !live.is_empty() => {
                    let index = pick % live.len();
                    let old = live[index];
                    match heap.resize(old.address, size) {
                        Ok(0) => {
                            prop_assert_eq!(size, 0);
                            live.swap_remove(index);
                        }
                        Ok(address) => {
                            let kept = old.size.min(size);
                            let mut bytes = vec![0u8; kept];
                            access.read_bytes(address, &mut bytes);
                            prop_assert!(bytes.iter().all(|b| *b == old.fill));
                            access.memset(address, old.fill, size);
                            live[index] = Live { address, size, fill: old.fill };
                        }
                        Err(_) => {
                            prop_assert!(heap.is_live(old.address));
                        }
                    }
                }
                Op::Free(pick) if !live.is_empty() => {
                    let block = live.swap_remove(pick % live.len());
                    heap.deallocate(block.address);
                }
                Op::Realloc(..) | Op::Free(_) => {}
            }

            heap.check_integrity().unwrap();
            check_disjoint(&live);
        }

        check_contents(&access, &live);
        for block in live {
            prop_assert!(heap.size_of(block.address) >= block.size);
            heap.deallocate(block.address);
        }
        let report = heap.inspect().unwrap();
        prop_assert_eq!(report.free_blocks(), 1);
        prop_assert_eq!(report.used, 0);
    }
}
