/*!
 * Heap Diagnostics
 *
 * Structural integrity walk and heap inspection. Both walk every block, so
 * they are meant for debug builds, tests and tooling rather than the
 * allocation path.
 */

use super::engine::{is_free, next_block, node_height, node_next, read_footer, read_tag};
use super::types::{BlockRecord, HeapError, HeapResult, Inspection, ListNode};
use super::view::WordView;
use super::word::words_to_bytes;
use crate::core::limits::{
    FIRST_BLOCK_OFFSET_WORDS, HEADER_OFFSET_WORDS, MAX_HEIGHT, POINTER_OVERHEAD_WORDS,
};
use crate::core::types::{Address, WordIndex};

/// Walk every block and the level-0 list, reporting the first inconsistency
///
/// Checks header/footer agreement, node heights, forward pointers into used
/// blocks, missed coalescing, and free-list ordering.
pub fn check_list_integrity<V: WordView + ?Sized>(heap: &V) -> HeapResult<()> {
    let len = heap.len();
    let mut block = FIRST_BLOCK_OFFSET_WORDS;
    let mut previous_free: Option<WordIndex> = None;

    while block < len - 1 {
        let raw = heap.read(block - 1);
        let tag = read_tag(heap, block);

        if tag.size < POINTER_OVERHEAD_WORDS || block + tag.size >= len {
            return Err(HeapError::InvalidBlockSize { block, size: raw });
        }

        let footer = read_footer(heap, block, tag.size);
        if footer != raw {
            return Err(HeapError::CorruptBlock {
                block,
                header: raw,
                footer,
            });
        }

        if tag.free {
            check_free_node(heap, block, tag.size)?;
            if let Some(first) = previous_free {
                return Err(HeapError::Uncoalesced {
                    first,
                    second: block,
                });
            }
        }

        previous_free = tag.free.then_some(block);
        block = next_block(block, tag.size);
    }

    check_ordering(heap)
}

fn check_free_node<V: WordView + ?Sized>(heap: &V, block: WordIndex, size: usize) -> HeapResult<()> {
    let height = heap.read(block);
    if height < 1 || height as usize > MAX_HEIGHT || height as usize + POINTER_OVERHEAD_WORDS > size {
        return Err(HeapError::InvalidHeight {
            block,
            height,
            max: MAX_HEIGHT,
        });
    }

    for level in 0..height as usize {
        let pointer = node_next(heap, block, level);
        if pointer == HEADER_OFFSET_WORDS {
            continue;
        }
        if pointer < FIRST_BLOCK_OFFSET_WORDS || pointer >= heap.len() || !is_free(heap, pointer) {
            return Err(HeapError::DanglingFreePointer { block, pointer });
        }
    }
    Ok(())
}

fn check_ordering<V: WordView + ?Sized>(heap: &V) -> HeapResult<()> {
    let mut previous = (HEADER_OFFSET_WORDS, 0usize);
    let mut node = node_next(heap, HEADER_OFFSET_WORDS, 0);
    // a well formed list cannot have more nodes than the body has blocks
    let mut budget = heap.len() / (POINTER_OVERHEAD_WORDS + 1);

    while node != HEADER_OFFSET_WORDS {
        if budget == 0 || node < FIRST_BLOCK_OFFSET_WORDS || node >= heap.len() {
            return Err(HeapError::DanglingFreePointer {
                block: previous.0,
                pointer: node,
            });
        }
        budget -= 1;

        let size = read_tag(heap, node).size;
        if size < previous.1 {
            return Err(HeapError::UnorderedFreeList {
                block: node,
                size,
                previous_size: previous.1,
            });
        }
        previous = (node, size);
        node = node_next(heap, node, 0);
    }
    Ok(())
}

fn read_node<V: WordView + ?Sized>(heap: &V, block: WordIndex, heap_offset: Address) -> ListNode {
    let height = node_height(heap, block).min(MAX_HEIGHT);
    ListNode {
        block,
        offset: words_to_bytes::<V::Word>(block) + heap_offset,
        size: words_to_bytes::<V::Word>(read_tag(heap, block).size),
        height,
        pointers: (0..height).map(|level| node_next(heap, block, level)).collect(),
    }
}

/// Snapshot of the Header and every block, addresses relative to the segment
pub fn inspect<V: WordView + ?Sized>(heap: &V, heap_offset: Address) -> HeapResult<Inspection> {
    let len = heap.len();
    let header = read_node(heap, HEADER_OFFSET_WORDS, heap_offset);
    let mut blocks = vec![];
    let mut used = 0;
    let mut block = FIRST_BLOCK_OFFSET_WORDS;

    while block < len - 1 {
        let tag = read_tag(heap, block);
        if tag.size < POINTER_OVERHEAD_WORDS || block + tag.size >= len {
            return Err(HeapError::InvalidBlockSize {
                block,
                size: heap.read(block - 1),
            });
        }

        let offset = words_to_bytes::<V::Word>(block) + heap_offset;
        let size = words_to_bytes::<V::Word>(tag.size);
        if tag.free {
            blocks.push(BlockRecord::Free {
                block,
                offset,
                size,
                node: read_node(heap, block, heap_offset),
            });
        } else {
            used += size;
            blocks.push(BlockRecord::Used {
                block,
                offset,
                size,
            });
        }
        block = next_block(block, tag.size);
    }

    Ok(Inspection {
        header,
        blocks,
        total: words_to_bytes::<V::Word>(len),
        used,
    })
}
