/*!
 * Embedded Skip List
 * Header management, search, insert and remove
 */

use super::block::{read_tag, write_tag, BlockTag};
use super::FreeList;
use crate::core::limits::{
    FIRST_BLOCK_OFFSET_WORDS, HEADER_OFFSET_WORDS, HEADER_SIZE_WORDS, HEIGHT_OFFSET_WORDS,
    LEVEL_PROBABILITY, MAX_HEIGHT, NEXT_OFFSET_WORDS, POINTER_OVERHEAD_WORDS,
};
use crate::core::types::WordIndex;
use crate::memory::types::{HeapError, HeapResult};
use crate::memory::view::WordView;
use rand::Rng;

const HEADER: WordIndex = HEADER_OFFSET_WORDS;

#[inline]
pub fn node_height<V: WordView + ?Sized>(heap: &V, node: WordIndex) -> usize {
    heap.read(node + HEIGHT_OFFSET_WORDS).max(0) as usize
}

/// Forward pointer of `node` on `level`
#[inline]
pub fn node_next<V: WordView + ?Sized>(heap: &V, node: WordIndex, level: usize) -> WordIndex {
    heap.read(node + NEXT_OFFSET_WORDS + level).max(0) as usize
}

#[inline]
fn set_next<V: WordView + ?Sized>(heap: &V, node: WordIndex, level: usize, target: WordIndex) {
    heap.write(node + NEXT_OFFSET_WORDS + level, target as isize);
}

/// Number of active levels
#[inline]
pub fn list_height<V: WordView + ?Sized>(heap: &V) -> usize {
    node_height(heap, HEADER)
}

/// Whether the body already carries a Header
pub fn verify_header<V: WordView + ?Sized>(heap: &V) -> bool {
    heap.len() > HEADER + HEADER_SIZE_WORDS
        && heap.read(HEADER - 1) == HEADER_SIZE_WORDS as isize
        && heap.read(HEADER + HEADER_SIZE_WORDS) == HEADER_SIZE_WORDS as isize
}

/// Header plus one free block spanning the rest of the body
fn write_initial_header<V: WordView + ?Sized>(heap: &V) {
    let block = FIRST_BLOCK_OFFSET_WORDS;
    let size = heap.len() - (FIRST_BLOCK_OFFSET_WORDS + 1);

    write_tag(heap, HEADER, BlockTag::free(HEADER_SIZE_WORDS));
    heap.write(HEADER + HEIGHT_OFFSET_WORDS, 1);
    set_next(heap, HEADER, 0, block);
    for level in 1..MAX_HEIGHT {
        set_next(heap, HEADER, level, HEADER);
    }

    write_tag(heap, block, BlockTag::free(size));
    heap.write(block + HEIGHT_OFFSET_WORDS, 1);
    set_next(heap, block, 0, HEADER);
}

/// Reset the scratch array and make sure the body has a Header
///
/// Returns `true` when a fresh heap was written, `false` when an existing
/// Header was found and kept.
pub fn prepare<V: WordView + ?Sized>(heap: &V, updates: &V) -> bool {
    updates.fill(0, MAX_HEIGHT, HEADER as isize);
    if verify_header(heap) {
        return false;
    }
    write_initial_header(heap);
    true
}

/// Smallest free block of at least `min` words, or `HEADER` when none fits
pub fn find_free_block<V: WordView + ?Sized>(heap: &V, min: usize) -> WordIndex {
    let mut node = HEADER;

    for level in (0..list_height(heap)).rev() {
        let mut next = node_next(heap, node, level);
        while next != HEADER && read_tag(heap, next).size < min {
            node = next;
            next = node_next(heap, node, level);
        }
    }

    node_next(heap, node, 0)
}

/// Whether `block` lies outside every free block
///
/// Linear in the number of free blocks.
pub fn is_live<V: WordView + ?Sized>(heap: &V, block: WordIndex) -> bool {
    let mut next = node_next(heap, HEADER, 0);
    while next >= FIRST_BLOCK_OFFSET_WORDS && next < heap.len() {
        let size = read_tag(heap, next).size;
        if block >= next && block < next + size {
            return false;
        }
        next = node_next(heap, next, 0);
    }
    true
}

impl<V: WordView + ?Sized, R: Rng + ?Sized> FreeList<'_, V, R> {
    #[inline]
    fn update(&self, level: usize) -> WordIndex {
        self.updates.read(level).max(0) as usize
    }

    /// Record, per level, the last node whose size is below `min`
    pub fn find_predecessors(&mut self, min: usize) {
        let heap = self.heap;
        let mut node = HEADER;

        for level in (0..list_height(heap)).rev() {
            loop {
                let next = node_next(heap, node, level);
                if next >= FIRST_BLOCK_OFFSET_WORDS && heap.read(next - 1) < min as isize {
                    node = next;
                } else {
                    break;
                }
            }
            self.updates.write(level, node as isize);
        }
    }

    /// Unlink a free block and mark it used
    pub fn remove(&mut self, block: WordIndex, size: usize) -> HeapResult<()> {
        let heap = self.heap;
        self.find_predecessors(size);

        // Equal-size nodes may precede the target; step over them and take the
        // last one pointing at the target on each of its levels.
        let mut node = node_next(heap, self.update(0), 0);
        while node != block && node != HEADER && heap.read(node - 1) <= size as isize {
            for level in (0..node_height(heap, node)).rev() {
                if node_next(heap, node, level) == block {
                    self.updates.write(level, node as isize);
                }
            }
            node = node_next(heap, node, 0);
        }

        if node != block {
            return Err(HeapError::MissingFreeBlock { block, size });
        }

        let mut height = list_height(heap);
        for level in 0..height {
            let predecessor = self.update(level);
            if node_next(heap, predecessor, level) != block {
                break;
            }
            set_next(heap, predecessor, level, node_next(heap, block, level));
        }

        while height > 0 && node_next(heap, HEADER, height - 1) == HEADER {
            height -= 1;
            heap.write(HEADER + HEIGHT_OFFSET_WORDS, height as isize);
        }

        write_tag(heap, block, BlockTag::used(size));
        Ok(())
    }

    /// Link `block` into the free list and mark it free (no coalescing)
    pub fn insert(&mut self, block: WordIndex, size: usize) {
        let heap = self.heap;
        self.find_predecessors(size);
        let height = self.generate_height(block, size);

        for level in 0..height {
            let predecessor = self.update(level);
            set_next(heap, block, level, node_next(heap, predecessor, level));
            set_next(heap, predecessor, level, block);
            self.updates.write(level, HEADER as isize);
        }

        write_tag(heap, block, BlockTag::free(size));
    }

    /// Draw the node height for `block`, raising the list by at most one level
    fn generate_height(&mut self, block: WordIndex, size: usize) -> usize {
        let heap = self.heap;
        let current = list_height(heap);

        let mut height = 1;
        while height < MAX_HEIGHT && self.rng.gen_bool(LEVEL_PROBABILITY) {
            height += 1;
        }
        // keep every forward pointer inside the payload
        if size < height + POINTER_OVERHEAD_WORDS {
            height = size.saturating_sub(POINTER_OVERHEAD_WORDS).max(1);
        }

        if height > current {
            let raised = current + 1;
            heap.write(HEADER + HEIGHT_OFFSET_WORDS, raised as isize);
            set_next(heap, HEADER, raised - 1, HEADER);
            self.updates.write(raised - 1, HEADER as isize);
            heap.write(block + HEIGHT_OFFSET_WORDS, raised as isize);
            return raised;
        }

        heap.write(block + HEIGHT_OFFSET_WORDS, height as isize);
        height
    }
}
