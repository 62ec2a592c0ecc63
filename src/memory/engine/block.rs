/*!
 * Block Layout
 *
 * A block is a payload of `n` words with a size word on each side. The sign of
 * the size word is the allocation state: positive is free, negative is used.
 * Everything here works in word indices relative to the heap body; a block is
 * named by the index of its first payload word.
 */

use super::super::view::WordView;
use crate::core::limits::{
    FIRST_BLOCK_OFFSET_WORDS, HEADER_SIZE_WORDS, POINTER_OVERHEAD_WORDS,
};
use crate::core::types::WordIndex;

/// Decoded size word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTag {
    /// Payload length in words
    pub size: usize,
    pub free: bool,
}

impl BlockTag {
    pub const fn free(size: usize) -> Self {
        Self { size, free: true }
    }

    pub const fn used(size: usize) -> Self {
        Self { size, free: false }
    }

    #[inline]
    pub fn decode(raw: isize) -> Self {
        Self {
            size: raw.unsigned_abs(),
            free: raw > 0,
        }
    }

    #[inline]
    pub fn encode(self) -> isize {
        let size = self.size as isize;
        if self.free {
            size
        } else {
            -size
        }
    }
}

/// Index of the block physically following `block`
#[inline]
pub fn next_block(block: WordIndex, size: usize) -> WordIndex {
    block + size + POINTER_OVERHEAD_WORDS
}

/// Tag stored in the header word
#[inline]
pub fn read_tag<V: WordView + ?Sized>(heap: &V, block: WordIndex) -> BlockTag {
    BlockTag::decode(heap.read(block - 1))
}

/// Raw footer word of a block whose header says `size`
#[inline]
pub fn read_footer<V: WordView + ?Sized>(heap: &V, block: WordIndex, size: usize) -> isize {
    heap.read(block + size)
}

#[inline]
pub fn block_size<V: WordView + ?Sized>(heap: &V, block: WordIndex) -> usize {
    read_tag(heap, block).size
}

/// Write `tag` to both the header and the footer of `block`
#[inline]
pub fn write_tag<V: WordView + ?Sized>(heap: &V, block: WordIndex, tag: BlockTag) {
    let raw = tag.encode();
    heap.write(block - 1, raw);
    heap.write(block + tag.size, raw);
}

#[inline]
pub fn is_free<V: WordView + ?Sized>(heap: &V, block: WordIndex) -> bool {
    block >= HEADER_SIZE_WORDS && read_tag(heap, block).free
}

/// Free block physically preceding `block`, if any
pub fn free_block_before<V: WordView + ?Sized>(heap: &V, block: WordIndex) -> Option<WordIndex> {
    if block <= FIRST_BLOCK_OFFSET_WORDS {
        return None;
    }
    let before = heap.read(block - POINTER_OVERHEAD_WORDS);
    if before < POINTER_OVERHEAD_WORDS as isize {
        return None;
    }
    block.checked_sub(POINTER_OVERHEAD_WORDS + before as usize)
}

/// Free block physically following `block`, if any
pub fn free_block_after<V: WordView + ?Sized>(heap: &V, block: WordIndex) -> Option<WordIndex> {
    let next = next_block(block, block_size(heap, block));
    if next + POINTER_OVERHEAD_WORDS >= heap.len() {
        return None;
    }
    let after = heap.read(next - 1);
    if after < POINTER_OVERHEAD_WORDS as isize {
        return None;
    }
    Some(next)
}

/// Real block behind an aligned sub-allocation
///
/// An aligned allocation stores the index of its enclosing block in the word
/// before the aligned payload. The stored index is only trusted when it names
/// a used block that starts below `block`, contains it, and has a matching
/// footer; anything else means `block` is itself a block start.
pub fn aligned_origin<V: WordView + ?Sized>(heap: &V, block: WordIndex) -> Option<WordIndex> {
    if block <= FIRST_BLOCK_OFFSET_WORDS || block >= heap.len() {
        return None;
    }

    let candidate = heap.read(block - 1);
    if candidate < FIRST_BLOCK_OFFSET_WORDS as isize || candidate as usize >= block {
        return None;
    }
    let origin = candidate as usize;

    let raw = heap.read(origin - 1);
    let tag = BlockTag::decode(raw);
    if tag.free || tag.size == 0 || origin + tag.size >= heap.len() || block >= origin + tag.size {
        return None;
    }

    (read_footer(heap, origin, tag.size) == raw).then_some(origin)
}
