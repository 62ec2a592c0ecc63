/*!
 * Free-List Engine
 *
 * Free blocks are threaded into a skip list ordered by size. The list lives
 * entirely inside the heap: the Header pseudo-block is its root and every free
 * block's payload hosts its node (height at offset 0, forward pointers from
 * offset 2). `HEADER` as a forward pointer means end of level.
 *
 * # Performance
 *
 * - Find, insert and remove are expected O(log n) in the number of free blocks
 * - Mutations reuse a predecessor array kept in the segment's scratch area
 */

mod block;
mod coalesce;
mod skiplist;

pub use block::{
    aligned_origin, block_size, free_block_after, free_block_before, is_free, next_block,
    read_footer, read_tag, write_tag, BlockTag,
};
pub use skiplist::{find_free_block, is_live, node_height, node_next, prepare, verify_header};

use super::view::WordView;
use rand::Rng;

/// Mutating side of the free list
///
/// Borrows the heap body, the predecessor scratch array and the random source
/// for node heights. Built per operation while the heap lock is held.
pub struct FreeList<'a, V: WordView + ?Sized, R: Rng + ?Sized> {
    heap: &'a V,
    updates: &'a V,
    rng: &'a mut R,
}

impl<'a, V: WordView + ?Sized, R: Rng + ?Sized> FreeList<'a, V, R> {
    pub fn new(heap: &'a V, updates: &'a V, rng: &'a mut R) -> Self {
        Self { heap, updates, rng }
    }

    pub fn heap(&self) -> &'a V {
        self.heap
    }
}
