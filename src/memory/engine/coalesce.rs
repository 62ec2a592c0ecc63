/*!
 * Splitting and Coalescing
 */

use super::block::{block_size, free_block_after, free_block_before, next_block, write_tag, BlockTag};
use super::FreeList;
use crate::core::limits::POINTER_OVERHEAD_WORDS;
use crate::core::types::WordIndex;
use crate::memory::types::HeapResult;
use crate::memory::view::WordView;
use rand::Rng;

impl<V: WordView + ?Sized, R: Rng + ?Sized> FreeList<'_, V, R> {
    /// Take `first` words from the front of a free block; the remainder
    /// goes back on the list
    pub fn split(&mut self, block: WordIndex, first: usize, size: usize) -> HeapResult<()> {
        let heap = self.heap;
        let second = next_block(block, first);
        let second_size = size - (second - block);

        self.remove(block, size)?;

        write_tag(heap, block, BlockTag::used(first));
        write_tag(heap, second, BlockTag::used(second_size));

        self.insert(second, second_size);
        Ok(())
    }

    /// Free `block` merged with the free block right after it
    pub fn insert_before(&mut self, trailing: WordIndex, block: WordIndex, size: usize) -> HeapResult<()> {
        let heap = self.heap;
        let trailing_size = block_size(heap, trailing);
        self.remove(trailing, trailing_size)?;

        let merged = size + trailing_size + POINTER_OVERHEAD_WORDS;
        write_tag(heap, block, BlockTag::used(merged));
        self.insert(block, merged);
        Ok(())
    }

    /// Free `block` merged with the free block right before it
    pub fn insert_after(&mut self, preceding: WordIndex, block: WordIndex, size: usize) -> HeapResult<()> {
        let heap = self.heap;
        let preceding_size = block - preceding - POINTER_OVERHEAD_WORDS;
        let merged = (block - preceding) + size;
        self.remove(preceding, preceding_size)?;

        write_tag(heap, preceding, BlockTag::used(merged));
        self.insert(preceding, merged);
        Ok(())
    }

    /// Free `block` merged with free blocks on both sides
    pub fn insert_middle(
        &mut self,
        preceding: WordIndex,
        block: WordIndex,
        trailing: WordIndex,
    ) -> HeapResult<()> {
        let heap = self.heap;
        debug_assert!(preceding < block && block < trailing);
        let preceding_size = block_size(heap, preceding);
        let trailing_size = block_size(heap, trailing);
        let merged = (trailing - preceding) + trailing_size;

        self.remove(preceding, preceding_size)?;
        self.remove(trailing, trailing_size)?;

        write_tag(heap, preceding, BlockTag::used(merged));
        self.insert(preceding, merged);
        Ok(())
    }

    /// Free a used block, merging with whichever neighbours are free
    pub fn release(&mut self, block: WordIndex, size: usize) -> HeapResult<()> {
        let heap = self.heap;
        let preceding = free_block_before(heap, block);
        let trailing = free_block_after(heap, block);

        match (preceding, trailing) {
            (Some(preceding), Some(trailing)) => self.insert_middle(preceding, block, trailing),
            (Some(preceding), None) => self.insert_after(preceding, block, size),
            (None, Some(trailing)) => self.insert_before(trailing, block, size),
            (None, None) => {
                self.insert(block, size);
                Ok(())
            }
        }
    }
}
