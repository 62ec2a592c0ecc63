/*!
 * Memory Traits
 * Allocator contract and the collaborators it is built from
 */

use super::manager::{HandleId, UpdateHandle};
use super::segment::Segment;
use super::types::{HeapError, HeapResult};
use super::view::WordView;
use super::word::Word;
use crate::core::types::{Address, Size};
use std::sync::Arc;

/// C-style allocator contract
///
/// Addresses are byte offsets into the backing memory and `NULL` (0) reports
/// failure. Misuse (foreign or corrupt addresses) panics.
pub trait Allocator {
    /// Store the heap lives in
    type Memory;

    /// Allocate `size` bytes
    fn malloc(&mut self, size: Size) -> Address;

    /// Allocate `count * size` zeroed bytes
    fn calloc(&mut self, count: Size, size: Size) -> Address;

    /// Resize an allocation, moving it when it cannot stay in place
    ///
    /// When the larger block cannot be obtained this returns `NULL` and leaves
    /// `address` allocated with its contents intact, as C `realloc` does. It does
    /// not release the block on failure; the caller still owns it and must free
    /// it.
    fn realloc(&mut self, address: Address, size: Size) -> Address;

    /// Allocate `size` bytes at a multiple of `alignment`
    fn aligned_alloc(&mut self, alignment: Size, size: Size) -> Address;

    /// Release an allocation; `NULL` is ignored
    fn free(&mut self, address: Address);

    /// Whether `address` is not inside a free block
    fn is_alloc(&mut self, address: Address) -> bool;

    /// Usable bytes behind `address`
    fn sizeof(&mut self, address: Address) -> Size;

    /// Current backing memory
    fn buffer(&self) -> Arc<Self::Memory>;

    /// Register a callback fired whenever the backing memory is replaced or grown
    fn add_update_handle(&mut self, handle: UpdateHandle<Self::Memory>) -> HandleId;

    fn remove_update_handle(&mut self, id: HandleId) -> bool;
}

/// Backing store of a heap
///
/// A managed byte region `[byte_offset, byte_offset + byte_length)` that the
/// allocator reads as `W` words. The region only ever grows.
pub trait HeapMemory<W: Word>: Send + Sync + Sized + 'static {
    type View: WordView<Word = W>;

    /// Start of the managed region
    fn byte_offset(&self) -> Address;

    /// Current length of the managed region
    fn byte_length(&self) -> Size;

    /// Bytes the region may reach without a new store
    fn capacity(&self) -> Size;

    /// `len` words starting at byte `base`
    fn view(memory: &Arc<Self>, base: Address, len: usize) -> Self::View;

    /// Set `len` bytes at `address` to `value`
    fn fill(&self, address: Address, value: u8, len: Size);

    /// Overlap-safe copy of `len` bytes
    fn copy_within(&self, dst: Address, src: Address, len: Size);

    /// Lengthen the region to `byte_length` without moving it
    ///
    /// Returns `false` when the store cannot hold the longer region. Caller
    /// must hold the heap lock.
    fn extend(&self, byte_length: Size) -> bool;

    /// New store with the same region start, a `byte_length` region and a copy
    /// of this store's contents
    fn grown(&self, byte_length: Size) -> HeapResult<Self>;
}

/// Supplies a larger store when the heap must grow
///
/// The returned store must keep the managed region's start offset and carry
/// the current contents. It may be `current` itself, grown in place by the
/// owner.
pub trait ResizeHandler<M = Segment>: Send + Sync {
    /// Produce a store whose managed region is at least `required` bytes
    fn resize(&self, current: &Arc<M>, required: Size) -> HeapResult<Arc<M>>;
}

impl<M, F> ResizeHandler<M> for F
where
    F: Fn(&Arc<M>, Size) -> HeapResult<Arc<M>> + Send + Sync,
{
    fn resize(&self, current: &Arc<M>, required: Size) -> HeapResult<Arc<M>> {
        self(current, required)
    }
}

/// Narrow 64-bit memory interface
///
/// For memories that can only be reached through accessor calls rather than
/// direct loads and stores. Addresses are absolute byte offsets.
pub trait MemoryOperator: Send + Sync {
    fn read64(&self, address: Address) -> i64;

    fn write64(&self, address: Address, value: i64);

    /// Set `size` bytes starting at `address` to `value`
    fn fill(&self, address: Address, value: u8, size: Size);

    /// Copy `size` bytes from `src` to `dst`; the ranges may overlap
    fn copy(&self, dst: Address, src: Address, size: Size);

    /// Bytes currently addressable
    fn size(&self) -> Size;

    /// Make at least `size` bytes addressable, keeping the existing contents at
    /// their addresses
    fn grow(&self, size: Size) -> HeapResult<()> {
        Err(HeapError::ResizeFailed(format!(
            "memory of {} bytes cannot grow to {size}",
            self.size()
        )))
    }
}
