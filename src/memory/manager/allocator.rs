/*!
 * Allocation Facade
 * malloc / calloc / realloc / aligned_alloc / free and queries
 */

use super::{fatal, HandleId, HeapAllocator, UpdateHandle};
use crate::core::limits::{FIRST_BLOCK_OFFSET_WORDS, MIN_FREEABLE_WORDS, POINTER_OVERHEAD_WORDS};
use crate::core::types::{Address, Size, WordIndex, NULL};
use crate::memory::diagnostics::{check_list_integrity, inspect};
use crate::memory::engine::{aligned_origin, block_size, is_live, read_footer, BlockTag};
use crate::memory::traits::{Allocator, HeapMemory};
use crate::memory::types::{DoubleFreePolicy, HeapError, HeapResult, Inspection};
use crate::memory::view::WordView;
use crate::memory::word::{align_up, bytes_to_words, words_to_bytes, Word};
use crate::monitoring::span_heap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Block behind a caller address
#[derive(Debug, Clone, Copy)]
struct Located {
    /// Word index the address points at
    block: WordIndex,
    /// Start of the enclosing block (differs from `block` for aligned allocations)
    origin: WordIndex,
}

impl Located {
    fn padding(&self) -> usize {
        self.block - self.origin
    }
}

impl<W: Word, M: HeapMemory<W>> HeapAllocator<W, M> {
    /// Largest single request the current body could ever satisfy, in bytes
    fn capacity(&self) -> Size {
        self.heap_length()
            .saturating_sub(words_to_bytes::<W>(FIRST_BLOCK_OFFSET_WORDS + 1))
    }

    /// Payload words for a `size` byte request
    fn request_words(&self, size: Size) -> HeapResult<usize> {
        let bytes = align_up(size, W::ALIGNMENT)
            .ok_or(HeapError::OutOfMemory {
                requested: size,
                heap_length: self.heap_length(),
            })?
            .max(W::MIN_FREEABLE_SIZE);

        if !self.config.grow_allowed && bytes > self.capacity() {
            warn!(requested = size, capacity = self.capacity(), "Request exceeds fixed heap");
            return Err(HeapError::OutOfMemory {
                requested: size,
                heap_length: self.heap_length(),
            });
        }

        Ok(bytes_to_words::<W>(bytes))
    }

    fn allocate_locked(&mut self, size: Size) -> HeapResult<Address> {
        let min = self.request_words(size)?;
        let block = self.find_or_grow(min)?;
        let available = block_size(&self.heap, block);

        let mut list = self.free_list();
        let taken = if available >= min + POINTER_OVERHEAD_WORDS + MIN_FREEABLE_WORDS {
            list.split(block, min, available)
        } else {
            list.remove(block, available)
        };
        taken.unwrap_or_else(|err| fatal(err));

        let address = self.geometry.address_of::<W>(block);
        debug_assert_eq!(address % W::ALIGNMENT, 0, "unaligned block {block}");
        Ok(address)
    }

    /// Resolve a caller address to its block, aborting on misuse
    fn locate(&self, address: Address) -> Located {
        if address % W::ALIGNMENT != 0 {
            fatal(HeapError::MisalignedAddress {
                address,
                alignment: W::ALIGNMENT,
            });
        }

        let start = self.geometry.address_of::<W>(FIRST_BLOCK_OFFSET_WORDS);
        let end = self.geometry.heap_offset + self.heap_length();
        if address < start || address >= end {
            fatal(HeapError::AddressOutOfRange { address, start, end });
        }

        let block = bytes_to_words::<W>(address - self.geometry.heap_offset);
        let origin = aligned_origin(&self.heap, block).unwrap_or(block);
        Located { block, origin }
    }

    /// Check a used block's tags, aborting on corruption
    fn validate_used(&self, origin: WordIndex) -> BlockTag {
        let raw = self.heap.read(origin - 1);
        let tag = BlockTag::decode(raw);

        if tag.size < MIN_FREEABLE_WORDS || origin + tag.size >= self.heap.len() {
            fatal(HeapError::InvalidBlockSize {
                block: origin,
                size: raw,
            });
        }

        let footer = read_footer(&self.heap, origin, tag.size);
        if footer != raw {
            fatal(HeapError::CorruptBlock {
                block: origin,
                header: raw,
                footer,
            });
        }
        tag
    }

    /// Whether `origin` already went back to the free list
    ///
    /// A block merged into a free predecessor keeps a stale used header, so a
    /// header that disagrees with its footer is resolved with a liveness walk.
    fn already_free(&self, origin: WordIndex) -> bool {
        let raw = self.heap.read(origin - 1);
        let tag = BlockTag::decode(raw);
        if tag.free {
            return true;
        }

        let consistent = tag.size >= MIN_FREEABLE_WORDS
            && origin + tag.size < self.heap.len()
            && read_footer(&self.heap, origin, tag.size) == raw;
        !consistent && !is_live(&self.heap, origin)
    }

    fn deallocate_locked(&mut self, address: Address) {
        if address == NULL {
            return;
        }

        let located = self.locate(address);
        if self.already_free(located.origin) {
            match self.config.double_free {
                DoubleFreePolicy::Ignore => {
                    debug!(address, "Ignoring free of an already free block");
                    return;
                }
                DoubleFreePolicy::Fatal => fatal(HeapError::DoubleFree(address)),
            }
        }

        let tag = self.validate_used(located.origin);
        self.free_list()
            .release(located.origin, tag.size)
            .unwrap_or_else(|err| fatal(err));
    }

    /// Allocate `size` bytes, aligned to `W::ALIGNMENT`
    pub fn allocate(&mut self, size: Size) -> HeapResult<Address> {
        self.locked(|heap| heap.allocate_locked(size))
    }

    /// Allocate `count * size` bytes and zero exactly that many
    pub fn zero_allocate(&mut self, count: Size, size: Size) -> HeapResult<Address> {
        let bytes = count
            .checked_mul(size)
            .ok_or(HeapError::SizeOverflow { count, size })?;

        self.locked(|heap| {
            let address = heap.allocate_locked(bytes)?;
            heap.memory.fill(address, 0, bytes);
            Ok(address)
        })
    }

    /// Resize an allocation
    ///
    /// `NULL` allocates, a zero size frees and returns `NULL`. A block that is
    /// already large enough is kept. Otherwise the contents move to a new block;
    /// if that allocation fails the original block is left untouched.
    pub fn resize(&mut self, address: Address, size: Size) -> HeapResult<Address> {
        self.locked(|heap| {
            if address == NULL {
                return heap.allocate_locked(size);
            }
            if size == 0 {
                heap.deallocate_locked(address);
                return Ok(NULL);
            }

            let located = heap.locate(address);
            if heap.already_free(located.origin) {
                fatal(HeapError::NotAllocated(address));
            }
            let tag = heap.validate_used(located.origin);

            let usable = tag.size - located.padding();
            let needed = align_up(size, W::ALIGNMENT)
                .map(bytes_to_words::<W>)
                .ok_or(HeapError::OutOfMemory {
                    requested: size,
                    heap_length: heap.heap_length(),
                })?;
            if usable >= needed {
                return Ok(address);
            }

            let moved = heap.allocate_locked(size)?;
            heap.memory
                .copy_within(moved, address, words_to_bytes::<W>(usable));
            heap.deallocate_locked(address);
            Ok(moved)
        })
    }

    /// Allocate `size` bytes at a multiple of `alignment`
    ///
    /// Alignments up to `W::ALIGNMENT` are plain allocations. Larger ones
    /// over-allocate and record the enclosing block in the word before the
    /// returned address.
    pub fn aligned_allocate(&mut self, alignment: Size, size: Size) -> HeapResult<Address> {
        if !alignment.is_power_of_two() || alignment < W::BYTES {
            return Err(HeapError::InvalidAlignment(alignment));
        }

        self.locked(|heap| {
            if alignment <= W::ALIGNMENT {
                return heap.allocate_locked(size);
            }

            // a non-empty payload keeps the aligned address inside the block
            let padded = size
                .max(1)
                .checked_add(alignment - 1 + W::BYTES)
                .ok_or(HeapError::OutOfMemory {
                    requested: size,
                    heap_length: heap.heap_length(),
                })?;
            let address = heap.allocate_locked(padded)?;

            let aligned = (address + W::BYTES + alignment - 1) & !(alignment - 1);
            let origin = bytes_to_words::<W>(address - heap.geometry.heap_offset);
            let block = bytes_to_words::<W>(aligned - heap.geometry.heap_offset);
            heap.heap.write(block - 1, origin as isize);

            debug_assert_eq!(aligned % alignment, 0);
            Ok(aligned)
        })
    }

    /// Release an allocation, coalescing with free neighbours
    pub fn deallocate(&mut self, address: Address) {
        if address == NULL {
            return;
        }
        self.locked(|heap| heap.deallocate_locked(address));
    }

    /// Usable bytes behind `address`; 0 for `NULL`
    pub fn size_of(&mut self, address: Address) -> Size {
        if address == NULL {
            return 0;
        }
        self.locked(|heap| {
            let located = heap.locate(address);
            let tag = heap.validate_used(located.origin);
            words_to_bytes::<W>(tag.size - located.padding())
        })
    }

    /// Whether `address` lies outside every free block
    ///
    /// Linear in the number of free blocks; meant for debug assertions.
    pub fn is_live(&mut self, address: Address) -> bool {
        if address == NULL {
            return false;
        }
        self.locked(|heap| {
            let offset = heap.geometry.heap_offset;
            if address < offset || address >= offset + heap.heap_length() {
                return false;
            }
            is_live(&heap.heap, bytes_to_words::<W>(address - offset))
        })
    }

    /// Walk the whole heap and report the first inconsistency
    pub fn check_integrity(&mut self) -> HeapResult<()> {
        self.locked(|heap| check_list_integrity(&heap.heap))
    }

    /// Snapshot every block of the heap
    pub fn inspect(&mut self) -> HeapResult<Inspection> {
        let span = span_heap("inspect");
        let result = self.locked(|heap| inspect(&heap.heap, heap.geometry.heap_offset));
        span.record_result(result.is_ok());
        result
    }

    /// Register a callback fired whenever this handle switches to a new or grown store
    pub fn add_update_handle(&mut self, handle: UpdateHandle<M>) -> HandleId {
        self.handles.add(handle)
    }

    pub fn remove_update_handle(&mut self, id: HandleId) -> bool {
        self.handles.remove(id)
    }
}

fn or_null(result: HeapResult<Address>) -> Address {
    result.unwrap_or_else(|err| {
        warn!(error = %err, "Allocation failed");
        NULL
    })
}

impl<W: Word, M: HeapMemory<W>> Allocator for HeapAllocator<W, M> {
    type Memory = M;

    fn malloc(&mut self, size: Size) -> Address {
        or_null(self.allocate(size))
    }

    fn calloc(&mut self, count: Size, size: Size) -> Address {
        or_null(self.zero_allocate(count, size))
    }

    fn realloc(&mut self, address: Address, size: Size) -> Address {
        or_null(self.resize(address, size))
    }

    fn aligned_alloc(&mut self, alignment: Size, size: Size) -> Address {
        or_null(self.aligned_allocate(alignment, size))
    }

    fn free(&mut self, address: Address) {
        self.deallocate(address);
    }

    fn is_alloc(&mut self, address: Address) -> bool {
        self.is_live(address)
    }

    fn sizeof(&mut self, address: Address) -> Size {
        self.size_of(address)
    }

    fn buffer(&self) -> Arc<M> {
        Arc::clone(&self.memory)
    }

    fn add_update_handle(&mut self, handle: UpdateHandle<M>) -> HandleId {
        HeapAllocator::add_update_handle(self, handle)
    }

    fn remove_update_handle(&mut self, id: HandleId) -> bool {
        HeapAllocator::remove_update_handle(self, id)
    }
}
