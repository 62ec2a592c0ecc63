/*!
 * Memory Types
 * Errors, configuration and inspection records for the shared heap
 */

use crate::core::limits::{DEFAULT_GROW_SIZE, DEFAULT_MAX_HEAP_SIZE};
use crate::core::types::{Address, Size, WordIndex};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Heap operation result
pub type HeapResult<T> = Result<T, HeapError>;

/// Heap errors
///
/// Exhaustion-style failures are returned to the caller. Misuse variants are
/// produced by validation and then escalated to a panic by the allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum HeapError {
    #[error("Out of memory: requested {requested} bytes from a {heap_length} byte heap")]
    #[diagnostic(
        code(heap::out_of_memory),
        help("Free unused blocks or enable growth with a larger max_heap_size.")
    )]
    OutOfMemory { requested: Size, heap_length: Size },

    #[error("Heap growth refused: {required} bytes needed, limit is {max_heap_size} bytes")]
    #[diagnostic(code(heap::growth_refused))]
    GrowthRefused { required: Size, max_heap_size: Size },

    #[error("Reserved capacity of {capacity} bytes cannot hold {required} bytes while {units} units share it")]
    #[diagnostic(
        code(heap::reservation_exhausted),
        help("Reserve more capacity up front with Segment::reserved, or install a resize handler.")
    )]
    ReservationExhausted {
        required: Size,
        capacity: Size,
        units: usize,
    },

    #[error("Resize handler failed: {0}")]
    #[diagnostic(code(heap::resize_failed))]
    ResizeFailed(String),

    #[error("Size overflow computing {count} x {size} bytes")]
    #[diagnostic(code(heap::size_overflow))]
    SizeOverflow { count: Size, size: Size },

    #[error("Invalid alignment {0}: must be a power of two no smaller than the word size")]
    #[diagnostic(code(heap::invalid_alignment))]
    InvalidAlignment(Size),

    #[error("Segment region of {length} bytes is too small, at least {required} bytes needed")]
    #[diagnostic(code(heap::segment_too_small))]
    SegmentTooSmall { length: Size, required: Size },

    #[error("Address 0x{address:x} is not a multiple of {alignment}")]
    #[diagnostic(code(heap::misaligned_address))]
    MisalignedAddress { address: Address, alignment: Size },

    #[error("Address 0x{address:x} is outside the heap body [0x{start:x}, 0x{end:x})")]
    #[diagnostic(code(heap::address_out_of_range))]
    AddressOutOfRange {
        address: Address,
        start: Address,
        end: Address,
    },

    #[error("Block {block} header ({header}) does not match footer ({footer})")]
    #[diagnostic(
        code(heap::corrupt_block),
        help("A write ran past the end of an allocation or the address is not owned by this heap.")
    )]
    CorruptBlock {
        block: WordIndex,
        header: isize,
        footer: isize,
    },

    #[error("Block {block} has invalid size {size} words")]
    #[diagnostic(code(heap::invalid_block_size))]
    InvalidBlockSize { block: WordIndex, size: isize },

    #[error("Free block {block} has height {height}, expected 1..={max}")]
    #[diagnostic(code(heap::invalid_height))]
    InvalidHeight {
        block: WordIndex,
        height: isize,
        max: usize,
    },

    #[error("Free block {block} points to non-free block {pointer}")]
    #[diagnostic(code(heap::dangling_free_pointer))]
    DanglingFreePointer { block: WordIndex, pointer: WordIndex },

    #[error("Free list is not ordered: block {block} ({size} words) follows {previous_size} words")]
    #[diagnostic(code(heap::unordered_free_list))]
    UnorderedFreeList {
        block: WordIndex,
        size: usize,
        previous_size: usize,
    },

    #[error("Block {block} ({size} words) is not in the free list")]
    #[diagnostic(
        code(heap::missing_free_block),
        help("The free list is corrupt; the heap cannot be used safely.")
    )]
    MissingFreeBlock { block: WordIndex, size: usize },

    #[error("Adjacent free blocks {first} and {second} were not coalesced")]
    #[diagnostic(code(heap::uncoalesced))]
    Uncoalesced { first: WordIndex, second: WordIndex },

    #[error("Address 0x{0:x} does not refer to a live allocation")]
    #[diagnostic(code(heap::not_allocated))]
    NotAllocated(Address),

    #[error("Double free of address 0x{0:x}")]
    #[diagnostic(code(heap::double_free))]
    DoubleFree(Address),
}

impl HeapError {
    /// Whether this error reports exhaustion rather than misuse or corruption
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            HeapError::OutOfMemory { .. }
                | HeapError::GrowthRefused { .. }
                | HeapError::ReservationExhausted { .. }
                | HeapError::ResizeFailed(_)
                | HeapError::SizeOverflow { .. }
        )
    }
}

/// What `free` does with an address whose block is already free
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleFreePolicy {
    /// Silently ignore the call
    #[default]
    Ignore,
    /// Treat it as a fatal programming error
    Fatal,
}

/// Heap configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Grow the backing segment when no free block is large enough
    pub grow_allowed: bool,
    /// Minimum growth step in bytes
    pub grow_size: Size,
    /// Heap body size beyond which growth is refused
    pub max_heap_size: Size,
    /// Spin instead of parking while waiting for the heap lock
    pub spin_lock: bool,
    /// Behaviour on double free
    pub double_free: DoubleFreePolicy,
    /// Walk the whole heap after initialization and growth
    pub integrity_checks: bool,
    /// Seed for skip-list node heights (entropy when unset)
    pub seed: Option<u64>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            grow_allowed: false,
            grow_size: DEFAULT_GROW_SIZE,
            max_heap_size: DEFAULT_MAX_HEAP_SIZE,
            spin_lock: false,
            double_free: DoubleFreePolicy::Ignore,
            integrity_checks: cfg!(debug_assertions),
            seed: None,
        }
    }
}

impl HeapConfig {
    /// Fixed-size heap: exhaustion is final
    pub fn fixed() -> Self {
        Self::default()
    }

    /// Growable heap with default increments and ceiling
    pub fn growable() -> Self {
        Self {
            grow_allowed: true,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_grow_size(mut self, grow_size: Size) -> Self {
        self.grow_size = grow_size;
        self
    }

    pub fn with_max_heap_size(mut self, max_heap_size: Size) -> Self {
        self.max_heap_size = max_heap_size;
        self
    }

    pub fn with_spin_lock(mut self, spin: bool) -> Self {
        self.spin_lock = spin;
        self
    }

    pub fn with_double_free(mut self, policy: DoubleFreePolicy) -> Self {
        self.double_free = policy;
        self
    }

    pub fn with_integrity_checks(mut self, enabled: bool) -> Self {
        self.integrity_checks = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Skip-list node as seen by the inspector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListNode {
    /// Word index of the payload
    pub block: WordIndex,
    /// Caller-visible address of the payload
    pub offset: Address,
    /// Payload size in bytes
    pub size: Size,
    pub height: usize,
    /// Forward pointers (word indices), one per level
    pub pointers: Vec<WordIndex>,
}

/// One block of the heap body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockRecord {
    Free {
        block: WordIndex,
        offset: Address,
        size: Size,
        node: ListNode,
    },
    Used {
        block: WordIndex,
        offset: Address,
        size: Size,
    },
}

impl BlockRecord {
    pub fn is_free(&self) -> bool {
        matches!(self, BlockRecord::Free { .. })
    }

    pub fn offset(&self) -> Address {
        match self {
            BlockRecord::Free { offset, .. } | BlockRecord::Used { offset, .. } => *offset,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> Size {
        match self {
            BlockRecord::Free { size, .. } | BlockRecord::Used { size, .. } => *size,
        }
    }
}

/// Heap snapshot produced by `inspect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    pub header: ListNode,
    pub blocks: Vec<BlockRecord>,
    /// Heap body length in bytes
    pub total: Size,
    /// Bytes held by allocated payloads
    pub used: Size,
}

impl Inspection {
    /// Bytes held by free payloads
    pub fn free_bytes(&self) -> Size {
        self.blocks
            .iter()
            .filter(|b| b.is_free())
            .map(BlockRecord::size)
            .sum()
    }

    pub fn free_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_free()).count()
    }

    pub fn used_blocks(&self) -> usize {
        self.blocks.len() - self.free_blocks()
    }

    /// Whether two physically adjacent blocks are both free
    pub fn has_adjacent_free(&self) -> bool {
        self.blocks
            .windows(2)
            .any(|pair| pair[0].is_free() && pair[1].is_free())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
