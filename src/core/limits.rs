/*!
 * Heap Limits and Constants
 *
 * Centralized location for heap-wide limits, defaults and layout constants.
 *
 * ## Conventions
 * - Word counts are suffixed `_WORDS`, byte counts `_BYTES` or `_SIZE`
 * - Layout constants are shared by every word width; only the byte width differs
 */

// =============================================================================
// SKIP LIST
// =============================================================================

/// Maximum height of the embedded skip list
/// Also sizes the Header payload and the predecessor scratch area
pub const MAX_HEIGHT: usize = 32;

/// Probability used for each coin flip when drawing a node height
pub const LEVEL_PROBABILITY: f64 = 0.5;

// =============================================================================
// BLOCK LAYOUT (in words, relative to the heap body)
// =============================================================================

/// Header and footer words around each payload
pub const POINTER_OVERHEAD_WORDS: usize = 2;

/// Word index of the Header pseudo-block payload
pub const HEADER_OFFSET_WORDS: usize = 1;

/// Header payload length. Odd, so the first block payload lands on an even word.
pub const HEADER_SIZE_WORDS: usize = 1 + MAX_HEIGHT * 2;

/// Word index of the first real block payload
pub const FIRST_BLOCK_OFFSET_WORDS: usize =
    HEADER_OFFSET_WORDS + HEADER_SIZE_WORDS + POINTER_OVERHEAD_WORDS;

/// Offset of the height word inside a skip-list node
pub const HEIGHT_OFFSET_WORDS: usize = 0;

/// Offset of the first forward pointer inside a skip-list node
pub const NEXT_OFFSET_WORDS: usize = 2;

/// Allocation granularity in words (8 bytes for 32-bit words, 16 bytes for 64-bit words)
pub const ALIGNMENT_WORDS: usize = 2;

/// Smallest payload the allocator creates (16 bytes / 32 bytes)
pub const MIN_FREEABLE_WORDS: usize = 4;

// =============================================================================
// GROWTH DEFAULTS
// =============================================================================

/// Default growth increment (1MB)
pub const DEFAULT_GROW_SIZE: usize = 1024 * 1024;

/// Default ceiling for a growable heap (2000MB)
pub const DEFAULT_MAX_HEAP_SIZE: usize = 2000 * 1024 * 1024;

/// Alignment of every segment allocation
/// Covers the widest word alignment so payload addresses are aligned in absolute terms too
pub const SEGMENT_ALIGN: usize = 16;

// =============================================================================
// LOCKING
// =============================================================================

/// Spins before a spinning waiter starts yielding its time slice
pub const LOCK_SPIN_LIMIT: u32 = 64;
