/*!
 * Word Widths
 *
 * The heap works in fixed-width words: 4 bytes (`i32`) or 8 bytes (`i64`).
 * Every layout constant is expressed in words, so one engine serves both widths;
 * only the byte conversions below depend on the chosen `Word`.
 */

use super::types::{HeapError, HeapResult};
use crate::core::limits::{
    ALIGNMENT_WORDS, FIRST_BLOCK_OFFSET_WORDS, MAX_HEIGHT, MIN_FREEABLE_WORDS,
};
use crate::core::types::{Address, Size, WordIndex};
use std::fmt;

/// A word width the heap can be built over
pub trait Word: Copy + fmt::Debug + Send + Sync + 'static {
    /// Width in bytes
    const BYTES: usize;

    /// log2(BYTES), for byte <-> word conversion
    const SHIFT: u32;

    /// Human readable name, used in logs
    const NAME: &'static str;

    /// Payload alignment in bytes
    const ALIGNMENT: usize = ALIGNMENT_WORDS * Self::BYTES;

    /// Smallest payload in bytes
    const MIN_FREEABLE_SIZE: usize = MIN_FREEABLE_WORDS * Self::BYTES;

    fn from_isize(value: isize) -> Self;

    fn to_isize(self) -> isize;

    /// Read a word from raw memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `BYTES` bytes and aligned to `BYTES`.
    unsafe fn load(ptr: *const u8) -> Self;

    /// Write a word to raw memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `BYTES` bytes and aligned to `BYTES`.
    unsafe fn store(ptr: *mut u8, value: Self);
}

impl Word for i32 {
    const BYTES: usize = 4;
    const SHIFT: u32 = 2;
    const NAME: &'static str = "i32";

    #[inline]
    fn from_isize(value: isize) -> Self {
        debug_assert!(i32::try_from(value).is_ok(), "word overflow: {value}");
        value as i32
    }

    #[inline]
    fn to_isize(self) -> isize {
        self as isize
    }

    #[inline]
    unsafe fn load(ptr: *const u8) -> Self {
        ptr.cast::<i32>().read()
    }

    #[inline]
    unsafe fn store(ptr: *mut u8, value: Self) {
        ptr.cast::<i32>().write(value)
    }
}

impl Word for i64 {
    const BYTES: usize = 8;
    const SHIFT: u32 = 3;
    const NAME: &'static str = "i64";

    #[inline]
    fn from_isize(value: isize) -> Self {
        value as i64
    }

    #[inline]
    fn to_isize(self) -> isize {
        debug_assert!(isize::try_from(self).is_ok(), "word exceeds host addressing: {self}");
        self as isize
    }

    #[inline]
    unsafe fn load(ptr: *const u8) -> Self {
        ptr.cast::<i64>().read()
    }

    #[inline]
    unsafe fn store(ptr: *mut u8, value: Self) {
        ptr.cast::<i64>().write(value)
    }
}

/// Round `value` up to a power-of-two `alignment`; `None` on overflow
#[inline]
pub fn align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    value
        .checked_add(alignment - 1)
        .map(|v| v & !(alignment - 1))
}

#[inline]
pub fn bytes_to_words<W: Word>(bytes: Size) -> usize {
    bytes >> W::SHIFT
}

#[inline]
pub fn words_to_bytes<W: Word>(words: usize) -> Size {
    words << W::SHIFT
}

/// Where the heap body sits inside a segment's managed region
///
/// The region starts with `MAX_HEIGHT` scratch words, then the body starts at the
/// next alignment boundary. The body length in words is kept odd: together with the
/// odd Header payload this puts every block payload on an alignment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapGeometry {
    /// Start of the managed region (scratch area)
    pub byte_offset: Address,
    /// Start of the heap body
    pub heap_offset: Address,
    /// Heap body length in words
    pub heap_words: usize,
}

impl HeapGeometry {
    /// Smallest body able to hold the Header plus one minimal block
    pub const MIN_HEAP_WORDS: usize = FIRST_BLOCK_OFFSET_WORDS + MIN_FREEABLE_WORDS + 1;

    pub fn new<W: Word>(byte_offset: Address, byte_length: Size) -> HeapResult<Self> {
        if byte_offset % W::BYTES != 0 {
            return Err(HeapError::MisalignedAddress {
                address: byte_offset,
                alignment: W::BYTES,
            });
        }

        let scratch_end = byte_offset + MAX_HEIGHT * W::BYTES;
        let heap_offset = align_up(scratch_end, W::ALIGNMENT).ok_or(HeapError::SegmentTooSmall {
            length: byte_length,
            required: usize::MAX,
        })?;
        let end = byte_offset + byte_length;

        let mut heap_words = bytes_to_words::<W>(end.saturating_sub(heap_offset));
        if heap_words % 2 == 0 {
            heap_words = heap_words.saturating_sub(1);
        }

        if heap_words < Self::MIN_HEAP_WORDS {
            return Err(HeapError::SegmentTooSmall {
                length: byte_length,
                required: (heap_offset - byte_offset)
                    + words_to_bytes::<W>(Self::MIN_HEAP_WORDS),
            });
        }

        Ok(Self {
            byte_offset,
            heap_offset,
            heap_words,
        })
    }

    /// Heap body length in bytes
    #[inline]
    pub fn heap_length<W: Word>(&self) -> Size {
        words_to_bytes::<W>(self.heap_words)
    }

    /// Caller-visible address of a block payload
    #[inline]
    pub fn address_of<W: Word>(&self, block: WordIndex) -> Address {
        words_to_bytes::<W>(block) + self.heap_offset
    }
}
