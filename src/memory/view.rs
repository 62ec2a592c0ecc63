/*!
 * Word Views
 *
 * Word-indexed windows onto heap memory. The free-list engine only talks to a
 * `WordView`, so the same algorithm runs over a directly addressed segment or
 * over memory reachable only through a `MemoryOperator`.
 */

use super::segment::Segment;
use super::traits::MemoryOperator;
use super::word::Word;
use crate::core::types::{Address, Size, WordIndex};
use std::marker::PhantomData;
use std::sync::Arc;

/// Fixed-width words addressed by index
///
/// Writes take `&self`: views alias shared memory and callers serialize
/// mutation through the heap lock.
pub trait WordView {
    /// Width of the words this view reads and writes
    type Word: Word;

    /// Number of words in the view
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, index: WordIndex) -> isize;

    fn write(&self, index: WordIndex, value: isize);

    /// Set `count` words starting at `index` to `value`
    fn fill(&self, index: WordIndex, count: usize, value: isize) {
        for i in index..index + count {
            self.write(i, value);
        }
    }

    /// Set `bytes` bytes starting at word `index` to `value`
    fn fill_bytes(&self, index: WordIndex, bytes: Size, value: u8);

    /// Overlap-safe copy of `count` words
    fn copy_words(&self, dst: WordIndex, src: WordIndex, count: usize);
}

/// View over a directly addressed segment
#[derive(Debug, Clone)]
pub struct SegmentView<W: Word> {
    segment: Arc<Segment>,
    base: Address,
    len: usize,
    _word: PhantomData<W>,
}

impl<W: Word> SegmentView<W> {
    /// `len` words starting at byte `base`
    ///
    /// Panics if the window leaves the segment or `base` is not word aligned.
    pub fn new(segment: Arc<Segment>, base: Address, len: usize) -> Self {
        assert_eq!(base % W::BYTES, 0, "view base 0x{base:x} is not word aligned");
        let end = len
            .checked_mul(W::BYTES)
            .and_then(|bytes| bytes.checked_add(base));
        assert!(
            end.is_some_and(|end| end <= segment.capacity()),
            "view [0x{base:x}, +{len} words) exceeds segment of {} bytes",
            segment.capacity()
        );

        Self {
            segment,
            base,
            len,
            _word: PhantomData,
        }
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    pub fn base(&self) -> Address {
        self.base
    }

    #[inline]
    fn byte_address(&self, index: WordIndex) -> Address {
        self.base + index * W::BYTES
    }

    #[inline]
    fn check(&self, index: WordIndex, count: usize) {
        assert!(
            index <= self.len && count <= self.len - index,
            "word access [{index}, +{count}) outside view of {} words",
            self.len
        );
    }
}

impl<W: Word> WordView for SegmentView<W> {
    type Word = W;

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn read(&self, index: WordIndex) -> isize {
        self.check(index, 1);
        // SAFETY: in bounds per `check`, word aligned since the segment is
        // SEGMENT_ALIGN aligned and `base` is a multiple of W::BYTES.
        unsafe { W::load(self.segment.as_ptr().add(self.byte_address(index))) }.to_isize()
    }

    #[inline]
    fn write(&self, index: WordIndex, value: isize) {
        self.check(index, 1);
        // SAFETY: as in `read`.
        unsafe {
            W::store(
                self.segment.as_ptr().add(self.byte_address(index)),
                W::from_isize(value),
            )
        }
    }

    fn fill_bytes(&self, index: WordIndex, bytes: Size, value: u8) {
        self.check(index, bytes.div_ceil(W::BYTES));
        self.segment.fill(self.byte_address(index), value, bytes);
    }

    fn copy_words(&self, dst: WordIndex, src: WordIndex, count: usize) {
        self.check(dst, count);
        self.check(src, count);
        self.segment.copy_within(
            self.byte_address(dst),
            self.byte_address(src),
            count * W::BYTES,
        );
    }
}

/// 64-bit view over memory reached through a [`MemoryOperator`]
pub struct OperatorView<O: MemoryOperator + ?Sized> {
    operator: Arc<O>,
    base: Address,
    len: usize,
}

impl<O: MemoryOperator + ?Sized> OperatorView<O> {
    pub fn new(operator: Arc<O>, base: Address, len: usize) -> Self {
        Self {
            operator,
            base,
            len,
        }
    }

    pub fn operator(&self) -> &Arc<O> {
        &self.operator
    }

    #[inline]
    fn byte_address(&self, index: WordIndex) -> Address {
        debug_assert!(index < self.len, "word {index} outside view of {} words", self.len);
        self.base + index * <i64 as Word>::BYTES
    }
}

impl<O: MemoryOperator + ?Sized> Clone for OperatorView<O> {
    fn clone(&self) -> Self {
        Self {
            operator: Arc::clone(&self.operator),
            base: self.base,
            len: self.len,
        }
    }
}

impl<O: MemoryOperator + ?Sized> WordView for OperatorView<O> {
    type Word = i64;

    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, index: WordIndex) -> isize {
        self.operator.read64(self.byte_address(index)).to_isize()
    }

    fn write(&self, index: WordIndex, value: isize) {
        self.operator
            .write64(self.byte_address(index), <i64 as Word>::from_isize(value));
    }

    fn fill_bytes(&self, index: WordIndex, bytes: Size, value: u8) {
        self.operator.fill(self.byte_address(index), value, bytes);
    }

    fn copy_words(&self, dst: WordIndex, src: WordIndex, count: usize) {
        if count == 0 {
            return;
        }
        self.operator.copy(
            self.byte_address(dst),
            self.byte_address(src),
            count * <i64 as Word>::BYTES,
        );
    }
}
