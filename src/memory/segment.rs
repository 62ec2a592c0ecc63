/*!
 * Shared Segments
 *
 * `Segment` is the raw, zero-initialized byte buffer the heap lives in.
 * `SharedHeap` is what execution units share: the canonical segment handle
 * plus the lock that serializes every heap mutation.
 *
 * A segment reserves its full capacity up front. The managed region grows in
 * place inside that reservation, so every unit keeps working on the same bytes.
 * Only a segment with a single attached unit is ever copied into a larger one.
 *
 * Addresses handed out by the allocator are byte offsets from the start of the
 * segment, so they stay valid across both kinds of growth.
 */

use super::traits::{HeapMemory, MemoryOperator};
use super::types::{HeapError, HeapResult};
use super::view::SegmentView;
use super::word::Word;
use crate::core::limits::SEGMENT_ALIGN;
use crate::core::sync::{HeapLock, HeapLockGuard, SegmentMutex};
use crate::core::types::{Address, Size};
use arc_swap::ArcSwap;
use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Contiguous zeroed byte buffer with a managed sub-region
///
/// All access goes through raw pointers so that several units may hold the
/// same segment; heap metadata is only touched under the `SharedHeap` lock.
pub struct Segment {
    ptr: NonNull<u8>,
    layout: Layout,
    byte_offset: Address,
    byte_length: AtomicUsize,
}

// SAFETY: the buffer is plain bytes owned by the segment; concurrent mutation of
// heap metadata is serialized by the heap lock, user data follows C rules.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Segment whose whole length is managed by the heap
    pub fn new(byte_length: Size) -> HeapResult<Self> {
        Self::with_region(byte_length, 0, byte_length)
    }

    /// Segment reserving `capacity` bytes, of which the first `byte_length` are
    /// managed; the rest is room for in-place growth
    pub fn reserved(byte_length: Size, capacity: Size) -> HeapResult<Self> {
        Self::with_region(capacity, 0, byte_length)
    }

    /// Segment of `capacity` bytes managing `[byte_offset, byte_offset + byte_length)`
    pub fn with_region(capacity: Size, byte_offset: Address, byte_length: Size) -> HeapResult<Self> {
        let end = byte_offset
            .checked_add(byte_length)
            .filter(|end| *end <= capacity)
            .ok_or(HeapError::SegmentTooSmall {
                length: capacity,
                required: byte_offset.saturating_add(byte_length),
            })?;

        let layout = Layout::from_size_align(capacity.max(1), SEGMENT_ALIGN).map_err(|_| {
            HeapError::OutOfMemory {
                requested: capacity,
                heap_length: 0,
            }
        })?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(HeapError::OutOfMemory {
            requested: capacity,
            heap_length: 0,
        })?;

        debug!(capacity, byte_offset, end, "Segment allocated");

        Ok(Self {
            ptr,
            layout,
            byte_offset,
            byte_length: AtomicUsize::new(byte_length),
        })
    }

    /// Lengthen the managed region inside the reservation
    ///
    /// Returns `false`, leaving the region unchanged, when `byte_length` is
    /// shorter than the current region or does not fit the capacity.
    pub fn extend(&self, byte_length: Size) -> bool {
        let fits = self
            .byte_offset
            .checked_add(byte_length)
            .is_some_and(|end| end <= self.capacity());
        let current = self.byte_length();
        if !fits || byte_length < current {
            return false;
        }

        self.byte_length.store(byte_length, Ordering::Release);
        debug!(previous = current, byte_length, "Segment region extended in place");
        true
    }

    /// Larger copy of this segment: same region start, longer region
    ///
    /// Every byte up to the end of the current region is copied to the same
    /// offset; the rest is zero.
    pub fn grown(&self, byte_length: Size) -> HeapResult<Self> {
        let capacity = self
            .byte_offset
            .checked_add(byte_length)
            .ok_or(HeapError::OutOfMemory {
                requested: byte_length,
                heap_length: self.byte_length(),
            })?;
        let segment = Self::with_region(capacity, self.byte_offset, byte_length)?;

        let copied = self.region_end().min(capacity);
        // SAFETY: both buffers are valid for `copied` bytes and never overlap.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), segment.ptr.as_ptr(), copied) };

        Ok(segment)
    }

    /// Total bytes in the buffer
    pub fn capacity(&self) -> Size {
        self.layout.size()
    }

    /// Start of the managed region
    pub fn byte_offset(&self) -> Address {
        self.byte_offset
    }

    /// Length of the managed region
    pub fn byte_length(&self) -> Size {
        self.byte_length.load(Ordering::Acquire)
    }

    pub fn region_end(&self) -> Address {
        self.byte_offset + self.byte_length()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    fn check_range(&self, address: Address, len: Size) {
        let in_bounds = address
            .checked_add(len)
            .is_some_and(|end| end <= self.capacity());
        assert!(
            in_bounds,
            "segment access [0x{address:x}, +{len}) outside {} bytes",
            self.capacity()
        );
    }

    /// Copy bytes out of the segment
    pub fn read_bytes(&self, address: Address, out: &mut [u8]) {
        self.check_range(address, out.len());
        // SAFETY: range checked above; `out` is a distinct Rust buffer.
        unsafe { ptr::copy_nonoverlapping(self.as_ptr().add(address), out.as_mut_ptr(), out.len()) };
    }

    /// Copy bytes into the segment
    pub fn write_bytes(&self, address: Address, data: &[u8]) {
        self.check_range(address, data.len());
        // SAFETY: range checked above; `data` is a distinct Rust buffer.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(address), data.len()) };
    }

    pub fn fill(&self, address: Address, value: u8, len: Size) {
        self.check_range(address, len);
        // SAFETY: range checked above.
        unsafe { ptr::write_bytes(self.as_ptr().add(address), value, len) };
    }

    /// Overlap-safe copy inside the segment
    pub fn copy_within(&self, dst: Address, src: Address, len: Size) {
        self.check_range(src, len);
        self.check_range(dst, len);
        // SAFETY: both ranges checked above; `ptr::copy` allows overlap.
        unsafe { ptr::copy(self.as_ptr().add(src), self.as_ptr().add(dst), len) };
    }
}

impl MemoryOperator for Segment {
    fn read64(&self, address: Address) -> i64 {
        let mut bytes = [0u8; 8];
        self.read_bytes(address, &mut bytes);
        i64::from_ne_bytes(bytes)
    }

    fn write64(&self, address: Address, value: i64) {
        self.write_bytes(address, &value.to_ne_bytes());
    }

    fn fill(&self, address: Address, value: u8, size: Size) {
        Segment::fill(self, address, value, size);
    }

    fn copy(&self, dst: Address, src: Address, size: Size) {
        self.copy_within(dst, src, size);
    }

    fn size(&self) -> Size {
        self.capacity()
    }
}

impl<W: Word> HeapMemory<W> for Segment {
    type View = SegmentView<W>;

    fn byte_offset(&self) -> Address {
        self.byte_offset
    }

    fn byte_length(&self) -> Size {
        Segment::byte_length(self)
    }

    fn capacity(&self) -> Size {
        Segment::capacity(self)
    }

    fn view(memory: &Arc<Self>, base: Address, len: usize) -> SegmentView<W> {
        SegmentView::new(Arc::clone(memory), base, len)
    }

    fn fill(&self, address: Address, value: u8, len: Size) {
        Segment::fill(self, address, value, len);
    }

    fn copy_within(&self, dst: Address, src: Address, len: Size) {
        Segment::copy_within(self, dst, src, len);
    }

    fn extend(&self, byte_length: Size) -> bool {
        Segment::extend(self, byte_length)
    }

    fn grown(&self, byte_length: Size) -> HeapResult<Self> {
        Segment::grown(self, byte_length)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: allocated in `with_region` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity())
            .field("byte_offset", &self.byte_offset)
            .field("byte_length", &self.byte_length())
            .finish()
    }
}

/// State shared by every unit working on one heap
///
/// Units attach their own allocator to an `Arc<SharedHeap>`. Growth either
/// lengthens the canonical store in place or, for a single attached unit,
/// swaps in a copy; other units notice on their next locked operation.
pub struct SharedHeap<M = Segment> {
    segment: ArcSwap<M>,
    lock: Box<dyn HeapLock>,
    units: AtomicUsize,
}

impl<M> SharedHeap<M> {
    /// Share `memory` behind a [`SegmentMutex`]
    pub fn new(memory: M) -> Arc<Self> {
        Self::with_lock(memory, Box::new(SegmentMutex::new()))
    }

    /// Share `memory` behind a caller-provided lock
    pub fn with_lock(memory: M, lock: Box<dyn HeapLock>) -> Arc<Self> {
        Arc::new(Self {
            segment: ArcSwap::from_pointee(memory),
            lock,
            units: AtomicUsize::new(0),
        })
    }

    /// Current canonical store
    pub fn segment(&self) -> Arc<M> {
        self.segment.load_full()
    }

    /// Allocators currently attached
    pub fn units(&self) -> usize {
        self.units.load(Ordering::Acquire)
    }

    pub(crate) fn join(&self) {
        self.units.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn leave(&self) {
        self.units.fetch_sub(1, Ordering::AcqRel);
    }

    /// Take the heap lock for the guard's lifetime
    pub fn lock(&self, spin: bool) -> HeapLockGuard<'_> {
        HeapLockGuard::acquire(self.lock.as_ref(), spin)
    }

    /// Make `memory` canonical. Caller must hold the heap lock.
    pub(crate) fn publish(&self, memory: Arc<M>) {
        self.segment.store(memory);
    }
}

impl<M: fmt::Debug> fmt::Debug for SharedHeap<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHeap")
            .field("segment", &self.segment.load())
            .field("units", &self.units())
            .finish_non_exhaustive()
    }
}
