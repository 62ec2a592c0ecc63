/*!
 * Heap Accessor
 *
 * Typed reads and writes at byte addresses handed out by the allocator, plus
 * `memcpy` / `memmove` / `memset`. Every access goes to the canonical segment
 * of the shared heap, so writes land where every other unit reads, whichever
 * unit grew the heap last.
 *
 * Debug builds reject the null address and addresses inside free blocks.
 */

use super::engine::is_live;
use super::manager::HeapAllocator;
use super::segment::{Segment, SharedHeap};
use super::view::SegmentView;
use super::word::{bytes_to_words, HeapGeometry, Word};
use crate::core::types::{Address, Size, NULL};
use std::marker::PhantomData;
use std::sync::Arc;

/// Plain value that can be stored at a heap address
pub trait Scalar: Copy + Send + Sync + 'static {
    const SIZE: usize;

    fn load(segment: &Segment, address: Address) -> Self;

    fn store(self, segment: &Segment, address: Address);
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn load(segment: &Segment, address: Address) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    segment.read_bytes(address, &mut raw);
                    <$ty>::from_ne_bytes(raw)
                }

                #[inline]
                fn store(self, segment: &Segment, address: Address) {
                    segment.write_bytes(address, &self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Typed view of heap memory for one execution unit
pub struct HeapAccessor<W: Word> {
    shared: Arc<SharedHeap>,
    spin: bool,
    _word: PhantomData<W>,
}

impl<W: Word> HeapAllocator<W> {
    /// Accessor over the heap this allocator is attached to
    pub fn accessor(&self) -> HeapAccessor<W> {
        HeapAccessor {
            shared: Arc::clone(self.shared()),
            spin: self.config().spin_lock,
            _word: PhantomData,
        }
    }
}

impl<W: Word> HeapAccessor<W> {
    /// Canonical segment, the one every access goes to
    pub fn segment(&self) -> Arc<Segment> {
        self.shared.segment()
    }

    #[cfg(debug_assertions)]
    fn check_live(&self, address: Address, what: &str) {
        assert!(address != NULL, "Out of bounds: {what} address is NULL");

        let _guard = self.shared.lock(self.spin);
        let segment = self.shared.segment();
        let Ok(geometry) = HeapGeometry::new::<W>(segment.byte_offset(), segment.byte_length()) else {
            return;
        };
        let end = geometry.heap_offset + geometry.heap_length::<W>();
        assert!(
            address >= geometry.heap_offset && address < end,
            "{what} address 0x{address:x} is outside the heap"
        );

        let heap = SegmentView::<W>::new(segment, geometry.heap_offset, geometry.heap_words);
        let block = bytes_to_words::<W>(address - geometry.heap_offset);
        assert!(is_live(&heap, block), "{what} address 0x{address:x} is not allocated");
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn check_live(&self, _address: Address, _what: &str) {}

    pub fn read<T: Scalar>(&self, address: Address) -> T {
        self.check_live(address, "src");
        T::load(&self.shared.segment(), address)
    }

    pub fn write<T: Scalar>(&self, address: Address, value: T) {
        self.check_live(address, "dst");
        value.store(&self.shared.segment(), address);
    }

    pub fn read_bytes(&self, address: Address, out: &mut [u8]) {
        self.check_live(address, "src");
        self.shared.segment().read_bytes(address, out);
    }

    pub fn write_bytes(&self, address: Address, data: &[u8]) {
        self.check_live(address, "dst");
        self.shared.segment().write_bytes(address, data);
    }

    /// Copy `size` bytes from `src` to `dst`
    pub fn memcpy(&self, dst: Address, src: Address, size: Size) {
        debug_assert!(src != NULL, "Out of bounds: src address is NULL");
        self.check_live(dst, "dst");
        self.shared.segment().copy_within(dst, src, size);
    }

    /// Copy `size` bytes from `src` to `dst`; the ranges may overlap
    pub fn memmove(&self, dst: Address, src: Address, size: Size) {
        self.memcpy(dst, src, size);
    }

    /// Set `size` bytes at `dst` to `value`
    pub fn memset(&self, dst: Address, value: u8, size: Size) {
        self.check_live(dst, "dst");
        self.shared.segment().fill(dst, value, size);
    }
}

impl<W: Word> Clone for HeapAccessor<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            spin: self.spin,
            _word: PhantomData,
        }
    }
}
