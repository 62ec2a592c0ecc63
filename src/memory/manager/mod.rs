/*!
 * Heap Allocator
 *
 * C-style allocator over a shared, growable store.
 *
 * The store is any [`HeapMemory`]: a directly addressed [`Segment`] by default,
 * or an [`OperatorMemory`] reached through a `MemoryOperator`.
 *
 * ## Sharing
 *
 * Every execution unit owns a `HeapAllocator` attached to the same
 * `Arc<SharedHeap>`. Each public operation:
 * 1. takes the heap lock (released on every exit path by a scoped guard)
 * 2. compares its cached store and region with the canonical ones and
 *    refreshes if another unit replaced or grew them
 * 3. runs the free-list engine, growing the store on exhaustion
 *
 * ## Failure model
 *
 * - Exhaustion is an `Err` from the typed API and `NULL` from [`Allocator`]
 * - Misuse (foreign, misaligned or corrupt addresses) is fatal
 * - Double free follows [`DoubleFreePolicy`]
 *
 * [`Allocator`]: crate::memory::traits::Allocator
 * [`DoubleFreePolicy`]: crate::memory::types::DoubleFreePolicy
 * [`HeapMemory`]: crate::memory::traits::HeapMemory
 * [`OperatorMemory`]: crate::memory::operator::OperatorMemory
 */

mod allocator;
mod growth;
mod handles;

pub use handles::{HandleId, UpdateHandle, UpdateRegistry};

use super::diagnostics::check_list_integrity;
use super::engine::{prepare, FreeList};
use super::operator::OperatorMemory;
use super::segment::{Segment, SharedHeap};
use super::traits::{HeapMemory, ResizeHandler};
use super::types::{HeapConfig, HeapError, HeapResult};
use super::word::{HeapGeometry, Word};
use crate::core::limits::MAX_HEIGHT;
use crate::core::types::{Address, Size};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Log and abort on a programming error against the heap
#[cold]
#[track_caller]
pub(crate) fn fatal(err: HeapError) -> ! {
    error!(error = %err, "Fatal heap error");
    panic!("{err}");
}

/// Allocator handle owned by one execution unit
pub struct HeapAllocator<W: Word = i32, M: HeapMemory<W> = Segment> {
    shared: Arc<SharedHeap<M>>,
    memory: Arc<M>,
    /// Region length the views were built for
    region: Size,
    geometry: HeapGeometry,
    heap: M::View,
    updates: M::View,
    config: HeapConfig,
    resize_handler: Option<Arc<dyn ResizeHandler<M>>>,
    handles: UpdateRegistry<M>,
    rng: StdRng,
}

/// 4-byte words, 8-byte alignment
pub type HeapAllocator32 = HeapAllocator<i32>;

/// 8-byte words, 16-byte alignment
pub type HeapAllocator64 = HeapAllocator<i64>;

/// 8-byte words over memory reached through a `MemoryOperator`
pub type OperatorHeap<O> = HeapAllocator<i64, OperatorMemory<O>>;

fn views<W: Word, M: HeapMemory<W>>(memory: &Arc<M>, geometry: &HeapGeometry) -> (M::View, M::View) {
    (
        M::view(memory, geometry.heap_offset, geometry.heap_words),
        M::view(memory, geometry.byte_offset, MAX_HEIGHT),
    )
}

impl<W: Word, M: HeapMemory<W>> HeapAllocator<W, M> {
    /// Build a heap over a fresh store
    pub fn new(memory: M, config: HeapConfig) -> HeapResult<Self> {
        Self::attach(SharedHeap::new(memory), config)
    }

    /// Attach to a shared heap, initializing it unless a Header is already present
    pub fn attach(shared: Arc<SharedHeap<M>>, config: HeapConfig) -> HeapResult<Self> {
        let lock = Arc::clone(&shared);
        let _guard = lock.lock(config.spin_lock);

        let memory = shared.segment();
        let region = memory.byte_length();
        let geometry = HeapGeometry::new::<W>(memory.byte_offset(), region)?;
        let (heap, updates) = views::<W, M>(&memory, &geometry);

        if prepare(&heap, &updates) {
            info!(
                word = W::NAME,
                heap_offset = geometry.heap_offset,
                heap_length = geometry.heap_length::<W>(),
                grow_allowed = config.grow_allowed,
                "Heap initialized"
            );
        } else {
            info!(
                word = W::NAME,
                heap_offset = geometry.heap_offset,
                heap_length = geometry.heap_length::<W>(),
                "Attached to existing heap"
            );
        }

        if config.integrity_checks {
            check_list_integrity(&heap)?;
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        shared.join();
        Ok(Self {
            shared,
            memory,
            region,
            geometry,
            heap,
            updates,
            config,
            resize_handler: None,
            handles: UpdateRegistry::new(),
            rng,
        })
    }

    /// Obtain larger stores through `handler` instead of growing the current one
    pub fn with_resize_handler(mut self, handler: impl ResizeHandler<M> + 'static) -> Self {
        self.resize_handler = Some(Arc::new(handler));
        self
    }

    pub fn shared(&self) -> &Arc<SharedHeap<M>> {
        &self.shared
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn geometry(&self) -> HeapGeometry {
        self.geometry
    }

    /// Byte offset of the heap body inside the segment
    pub fn heap_offset(&self) -> Address {
        self.geometry.heap_offset
    }

    /// Heap body length in bytes, as of the last locked operation
    pub fn heap_length(&self) -> Size {
        self.geometry.heap_length::<W>()
    }

    /// Store this handle currently works on
    pub fn segment(&self) -> &Arc<M> {
        &self.memory
    }

    #[cfg(test)]
    pub(crate) fn handles(&self) -> &UpdateRegistry<M> {
        &self.handles
    }

    /// Run `op` under the heap lock with a current view of the segment
    fn locked<T>(&mut self, op: impl FnOnce(&mut Self) -> T) -> T {
        let shared = Arc::clone(&self.shared);
        let _guard = shared.lock(self.config.spin_lock);
        self.refresh();
        op(self)
    }

    /// Pick up a store another unit published or grew
    fn refresh(&mut self) {
        let current = self.shared.segment();
        if Arc::ptr_eq(&current, &self.memory) && current.byte_length() == self.region {
            return;
        }

        let previous = self.geometry.heap_length::<W>();
        self.install(current);
        debug!(
            previous,
            heap_length = self.geometry.heap_length::<W>(),
            "Refreshed after external growth"
        );
        self.handles.notify(&self.memory);
    }

    /// Switch views to `memory`; the heap must not move inside it
    fn install(&mut self, memory: Arc<M>) {
        let region = memory.byte_length();
        let geometry = HeapGeometry::new::<W>(memory.byte_offset(), region)
            .unwrap_or_else(|err| fatal(err));
        if geometry.heap_offset != self.geometry.heap_offset || geometry.heap_words < self.geometry.heap_words {
            fatal(HeapError::ResizeFailed(format!(
                "heap moved or shrank: offset {} -> {}, {} -> {} words",
                self.geometry.heap_offset, geometry.heap_offset, self.geometry.heap_words, geometry.heap_words
            )));
        }

        let (heap, updates) = views::<W, M>(&memory, &geometry);
        self.memory = memory;
        self.region = region;
        self.geometry = geometry;
        self.heap = heap;
        self.updates = updates;
    }

    fn free_list(&mut self) -> FreeList<'_, M::View, StdRng> {
        FreeList::new(&self.heap, &self.updates, &mut self.rng)
    }
}

impl<W: Word, M: HeapMemory<W>> Drop for HeapAllocator<W, M> {
    fn drop(&mut self) {
        self.shared.leave();
    }
}

impl<W: Word, M: HeapMemory<W>> fmt::Debug for HeapAllocator<W, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("word", &W::NAME)
            .field("geometry", &self.geometry)
            .field("region", &self.region)
            .field("config", &self.config)
            .field("resize_handler", &self.resize_handler.is_some())
            .field("handles", &self.handles)
            .finish()
    }
}
