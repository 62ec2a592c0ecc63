/*!
 * Shared Heap Library
 * Skip-list `malloc` / `free` over a shared, growable memory segment
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::sync::{HeapLock, HeapLockGuard, SegmentMutex};
pub use crate::core::types::{Address, Size, NULL};
pub use memory::{
    Allocator, HeapAccessor, HeapAllocator, HeapAllocator32, HeapAllocator64, HeapConfig,
    HeapError, HeapMemory, HeapResult, Inspection, MemoryOperator, OperatorHeap, OperatorMemory,
    ResizeHandler, Segment, SharedHeap,
};
pub use monitoring::{init_tracing, span_heap};
