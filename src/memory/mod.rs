/*!
 * Memory Module
 * Skip-list heap over a shared, growable store
 */

pub mod access;
pub mod diagnostics;
pub mod engine;
pub mod manager;
pub mod operator;
pub mod segment;
pub mod traits;
pub mod types;
pub mod view;
pub mod word;

// Re-export for convenience
pub use access::{HeapAccessor, Scalar};
pub use manager::{
    HandleId, HeapAllocator, HeapAllocator32, HeapAllocator64, OperatorHeap, UpdateHandle,
};
pub use operator::OperatorMemory;
pub use segment::{Segment, SharedHeap};
pub use traits::*;
pub use types::*;
pub use view::{OperatorView, SegmentView, WordView};
pub use word::{HeapGeometry, Word};
