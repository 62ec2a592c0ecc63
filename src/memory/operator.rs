/*!
 * Operator Memory
 *
 * Heap store reached only through a `MemoryOperator`. The managed region grows
 * in place by asking the operator for more addressable bytes, so every unit
 * sharing the operator keeps seeing the same contents.
 */

use super::traits::{HeapMemory, MemoryOperator};
use super::types::{HeapError, HeapResult};
use super::view::OperatorView;
use crate::core::types::{Address, Size};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Managed region `[byte_offset, byte_offset + byte_length)` of an operator's memory
pub struct OperatorMemory<O: MemoryOperator + ?Sized> {
    operator: Arc<O>,
    byte_offset: Address,
    byte_length: AtomicUsize,
}

impl<O: MemoryOperator + ?Sized> OperatorMemory<O> {
    pub fn new(operator: Arc<O>, byte_offset: Address, byte_length: Size) -> HeapResult<Self> {
        let size = operator.size();
        let end = byte_offset
            .checked_add(byte_length)
            .filter(|end| *end <= size)
            .ok_or(HeapError::SegmentTooSmall {
                length: size,
                required: byte_offset.saturating_add(byte_length),
            })?;

        debug!(size, byte_offset, end, "Operator memory attached");

        Ok(Self {
            operator,
            byte_offset,
            byte_length: AtomicUsize::new(byte_length),
        })
    }

    pub fn operator(&self) -> &Arc<O> {
        &self.operator
    }
}

impl<O: MemoryOperator + ?Sized + 'static> HeapMemory<i64> for OperatorMemory<O> {
    type View = OperatorView<O>;

    fn byte_offset(&self) -> Address {
        self.byte_offset
    }

    fn byte_length(&self) -> Size {
        self.byte_length.load(Ordering::Acquire)
    }

    fn capacity(&self) -> Size {
        self.operator.size()
    }

    fn view(memory: &Arc<Self>, base: Address, len: usize) -> OperatorView<O> {
        OperatorView::new(Arc::clone(&memory.operator), base, len)
    }

    fn fill(&self, address: Address, value: u8, len: Size) {
        self.operator.fill(address, value, len);
    }

    fn copy_within(&self, dst: Address, src: Address, len: Size) {
        if len > 0 {
            self.operator.copy(dst, src, len);
        }
    }

    fn extend(&self, byte_length: Size) -> bool {
        let Some(end) = self.byte_offset.checked_add(byte_length) else {
            return false;
        };
        if byte_length < self.byte_length() {
            return false;
        }

        if end > self.operator.size() {
            if let Err(err) = self.operator.grow(end) {
                warn!(error = %err, end, "Memory operator did not grow");
                return false;
            }
        }

        self.byte_length.store(byte_length, Ordering::Release);
        debug!(byte_length, "Operator region extended in place");
        true
    }

    fn grown(&self, byte_length: Size) -> HeapResult<Self> {
        Err(HeapError::ResizeFailed(format!(
            "operator memory only grows in place; {byte_length} bytes unavailable"
        )))
    }
}

impl<O: MemoryOperator + ?Sized> fmt::Debug for OperatorMemory<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorMemory")
            .field("size", &self.operator.size())
            .field("byte_offset", &self.byte_offset)
            .field("byte_length", &self.byte_length.load(Ordering::Acquire))
            .finish()
    }
}
