/*!
 * Heap Growth
 *
 * When no free block fits, the body is extended. The longer region comes from,
 * in order:
 * 1. the resize handler, when one is installed
 * 2. the store's own reservation, extended in place
 * 3. a larger copy of the store, only while this is the sole attached unit
 *
 * The appended tail becomes one free block merged with a free predecessor, and
 * the store is published. Block indices and caller addresses are unchanged.
 */

use super::{fatal, HeapAllocator};
use crate::core::limits::{HEADER_OFFSET_WORDS, MIN_FREEABLE_WORDS, POINTER_OVERHEAD_WORDS};
use crate::core::types::WordIndex;
use crate::memory::diagnostics::check_list_integrity;
use crate::memory::engine::{find_free_block, verify_header, write_tag, BlockTag};
use crate::memory::traits::HeapMemory;
use crate::memory::types::{HeapError, HeapResult};
use crate::memory::word::{align_up, words_to_bytes, HeapGeometry, Word};
use crate::monitoring::span_heap;
use std::sync::Arc;
use tracing::{debug, warn};

impl<W: Word, M: HeapMemory<W>> HeapAllocator<W, M> {
    /// Smallest free block of `min` words, growing the heap when none fits
    pub(super) fn find_or_grow(&mut self, min: usize) -> HeapResult<WordIndex> {
        let block = find_free_block(&self.heap, min);
        if block != HEADER_OFFSET_WORDS {
            return Ok(block);
        }

        let exhausted = HeapError::OutOfMemory {
            requested: words_to_bytes::<W>(min),
            heap_length: self.heap_length(),
        };
        if !self.config.grow_allowed {
            warn!(
                requested = words_to_bytes::<W>(min),
                heap_length = self.heap_length(),
                "Heap exhausted"
            );
            return Err(exhausted);
        }

        self.grow(min)?;

        match find_free_block(&self.heap, min) {
            HEADER_OFFSET_WORDS => Err(exhausted),
            block => Ok(block),
        }
    }

    /// Extend the body by at least enough for a `min` word block
    fn grow(&mut self, min: usize) -> HeapResult<()> {
        let span = span_heap("grow");
        let _entered = span.enter();

        let old = self.geometry;
        let old_length = old.heap_length::<W>();
        let increment = align_up(
            self.config
                .grow_size
                .max(words_to_bytes::<W>(min + POINTER_OVERHEAD_WORDS)),
            W::ALIGNMENT,
        );
        let new_length = increment.and_then(|inc| old_length.checked_add(inc));

        let new_length = match new_length {
            Some(len) if len <= self.config.max_heap_size => len,
            _ => {
                let required = new_length.unwrap_or(usize::MAX);
                warn!(
                    required,
                    max_heap_size = self.config.max_heap_size,
                    "Heap growth refused"
                );
                span.record_error("refused");
                return Err(HeapError::GrowthRefused {
                    required,
                    max_heap_size: self.config.max_heap_size,
                });
            }
        };

        debug!(old_length, new_length, "Growing heap");
        let region = (old.heap_offset - old.byte_offset) + new_length;
        let memory = match self.obtain_memory(region) {
            Ok(memory) => memory,
            Err(err) => {
                span.record_error(&err.to_string());
                return Err(err);
            }
        };

        self.install(memory);

        // the old body ended with the last block's footer; the tail block's
        // header sits right after it
        let tail = old.heap_words + 1;
        let tail_size = self.geometry.heap_words - old.heap_words - POINTER_OVERHEAD_WORDS;
        write_tag(&self.heap, tail, BlockTag::used(tail_size));
        self.free_list()
            .release(tail, tail_size)
            .unwrap_or_else(|err| fatal(err));

        if self.config.integrity_checks {
            check_list_integrity(&self.heap).unwrap_or_else(|err| fatal(err));
        }

        self.shared.publish(Arc::clone(&self.memory));
        self.handles.notify(&self.memory);

        span.record_sizes(old_length, self.heap_length());
        span.record_result(true);
        Ok(())
    }

    /// Store holding the current heap at the same offsets in a `region` byte region
    fn obtain_memory(&self, region: usize) -> HeapResult<Arc<M>> {
        if let Some(handler) = &self.resize_handler {
            let memory = handler.resize(&self.memory, region)?;
            self.validate_resized(&memory, region)?;
            return Ok(memory);
        }

        if self.memory.extend(region) {
            return Ok(Arc::clone(&self.memory));
        }

        // other units may be writing to the current store without the lock
        let units = self.shared.units();
        if units > 1 {
            warn!(
                required = region,
                capacity = self.memory.capacity(),
                units,
                "Shared reservation exhausted"
            );
            return Err(HeapError::ReservationExhausted {
                required: self.memory.byte_offset() + region,
                capacity: self.memory.capacity(),
                units,
            });
        }

        Ok(Arc::new(self.memory.grown(region)?))
    }

    /// Check a handler-supplied store before adopting it
    fn validate_resized(&self, memory: &Arc<M>, region: usize) -> HeapResult<()> {
        let geometry = HeapGeometry::new::<W>(memory.byte_offset(), memory.byte_length())?;

        if geometry.heap_offset != self.geometry.heap_offset {
            return Err(HeapError::ResizeFailed(format!(
                "heap offset moved from {} to {}",
                self.geometry.heap_offset, geometry.heap_offset
            )));
        }
        if geometry.heap_words < self.geometry.heap_words + POINTER_OVERHEAD_WORDS + MIN_FREEABLE_WORDS {
            return Err(HeapError::ResizeFailed(format!(
                "region of {} bytes does not extend the heap (needed {region})",
                memory.byte_length()
            )));
        }

        let body = M::view(memory, geometry.heap_offset, geometry.heap_words);
        if !verify_header(&body) {
            return Err(HeapError::ResizeFailed(
                "resized store does not carry the heap contents".into(),
            ));
        }
        Ok(())
    }
}
