/*!
 * Monitoring
 * Tracing setup and spans for heap operations
 */

mod tracer;

pub use tracer::{init_tracing, span_heap, HeapSpan};
