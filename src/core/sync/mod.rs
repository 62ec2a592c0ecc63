/*!
 * Synchronization Primitives
 *
 * The lock contract the heap relies on, plus its default implementation:
 * - `HeapLock`: lock(spin) / try_lock / unlock over a shared segment
 * - `SegmentMutex`: three-state parking mutex
 * - `SpinWait`: bounded backoff for waiters that must not park
 */

mod mutex;
mod spinwait;

pub use mutex::{HeapLock, HeapLockGuard, SegmentMutex};
pub use spinwait::SpinWait;
