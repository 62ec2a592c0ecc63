/*!
 * Segment Mutex
 *
 * The single coarse lock guarding a shared heap.
 *
 * # Design
 *
 * Three-state word: unlocked, locked, locked-with-waiters.
 * - Uncontended lock/unlock is one compare-exchange / one swap
 * - Contended waiters either park through `parking_lot_core` or spin with backoff
 * - Unlock only touches the parking table when the state says someone may be waiting
 */

use super::spinwait::SpinWait;
use parking_lot_core::{park, unpark_one, ParkToken, UnparkToken};
use std::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// Mutual exclusion over a shared segment
///
/// `spin` selects how a contended caller waits: `true` busy-waits (for callers
/// that must never block in the kernel), `false` parks the thread.
pub trait HeapLock: Send + Sync {
    /// Block (or spin) until the lock is held
    fn lock(&self, spin: bool);

    /// Acquire only if free
    fn try_lock(&self) -> bool;

    /// Release the lock. Must only be called by the holder.
    fn unlock(&self);
}

/// Scoped holder of a [`HeapLock`]; releases on every exit path
#[must_use = "the heap lock is released as soon as the guard is dropped"]
pub struct HeapLockGuard<'a> {
    lock: &'a dyn HeapLock,
}

impl<'a> HeapLockGuard<'a> {
    /// Acquire `lock` and return the guard owning it
    pub fn acquire(lock: &'a dyn HeapLock, spin: bool) -> Self {
        lock.lock(spin);
        Self { lock }
    }
}

impl Drop for HeapLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Three-state parking mutex
///
/// # Performance
///
/// - Cache-line aligned so the lock word never shares a line with heap metadata
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct SegmentMutex {
    state: AtomicU32,
}

impl SegmentMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// Whether some thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }

    #[inline]
    fn key(&self) -> usize {
        &self.state as *const AtomicU32 as usize
    }

    #[cold]
    fn lock_contended(&self, spin: bool) {
        let mut backoff = SpinWait::new();

        // Swapping in CONTENDED both takes the lock when it is free and tells
        // the holder that it has to wake someone on unlock.
        while self.state.swap(CONTENDED, Ordering::Acquire) != UNLOCKED {
            if spin {
                backoff.spin();
                continue;
            }

            // SAFETY: the key is the address of our own state word, which outlives
            // the park call; the callbacks do not panic or call into the parking lot.
            unsafe {
                park(
                    self.key(),
                    || self.state.load(Ordering::Relaxed) == CONTENDED,
                    || {},
                    |_, _| {},
                    ParkToken(0),
                    None,
                );
            }
        }
    }
}

impl HeapLock for SegmentMutex {
    #[inline]
    fn lock(&self, spin: bool) {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_contended(spin);
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    fn unlock(&self) {
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            // SAFETY: same key as used by `park`; the callback does not panic.
            unsafe {
                unpark_one(self.key(), |_| UnparkToken(0));
            }
        }
    }
}

/// `parking_lot`'s raw mutex as a heap lock, for embedders that already share one
impl HeapLock for parking_lot::RawMutex {
    fn lock(&self, spin: bool) {
        if !spin {
            parking_lot::lock_api::RawMutex::lock(self);
            return;
        }
        let mut backoff = SpinWait::new();
        while !parking_lot::lock_api::RawMutex::try_lock(self) {
            backoff.spin();
        }
    }

    fn try_lock(&self) -> bool {
        parking_lot::lock_api::RawMutex::try_lock(self)
    }

    fn unlock(&self) {
        // SAFETY: HeapLock::unlock is only called by the current holder.
        unsafe { parking_lot::lock_api::RawMutex::unlock(self) }
    }
}
