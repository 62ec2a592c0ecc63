/*!
 * Bounded Spin Backoff
 *
 * Spins with exponentially growing busy loops, then falls back to yielding the
 * time slice. Used by lock waiters that must not park.
 */

use crate::core::limits::LOCK_SPIN_LIMIT;
use std::hint;
use std::thread;

/// Exponential spin backoff
///
/// # Performance
///
/// - Short critical sections are usually released within the busy-loop phase
/// - Long waits degrade to `yield_now` so a spinning waiter does not starve the holder
#[derive(Debug, Default)]
pub struct SpinWait {
    spins: u32,
}

impl SpinWait {
    pub const fn new() -> Self {
        Self { spins: 0 }
    }

    /// Wait a little longer than last time
    #[inline]
    pub fn spin(&mut self) {
        if self.spins < LOCK_SPIN_LIMIT {
            let rounds = 1u32 << self.spins.min(6);
            for _ in 0..rounds {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        self.spins = self.spins.saturating_add(1);
    }

    /// Number of `spin` calls so far
    pub fn spins(&self) -> u32 {
        self.spins
    }

    pub fn reset(&mut self) {
        self.spins = 0;
    }
}
