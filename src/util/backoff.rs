//! Bounded backoff for contended retry loops.
//!
//! Producers that find every worker queue saturated retry through this
//! helper rather than spinning at an inlined threshold. The escalation
//! ladder is explicit and bounded: pure spin, then spin plus a scheduler
//! yield, then a short sleep that never grows past [`MAX_SLEEP`].

use std::time::Duration;

/// Spin rounds before the ladder escalates to yielding.
const SPIN_LIMIT: u32 = 6;
/// Yield rounds before the ladder escalates to sleeping.
const YIELD_LIMIT: u32 = 10;
/// Ceiling for the sleep stage.
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// A bounded spin → yield → sleep escalation ladder.
///
/// Each call to [`snooze`](Self::snooze) waits a little longer than the
/// last, up to a fixed ceiling, so retry loops stay low-latency under
/// brief contention but do not burn a core when contention persists.
#[derive(Debug)]
pub struct Backoff {
    step: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    /// Creates a fresh ladder at the pure-spin stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    /// Resets the ladder to the pure-spin stage.
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Returns true once the ladder has escalated past spinning.
    ///
    /// Callers that hold a condition variable can use this to switch from
    /// opportunistic retries to a timed wait.
    #[must_use]
    pub const fn is_sleeping(&self) -> bool {
        self.step >= YIELD_LIMIT
    }

    /// Waits one rung of the ladder.
    pub fn snooze(&mut self) {
        if self.step < SPIN_LIMIT {
            for _ in 0..(1 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step < YIELD_LIMIT {
            std::thread::yield_now();
        } else {
            let exceeded = self.step - YIELD_LIMIT;
            let micros = 50u64.saturating_mul(1u64 << exceeded.min(5));
            std::thread::sleep(Duration::from_micros(micros).min(MAX_SLEEP));
        }
        self.step = self.step.saturating_add(1);
    }
}
