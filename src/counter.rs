//! Join counters and wait handles.
//!
//! A [`TaskCounter`] tracks how many sibling tasks remain outstanding and
//! holds the fibers waiting for them. Arming, decrementing, and clearing
//! follow a strict state machine; violating it is a bug in the calling code
//! and asserts immediately rather than corrupting scheduler state.
//!
//! Counter states:
//!
//! ```text
//! idle (-1) --start(n)--> armed (n) --decrement x n--> finished (0)
//!     ^                                                    |
//!     +------------------------clear----------------------+
//! ```
//!
//! When the count reaches zero every queued waiter is re-submitted through
//! the normal task path as a resume entry at its recorded priority, so the
//! decrementing fiber keeps running and resumption competes fairly with
//! other queued work.

use crate::fiber::FiberId;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::Stats;
use crate::task::{Payload, Priority};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

/// Capacity of the stalled-fiber queue per counter.
///
/// More simultaneous waiters than this on one counter is treated as a
/// capacity-planning bug, not a runtime condition.
pub(crate) const MAX_WAITERS: usize = 8;

/// A fiber queued on a counter, with the priority it resumes at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Waiter {
    pub(crate) fiber: FiberId,
    pub(crate) priority: Priority,
}

#[derive(Debug)]
struct CounterState {
    /// `-1` idle, `>= 0` armed with that many outstanding tasks.
    count: isize,
    waiters: SmallVec<[Waiter; MAX_WAITERS]>,
}

/// A reference-counted join barrier.
///
/// The lock is held only for increment/decrement/queue-push, so a plain
/// adaptive mutex serves; hold times are well under a microsecond.
#[derive(Debug)]
pub struct TaskCounter {
    state: Mutex<CounterState>,
}

impl Default for TaskCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCounter {
    /// Creates an idle counter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CounterState {
                count: -1,
                waiters: SmallVec::new(),
            }),
        }
    }

    /// Arms the counter with `n` outstanding tasks.
    ///
    /// The counter must be idle. Arming happens before any of the `n` tasks
    /// is published, so no completion can race the arm.
    pub(crate) fn start(&self, n: usize) {
        let mut state = self.state.lock();
        assert!(
            state.count == -1,
            "starting a counter that is already armed (count = {})",
            state.count
        );
        state.count = isize::try_from(n).expect("task count overflow");
    }

    /// Queues `waiter` unless the join already happened.
    ///
    /// Returns `false` when the count is already zero; the caller must not
    /// suspend. Returns `true` after queuing; the caller must suspend and
    /// will be resumed through the scheduler once the count reaches zero.
    pub(crate) fn wait_for(&self, waiter: Waiter) -> bool {
        let mut state = self.state.lock();
        if state.count == 0 {
            return false;
        }
        assert!(state.count > 0, "waiting on a counter that was never armed");
        assert!(
            state.waiters.len() < MAX_WAITERS,
            "more than {MAX_WAITERS} fibers stalled on one counter"
        );
        state.waiters.push(waiter);
        true
    }

    /// Decrements the count, resuming all waiters if it reaches zero.
    ///
    /// Waiters are re-submitted through `scheduler` as resume entries at
    /// their recorded priority rather than switched to directly, so the
    /// caller keeps running and resumption respects queue ordering.
    pub(crate) fn decrement_and_resume(&self, scheduler: &Scheduler) {
        let drained: SmallVec<[Waiter; MAX_WAITERS]> = {
            let mut state = self.state.lock();
            assert!(state.count > 0, "counter decremented past zero");
            state.count -= 1;
            if state.count == 0 {
                std::mem::take(&mut state.waiters)
            } else {
                SmallVec::new()
            }
        };

        for waiter in drained {
            scheduler.produce(waiter.priority, Payload::ResumeFiber(waiter.fiber));
        }
    }

    /// Returns true once the count has reached zero.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.state.lock().count == 0
    }

    /// Returns true while the counter is armed.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.lock().count >= 0
    }

    /// Re-idles a finished counter for recycling.
    ///
    /// The count must be zero and the waiter queue empty.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        assert!(
            state.count == 0,
            "clearing a counter with {} tasks outstanding",
            state.count
        );
        assert!(
            state.waiters.is_empty(),
            "clearing a counter with fibers still queued"
        );
        state.count = -1;
    }
}

/// RAII token for joining on a set of submitted tasks.
///
/// Holds a strong reference to exactly one counter and the priority its
/// waiters resume at. Consume it with
/// [`TaskContext::wait_for`](crate::runtime::TaskContext::wait_for);
/// dropping an unconsumed handle asserts (in debug builds) that the join
/// already happened.
///
/// Non-copyable; movable; invalid after being consumed.
#[derive(Debug)]
pub struct WaitHandle {
    counter: Option<Arc<TaskCounter>>,
    priority: Priority,
    stats: Arc<Stats>,
}

impl WaitHandle {
    pub(crate) fn new(counter: Arc<TaskCounter>, priority: Priority, stats: Arc<Stats>) -> Self {
        Self {
            counter: Some(counter),
            priority,
            stats,
        }
    }

    /// The priority waiters on this handle resume at.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns true once every task behind this handle has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.counter.as_ref().is_some_and(|c| c.finished())
    }

    /// Consumes the handle, yielding the counter and resume priority.
    pub(crate) fn into_parts(mut self) -> (Arc<TaskCounter>, Priority) {
        let counter = self.counter.take().expect("wait handle already consumed");
        (counter, self.priority)
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        if let Some(counter) = self.counter.take() {
            debug_assert!(
                counter.finished(),
                "wait handle dropped before its tasks completed"
            );
            if counter.finished() {
                counter.clear();
                self.stats.counter_retired();
            }
        }
    }
}
